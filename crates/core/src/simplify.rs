//! Removal of a known call-based obfuscation idiom.
//!
//! The pattern is a call used as a plain jump: `call target` followed at the
//! callee by `lea esp, [esp+4]`, which throws away the pushed return
//! address. Excising the trio restores the un-obfuscated flow. Purely
//! structural; not part of the default pipeline.

use crate::cfg::{CodeGraph, NodeId};
use crate::decoder::NodeKind;
use tracing::debug;

/// Byte pattern of `lea esp, [esp+4]`, the stack fix-up that marks the
/// trampoline.
const LEA_ESP_PLUS_4: [u8; 4] = [0x8D, 0x64, 0x24, 0x04];

/// Excises every call-trampoline idiom in the graph, splicing predecessor
/// and successor links across each gap. Returns the number of idioms
/// removed.
pub fn remove_call_trampolines(graph: &mut CodeGraph) -> usize {
    let mut removed = 0;
    let ids: Vec<NodeId> = graph.ids().collect();

    for id in ids {
        let Some(node) = graph.get(id) else {
            continue;
        };
        if node.kind != NodeKind::Call {
            continue;
        }

        let Some(trampoline) = node.taken else {
            continue;
        };
        let is_trampoline = graph
            .get(trampoline)
            .is_some_and(|callee| callee.bytes.starts_with(&LEA_ESP_PLUS_4));
        if !is_trampoline {
            continue;
        }

        let fallthrough = graph.node(id).fallthrough;
        if let Some(fallthrough) = fallthrough {
            if graph.get(fallthrough).is_some() {
                graph.excise(fallthrough);
            }
        }
        if Some(trampoline) != fallthrough && graph.get(trampoline).is_some() {
            graph.excise(trampoline);
        }
        graph.excise(id);
        removed += 1;
    }

    if removed > 0 {
        debug!("removed {} call trampolines", removed);
    }
    removed
}
