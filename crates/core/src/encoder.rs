//! Short/long branch encodings and displacement backpatching.
//!
//! Branch nodes carry their displacement slot filled with the
//! [`opcode::UNPATCHED`] sentinel until the second emission phase resolves
//! it. Widening and narrowing rewrite only the byte encoding; the logical
//! fallthrough/taken edges of the node are untouched.

use crate::cfg::{CodeGraph, Node, NodeId};
use crate::decoder::NodeKind;
use crate::opcode;

/// Rewrites a branch node to its long (32-bit displacement) form.
///
/// `EB` becomes `E9`, a short `7x` conditional jump becomes `0F 8x`, and
/// nodes already in long form (including calls) get their displacement slot
/// reset to the unpatched sentinel. Loop-class opcodes have no long form and
/// only their 8-bit slot is invalidated. Non-branch nodes are untouched.
pub fn widen(node: &mut Node) {
    let Some(&first) = node.bytes.first() else {
        return;
    };

    match first {
        opcode::JMP_REL8 => {
            node.bytes = vec![opcode::JMP_REL32];
            node.bytes.extend_from_slice(&[opcode::UNPATCHED; 4]);
        }
        byte if opcode::is_short_jcc(byte) => {
            // 7x cc8 -> 0F (8x) cc32: the condition code nibble carries over.
            node.bytes = vec![opcode::TWO_BYTE_ESCAPE, byte + 0x10];
            node.bytes.extend_from_slice(&[opcode::UNPATCHED; 4]);
        }
        opcode::JMP_REL32 | opcode::CALL_REL32 => {
            node.bytes.truncate(1);
            node.bytes.extend_from_slice(&[opcode::UNPATCHED; 4]);
        }
        opcode::TWO_BYTE_ESCAPE => {
            node.bytes.truncate(2);
            node.bytes.extend_from_slice(&[opcode::UNPATCHED; 4]);
        }
        byte if opcode::is_loop_class(byte) => {
            node.bytes.truncate(1);
            node.bytes.push(opcode::UNPATCHED);
        }
        _ => {}
    }
}

/// Rewrites a long-form jump or conditional jump to its short (8-bit
/// displacement) form, invalidating the stored displacement. Valid only on
/// nodes currently in long form; anything else is left unchanged.
pub fn narrow(node: &mut Node) {
    let Some(&first) = node.bytes.first() else {
        return;
    };

    if first == opcode::JMP_REL32 {
        node.bytes = vec![opcode::JMP_REL8, opcode::UNPATCHED];
        return;
    }

    if first == opcode::TWO_BYTE_ESCAPE
        && node.bytes.len() > 1
        && opcode::is_long_jcc_suffix(node.bytes[1])
    {
        node.bytes = vec![node.bytes[1] - 0x10, opcode::UNPATCHED];
    }
}

/// Phase-2 backpatch: writes the signed displacement of one branch node into
/// the output buffer at the width of its current encoding.
///
/// A jump resolves against its fallthrough target (taken, when set), a
/// conditional jump or call against its taken target. Returns `false` when
/// there is nothing to patch: no relevant edge, or the node itself was never
/// placed. An edge whose target has no position is an internal-consistency
/// defect; phase 1 is expected to place every node.
pub(crate) fn patch_displacement(graph: &CodeGraph, id: NodeId, out: &mut [u8]) -> bool {
    let node = graph.node(id);
    let Some(position) = node.position else {
        return false;
    };

    let edge = match node.kind {
        NodeKind::Jump => node.taken.or(node.fallthrough),
        NodeKind::CondJump | NodeKind::Call => node.taken,
        _ => None,
    };
    let Some(target) = edge else {
        return false;
    };

    let Some(target_position) = graph.node(target).position else {
        debug_assert!(false, "relocation target was never placed");
        return false;
    };

    let displacement = target_position as i64 - (position + node.len()) as i64;
    let (slot, wide) = displacement_slot(&node.bytes);

    if wide {
        let raw = (displacement as i32).to_le_bytes();
        out[position + slot..position + slot + 4].copy_from_slice(&raw);
    } else {
        debug_assert!(
            i64::from(i8::MIN) <= displacement && displacement <= i64::from(i8::MAX),
            "8-bit displacement out of range"
        );
        out[position + slot] = displacement as i8 as u8;
    }
    true
}

/// Offset of the displacement inside the encoding and whether it is 32-bit.
fn displacement_slot(bytes: &[u8]) -> (usize, bool) {
    match bytes[0] {
        opcode::JMP_REL32 | opcode::CALL_REL32 => (1, true),
        opcode::TWO_BYTE_ESCAPE => (2, true),
        _ => (1, false),
    }
}
