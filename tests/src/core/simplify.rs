use super::support::ByteLde;
use codegraph_core::simplify::remove_call_trampolines;
use codegraph_core::{build_graph, NodeKind};

#[test]
fn call_trampoline_is_excised() {
    // 0: call 7; 5: line; 6: ret; 7: lea esp,[esp+4]; 11: ret
    let input = [
        0xE8, 0x02, 0x00, 0x00, 0x00, 0x40, 0xC3, 0x8D, 0x64, 0x24, 0x04, 0xC3,
    ];
    let mut graph = build_graph(&input, 0, &ByteLde).unwrap();
    assert_eq!(graph.node_count(), 5);

    let removed = remove_call_trampolines(&mut graph);

    assert_eq!(removed, 1);
    assert_eq!(graph.node_count(), 2);
    // The call, its return site and the trampoline are gone; only the two
    // returns survive.
    assert!(graph
        .ids()
        .all(|id| graph.node(id).kind == NodeKind::Return));
    assert!(graph.entry().is_some());
}

#[test]
fn emission_sweeps_up_nodes_orphaned_by_excision() {
    let input = [
        0xE8, 0x02, 0x00, 0x00, 0x00, 0x40, 0xC3, 0x8D, 0x64, 0x24, 0x04, 0xC3,
    ];
    let mut graph = build_graph(&input, 0, &ByteLde).unwrap();
    remove_call_trampolines(&mut graph);

    // Only returns survive; the one cut off from the entry is appended by
    // the final sweep so every node is emitted exactly once.
    let out = graph.emit().unwrap();
    assert_eq!(out, vec![0xC3, 0xC3]);
}

#[test]
fn ordinary_calls_are_left_alone() {
    let input = [0xE8, 0x01, 0x00, 0x00, 0x00, 0xC3, 0x40, 0xC3];
    let mut graph = build_graph(&input, 0, &ByteLde).unwrap();
    let before = graph.node_count();

    assert_eq!(remove_call_trampolines(&mut graph), 0);
    assert_eq!(graph.node_count(), before);
}
