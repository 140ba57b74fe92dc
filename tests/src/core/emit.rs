use super::support::{control_paths, ByteLde};
use codegraph_core::{build_graph, encoder, CodeGraph, NodeKind};
use rand::rngs::StdRng;
use rand::SeedableRng;

/// jz +3 over two lines and a ret; a second line and ret on the taken side.
const FORKED: [u8; 7] = [0x74, 0x03, 0x40, 0x41, 0xC3, 0x42, 0xC3];

/// call +1 over a ret; single-line callee, then its ret.
const CALLED: [u8; 8] = [0xE8, 0x01, 0x00, 0x00, 0x00, 0xC3, 0x40, 0xC3];

/// Checks that every placed branch displacement lands exactly on its
/// target's final position, at the width of the chosen encoding.
fn assert_displacements(graph: &CodeGraph, out: &[u8]) {
    for id in graph.ids() {
        let node = graph.node(id);
        let target = match node.kind {
            NodeKind::Jump => node.taken.or(node.fallthrough),
            NodeKind::CondJump | NodeKind::Call => node.taken,
            _ => None,
        };
        let (Some(position), Some(target)) = (node.position, target) else {
            continue;
        };
        let target_position = graph.node(target).position.unwrap();

        let disp = match node.bytes[0] {
            0xE9 | 0xE8 => i64::from(i32::from_le_bytes(
                out[position + 1..position + 5].try_into().unwrap(),
            )),
            0x0F => i64::from(i32::from_le_bytes(
                out[position + 2..position + 6].try_into().unwrap(),
            )),
            _ => i64::from(out[position + 1] as i8),
        };
        assert_eq!(
            (position + node.len()) as i64 + disp,
            target_position as i64,
            "node {} displaces past its target",
            id.index()
        );
    }
}

#[test]
fn identity_round_trips_straight_line_code() {
    let input = [0x40, 0x41, 0xC3];
    let mut graph = build_graph(&input, 0, &ByteLde).unwrap();
    assert_eq!(graph.emit().unwrap(), input);
}

#[test]
fn identity_drops_flattened_jumps_and_dead_bytes() {
    let input = [0xEB, 0x01, 0xCC, 0x40, 0xC3];
    let mut graph = build_graph(&input, 0, &ByteLde).unwrap();
    assert_eq!(graph.emit().unwrap(), vec![0x40, 0xC3]);
}

#[test]
fn identity_round_trips_a_call() {
    let mut graph = build_graph(&CALLED, 0, &ByteLde).unwrap();
    assert_eq!(graph.emit().unwrap(), CALLED);
}

#[test]
fn identity_widens_backward_branches() {
    // 0: inc eax; 1: jz -3; 3: ret. The branch comes back in long form.
    let input = [0x40, 0x74, 0xFD, 0xC3];
    let mut graph = build_graph(&input, 0, &ByteLde).unwrap();
    let out = graph.emit().unwrap();
    assert_eq!(
        out,
        vec![0x40, 0x0F, 0x84, 0xF9, 0xFF, 0xFF, 0xFF, 0xC3]
    );
    assert_displacements(&graph, &out);
    assert!(graph.pending_empty());
}

#[test]
fn narrowed_branch_restores_the_original_bytes() {
    let input = [0x40, 0x74, 0xFD, 0xC3];
    let mut graph = build_graph(&input, 0, &ByteLde).unwrap();
    let branch = graph.find_by_position(1).unwrap();
    encoder::narrow(graph.node_mut(branch));

    let out = graph.emit().unwrap();
    assert_eq!(out, input);
    assert_displacements(&graph, &out);
}

#[test]
fn identity_displacements_for_forked_flow() {
    let mut graph = build_graph(&FORKED, 0, &ByteLde).unwrap();
    let out = graph.emit().unwrap();
    assert_displacements(&graph, &out);
    assert_eq!(control_paths(&FORKED), control_paths(&out));
}

#[test]
fn nop_padding_preserves_paths() {
    let mut graph = build_graph(&FORKED, 0, &ByteLde).unwrap();
    let out = graph.emit_nop_padded().unwrap();
    assert_displacements(&graph, &out);
    assert_eq!(control_paths(&FORKED), control_paths(&out));
    assert!(out.len() > FORKED.len());
}

#[test]
fn spaghetti_preserves_paths() {
    for seed in 0..16 {
        let mut graph = build_graph(&FORKED, 0, &ByteLde).unwrap();
        let mut rng = StdRng::seed_from_u64(seed);
        let out = graph.emit_spaghetti(&mut rng).unwrap();

        assert_eq!(out[0], 0xE9, "entry must stay reachable via a lead jump");
        assert_displacements(&graph, &out);
        assert_eq!(control_paths(&FORKED), control_paths(&out));
        assert!(graph.pending_empty());
    }
}

#[test]
fn spaghetti_preserves_call_semantics() {
    let mut graph = build_graph(&CALLED, 0, &ByteLde).unwrap();
    let mut rng = StdRng::seed_from_u64(7);
    let out = graph.emit_spaghetti(&mut rng).unwrap();

    assert_displacements(&graph, &out);
    assert_eq!(control_paths(&CALLED), control_paths(&out));
}

#[test]
fn rejoining_callee_keeps_its_paths() {
    // Callee tail jumps back into the shared return-site code.
    let input = [
        0xE8, 0x02, 0x00, 0x00, 0x00, 0x42, 0xC3, 0x44, 0xEB, 0xFB,
    ];
    let mut graph = build_graph(&input, 0, &ByteLde).unwrap();
    let out = graph.emit().unwrap();
    assert_displacements(&graph, &out);
    assert_eq!(control_paths(&input), control_paths(&out));
}

#[test]
fn spaghetti_is_reproducible_for_a_seed() {
    let mut first = build_graph(&FORKED, 0, &ByteLde).unwrap();
    let mut second = build_graph(&FORKED, 0, &ByteLde).unwrap();

    let mut rng = StdRng::seed_from_u64(1234);
    let out_first = first.emit_spaghetti(&mut rng).unwrap();
    let mut rng = StdRng::seed_from_u64(1234);
    let out_second = second.emit_spaghetti(&mut rng).unwrap();

    assert_eq!(out_first, out_second);
}
