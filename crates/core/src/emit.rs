//! Two-phase code emission: placement, then displacement relocation.
//!
//! Phase 1 walks the graph in a strategy-specific order, assigns every node
//! an output position and copies its bytes. Wherever the physically next node
//! is not the logical fallthrough successor, a synthetic long jump is
//! appended so physical layout and control flow stay decoupled. Phase 2
//! rewrites every branch displacement against the final positions.
//!
//! Emission reassigns node positions, so at most one layout may be produced
//! per built graph; a second call would relocate against stale state.

use crate::cfg::{CodeGraph, Node, NodeId};
use crate::decoder::NodeKind;
use crate::encoder;
use crate::opcode;
use codegraph_utils::errors::EmitError;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tracing::debug;

impl CodeGraph {
    /// Emits the graph in discovery order, the identity layout.
    ///
    /// For a graph built from straight-line code this reproduces the input
    /// buffer byte for byte; elided unconditional jumps and the dead bytes
    /// behind them stay gone.
    pub fn emit(&mut self) -> Result<Vec<u8>, EmitError> {
        let mut out = Vec::new();
        self.begin_layout()?;
        self.place_from_entry(&mut out)?;
        self.place_orphans(&mut out);
        self.relocate(&mut out);

        debug_assert!(self.pending_empty(), "worklists must drain at completion");
        debug!("emitted {} bytes in identity layout", out.len());
        Ok(out)
    }

    /// Emits the graph with a single-byte NOP inserted after every original
    /// node except the last.
    pub fn emit_nop_padded(&mut self) -> Result<Vec<u8>, EmitError> {
        self.pad_with_nops();
        self.emit()
    }

    /// Emits the graph in a uniformly shuffled "spaghetti" order.
    ///
    /// A leading synthetic jump keeps the entry reachable from offset zero,
    /// and every relocated non-return node is chased by a synthetic jump to
    /// its original fallthrough target, since physical adjacency no longer
    /// implies logical adjacency. The shuffle is driven entirely by the
    /// caller's generator, so a seeded [`StdRng`] reproduces a layout.
    pub fn emit_spaghetti(&mut self, rng: &mut StdRng) -> Result<Vec<u8>, EmitError> {
        let entry = self.entry().ok_or(EmitError::EmptyGraph)?;
        self.begin_layout()?;

        let mut order: Vec<NodeId> = self.ids().collect();
        order.shuffle(rng);

        let mut out = Vec::new();
        let lead = self.allocate(Node::synthetic_jump(Some(entry), None));
        self.place(lead, &mut out);

        for id in order {
            self.place(id, &mut out);

            let (kind, fall, pred) = {
                let node = self.node(id);
                (node.kind, node.fallthrough, node.predecessor)
            };
            // Execution continues past everything but a return.
            if kind == NodeKind::Return {
                continue;
            }
            let Some(fall) = fall else {
                continue;
            };
            let glue = self.allocate(Node::synthetic_jump(Some(fall), pred));
            self.place(glue, &mut out);
        }

        self.relocate(&mut out);
        debug!("emitted {} bytes in spaghetti layout", out.len());
        Ok(out)
    }

    /// Resets every position to unresolved and drains stale worklist state.
    fn begin_layout(&mut self) -> Result<(), EmitError> {
        if self.entry().is_none() {
            return Err(EmitError::EmptyGraph);
        }
        let ids: Vec<NodeId> = self.ids().collect();
        for id in ids {
            self.node_mut(id).position = None;
        }
        self.cond_worklist.clear();
        self.call_worklist.clear();
        Ok(())
    }

    /// Phase-1 worklist walk from the entry node.
    fn place_from_entry(&mut self, out: &mut Vec<u8>) -> Result<(), EmitError> {
        let mut cursor = self.entry();

        while let Some(id) = cursor {
            if self.node(id).position.is_some() {
                cursor = self.next_pending();
                continue;
            }

            let kind = self.node(id).kind;

            if kind == NodeKind::Label {
                // Zero-size marker: takes a position, emits nothing.
                self.node_mut(id).position = Some(out.len());
                cursor = self.node(id).fallthrough;
                if cursor.is_none() {
                    cursor = self.next_pending();
                }
                continue;
            }

            // Defer branch targets that have not been placed yet.
            if matches!(kind, NodeKind::CondJump | NodeKind::Call) {
                let taken = self.node(id).taken;
                if let Some(taken) = taken {
                    if self.node(taken).position.is_none() {
                        let worklist = if kind == NodeKind::CondJump {
                            &mut self.cond_worklist
                        } else {
                            &mut self.call_worklist
                        };
                        worklist.push(id).map_err(EmitError::WorklistOverflow)?;
                    }
                }
            }

            let fall = self.node(id).fallthrough;

            let jump_to_next = kind == NodeKind::Jump
                && fall.is_some_and(|target| self.node(target).position.is_none());
            if jump_to_next {
                // The jump's target is about to be placed directly behind it,
                // so the jump itself is redundant code.
                self.excise(id);
            } else {
                self.place(id, out);

                if kind != NodeKind::Jump {
                    if let Some(fall) = fall {
                        if self.node(fall).position.is_some() {
                            // The physical successor will not be the logical
                            // fallthrough; bridge the gap.
                            let pred = self.node(id).predecessor;
                            let glue = self.allocate(Node::synthetic_jump(Some(fall), pred));
                            self.place(glue, out);
                        }
                    }
                }
            }

            cursor = fall;
            if cursor.is_none() {
                cursor = self.next_pending();
            }
        }
        Ok(())
    }

    /// Pops the next deferred branch and resumes placement at its taken
    /// target. Conditional jumps drain before calls.
    fn next_pending(&mut self) -> Option<NodeId> {
        if let Some(id) = self.cond_worklist.pop() {
            return self.node(id).taken;
        }
        if let Some(id) = self.call_worklist.pop() {
            return self.node(id).taken;
        }
        None
    }

    /// Final sweep: appends every node the walk never reached, so phase 2
    /// finds a position for every relocation target.
    fn place_orphans(&mut self, out: &mut Vec<u8>) {
        let ids: Vec<NodeId> = self.ids().collect();
        for id in ids {
            if self.node(id).position.is_none() {
                debug!("orphaned node {} appended at {:#x}", id.index(), out.len());
                self.place(id, out);
            }
        }
    }

    /// Assigns the next output position to a node and copies its bytes.
    fn place(&mut self, id: NodeId, out: &mut Vec<u8>) {
        let position = out.len();
        let node = self.node_mut(id);
        node.position = Some(position);
        out.extend_from_slice(&node.bytes);
    }

    /// Phase 2: patches the displacement of every branch node.
    fn relocate(&self, out: &mut [u8]) {
        for id in self.ids() {
            if matches!(
                self.node(id).kind,
                NodeKind::Jump | NodeKind::CondJump | NodeKind::Call
            ) {
                encoder::patch_displacement(self, id, out);
            }
        }
    }

    /// Inserts a NOP line node after every original node except the last,
    /// the preparation step of the NOP-padded layout.
    fn pad_with_nops(&mut self) {
        let live: Vec<NodeId> = self.ids().collect();
        if live.len() < 2 {
            return;
        }
        for &id in &live[..live.len() - 1] {
            self.insert_after(id, Node::new(NodeKind::Line, vec![opcode::NOP]));
        }
    }
}
