//! Node arena, pending-branch worklists, and the graph builder.
//!
//! The builder walks the input buffer with an explicit cursor and two bounded
//! LIFO worklists instead of recursing into branch targets. Loops and
//! re-converging branches terminate because a second visit to any source
//! offset resolves to the node already allocated there. The resulting graph
//! is a pointer-free arena: nodes are addressed by stable [`NodeId`] indices
//! and `Option<NodeId>` is the "no edge" sentinel, so back-edges and cycles
//! are representable without ownership knots.

use crate::decoder::{self, LengthDecoder, NodeKind};
use crate::encoder;
use crate::opcode;
use codegraph_utils::errors::CfgError;
use tracing::{debug, warn};

/// Capacity bound of each pending-branch worklist.
pub const WORKLIST_CAPACITY: usize = 4096;

/// Stable index of a node in the session arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

impl NodeId {
    /// Raw arena index, usable as a diagnostic identity.
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// One decoded instruction or a synthetic marker in the control-flow graph.
#[derive(Debug, Clone)]
pub struct Node {
    /// Branch class of the node.
    pub kind: NodeKind,
    /// Current encoding. For branches this is the chosen short or long form
    /// with a placeholder displacement, not necessarily the source bytes.
    pub bytes: Vec<u8>,
    /// Source offset during construction; output offset during emission.
    /// `None` means the node has not been placed in the buffer being built.
    pub position: Option<usize>,
    /// Successor when no branch is taken: a line's successor, a conditional
    /// jump's not-taken successor, a call's return site.
    pub fallthrough: Option<NodeId>,
    /// Successor when the branch is taken: a conditional jump's target, a
    /// call's callee entry.
    pub taken: Option<NodeId>,
    /// Back-reference used only for splicing during removal, never for
    /// traversal.
    pub predecessor: Option<NodeId>,
}

impl Node {
    /// Creates an unlinked, unplaced node.
    pub fn new(kind: NodeKind, bytes: Vec<u8>) -> Self {
        Self {
            kind,
            bytes,
            position: None,
            fallthrough: None,
            taken: None,
            predecessor: None,
        }
    }

    /// Long unconditional jump with a placeholder displacement, wired to
    /// `target`. The workhorse glue node of every relayout.
    pub(crate) fn synthetic_jump(target: Option<NodeId>, predecessor: Option<NodeId>) -> Self {
        let mut bytes = vec![opcode::JMP_REL32];
        bytes.extend_from_slice(&[opcode::UNPATCHED; 4]);
        Self {
            kind: NodeKind::Jump,
            bytes,
            position: None,
            fallthrough: target,
            taken: None,
            predecessor,
        }
    }

    /// Zero-size marker for control leaving the analyzed region.
    pub(crate) fn label() -> Self {
        Self::new(NodeKind::Label, Vec::new())
    }

    /// Byte length of the node's current encoding.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True for zero-size markers.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Bounded LIFO stack of nodes whose branch targets still need visiting.
#[derive(Debug)]
pub(crate) struct Worklist {
    entries: Vec<NodeId>,
    capacity: usize,
}

impl Worklist {
    fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            capacity,
        }
    }

    /// Pushes a node, or reports the capacity bound that would be exceeded.
    pub(crate) fn push(&mut self, id: NodeId) -> Result<(), usize> {
        if self.entries.len() >= self.capacity {
            return Err(self.capacity);
        }
        self.entries.push(id);
        Ok(())
    }

    pub(crate) fn pop(&mut self) -> Option<NodeId> {
        self.entries.pop()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}

/// One analysis session: the node arena, the entry node, and the two
/// pending-branch worklists.
///
/// All mutable state of an analysis lives here; independent sessions can be
/// processed on independent threads. A session covers exactly one input
/// buffer and at most one emission per build (emission reassigns node
/// positions, so a second layout needs a rebuilt graph).
#[derive(Debug)]
pub struct CodeGraph {
    nodes: Vec<Option<Node>>,
    entry: Option<NodeId>,
    pub(crate) cond_worklist: Worklist,
    pub(crate) call_worklist: Worklist,
}

impl Default for CodeGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl CodeGraph {
    /// Creates an empty session.
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            entry: None,
            cond_worklist: Worklist::new(WORKLIST_CAPACITY),
            call_worklist: Worklist::new(WORKLIST_CAPACITY),
        }
    }

    /// The entry node, if any node has been allocated.
    pub const fn entry(&self) -> Option<NodeId> {
        self.entry
    }

    /// Number of live nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.iter().filter(|slot| slot.is_some()).count()
    }

    /// Iterates over live node ids in arena order.
    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|_| NodeId(index as u32)))
    }

    /// Borrow of a live node, or `None` for a removed one.
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index()).and_then(|slot| slot.as_ref())
    }

    /// Borrow of a live node. Panics if the node was removed.
    pub fn node(&self, id: NodeId) -> &Node {
        self.nodes[id.index()].as_ref().expect("node was removed")
    }

    /// Mutable borrow of a live node. Panics if the node was removed.
    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        self.nodes[id.index()].as_mut().expect("node was removed")
    }

    /// True when both pending-branch worklists are drained. Holds after every
    /// successful build or emission.
    pub fn pending_empty(&self) -> bool {
        self.cond_worklist.is_empty() && self.call_worklist.is_empty()
    }

    /// Adds a node to the arena. The first node allocated becomes the entry.
    pub fn allocate(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Some(node));
        if self.entry.is_none() {
            self.entry = Some(id);
        }
        id
    }

    /// Removes a node outright, leaving edges into it dangling. Prefer
    /// [`CodeGraph::excise`] for mid-graph removal.
    pub fn remove(&mut self, id: NodeId) {
        if self.entry == Some(id) {
            self.entry = None;
        }
        self.nodes[id.index()] = None;
    }

    /// Removes a node and splices its predecessor and successor together.
    ///
    /// The predecessor's fallthrough edge is rewired to the node's
    /// fallthrough target, and every back-reference to the node is redirected
    /// to its predecessor. Excising the entry promotes its fallthrough.
    pub fn excise(&mut self, id: NodeId) {
        let (pred, fall) = {
            let node = self.node(id);
            (node.predecessor, node.fallthrough)
        };

        if self.entry == Some(id) {
            self.entry = fall;
        }

        if let Some(pred) = pred {
            self.node_mut(pred).fallthrough = fall;
            let ids: Vec<NodeId> = self.ids().collect();
            for other in ids {
                if self.node(other).predecessor == Some(id) {
                    self.node_mut(other).predecessor = Some(pred);
                }
            }
        }

        self.nodes[id.index()] = None;
    }

    /// Inserts a node into the fallthrough chain directly after `at`.
    pub fn insert_after(&mut self, at: NodeId, node: Node) -> NodeId {
        let new_id = self.allocate(node);
        let old_fall = self.node(at).fallthrough;

        self.node_mut(at).fallthrough = Some(new_id);
        {
            let new_node = self.node_mut(new_id);
            new_node.predecessor = Some(at);
            new_node.fallthrough = old_fall;
        }
        if let Some(next) = old_fall {
            self.node_mut(next).predecessor = Some(new_id);
        }
        new_id
    }

    /// Inserts a node into the fallthrough chain directly before `at`.
    /// Inserting before the entry makes the new node the entry.
    pub fn insert_before(&mut self, at: NodeId, node: Node) -> NodeId {
        let new_id = self.allocate(node);
        if self.entry == Some(at) {
            self.entry = Some(new_id);
        }
        let old_pred = self.node(at).predecessor;

        self.node_mut(at).predecessor = Some(new_id);
        {
            let new_node = self.node_mut(new_id);
            new_node.fallthrough = Some(at);
            new_node.predecessor = old_pred;
        }
        if let Some(prev) = old_pred {
            self.node_mut(prev).fallthrough = Some(new_id);
        }
        new_id
    }

    /// Folds `second` into `first`: concatenates the bytes and adopts the
    /// fallthrough edge, then removes `second`.
    pub fn merge(&mut self, first: NodeId, second: NodeId) -> NodeId {
        let (bytes, fall) = {
            let node = self.node(second);
            (node.bytes.clone(), node.fallthrough)
        };

        let target = self.node_mut(first);
        target.bytes.extend_from_slice(&bytes);
        target.fallthrough = fall;

        if let Some(next) = fall {
            self.node_mut(next).predecessor = Some(first);
        }
        self.remove(second);
        first
    }

    /// Finds the live node whose position equals `offset`.
    ///
    /// During construction this is the dedup lookup by source offset; a
    /// second visit to an offset resolves to the node found here instead of
    /// allocating a duplicate.
    pub fn find_by_position(&self, offset: usize) -> Option<NodeId> {
        self.ids()
            .find(|&id| self.node(id).position == Some(offset))
    }
}

/// Builds the control-flow graph of `buf` reachable from `entry_offset`.
///
/// Every instruction reachable through fallthrough, conditional-taken and
/// call edges gets exactly one node. Unconditional jumps are not
/// materialized: the cursor follows them, which also elides any dead bytes
/// they skip over. Construction is single-pass and non-recursive; branch
/// targets not yet reached are parked on the session worklists and resumed
/// once the current path is exhausted.
pub fn build_graph(
    buf: &[u8],
    entry_offset: usize,
    lde: &dyn LengthDecoder,
) -> Result<CodeGraph, CfgError> {
    if entry_offset >= buf.len() {
        return Err(CfgError::EntryOutOfBounds {
            entry: entry_offset,
            len: buf.len(),
        });
    }

    let mut graph = CodeGraph::new();
    graph.parse(buf, entry_offset, lde)?;

    debug!(
        "built graph with {} nodes from {} input bytes",
        graph.node_count(),
        buf.len()
    );
    Ok(graph)
}

impl CodeGraph {
    fn parse(
        &mut self,
        buf: &[u8],
        entry_offset: usize,
        lde: &dyn LengthDecoder,
    ) -> Result<(), CfgError> {
        let mut offset = entry_offset;
        let mut last: Option<NodeId> = None;

        'walk: loop {
            let found = if offset < buf.len() {
                self.find_by_position(offset)
            } else {
                None
            };

            // Re-converging path or control leaving the region: resolve the
            // open edge of the last node, then resume a deferred branch.
            if offset >= buf.len() || found.is_some() {
                if let Some(found) = found {
                    if let Some(last_id) = last {
                        self.link_revisited(last_id, found);
                    }
                } else if let Some(last_id) = last {
                    self.terminate_with_label(last_id, offset)?;
                }

                match self.resume_pending(buf)? {
                    Some((next_offset, pending)) => {
                        offset = next_offset;
                        last = Some(pending);
                        continue 'walk;
                    }
                    None => break 'walk,
                }
            }

            let length = lde.length(buf, offset)?;
            let kind = decoder::classify(buf, offset)?;

            // Unconditional jumps carry no information beyond redirecting
            // control; follow them without materializing a node.
            if kind == NodeKind::Jump {
                offset = decoder::branch_target(buf, offset)?;
                continue 'walk;
            }

            let id = self.allocate(Node {
                kind,
                bytes: buf[offset..offset + length].to_vec(),
                position: Some(offset),
                fallthrough: None,
                taken: None,
                predecessor: last,
            });
            if let Some(last_id) = last {
                self.wire_successor(last_id, id);
            }
            last = Some(id);

            // Branches are normalized to their long form up front, with the
            // unpatched-displacement sentinel. Narrowing is a separate,
            // optional rewrite.
            if matches!(kind, NodeKind::CondJump | NodeKind::Call) {
                encoder::widen(self.node_mut(id));
            }

            match kind {
                NodeKind::Line => {
                    offset += length;
                }
                NodeKind::CondJump | NodeKind::Call => {
                    let target = decoder::branch_target(buf, offset)?;
                    if let Some(existing) = self.find_by_position(target) {
                        self.node_mut(id).taken = Some(existing);
                    } else {
                        let worklist = if kind == NodeKind::CondJump {
                            &mut self.cond_worklist
                        } else {
                            &mut self.call_worklist
                        };
                        worklist.push(id).map_err(CfgError::WorklistOverflow)?;
                    }
                    // Keep exploring the fallthrough path eagerly; the taken
                    // side waits on the worklist.
                    offset += length;
                }
                NodeKind::Return => {
                    // A return resumes its matching call's callee body; the
                    // goal is single-pass coverage, not execution simulation.
                    if let Some(call_id) = self.call_worklist.pop() {
                        offset = self.source_branch_target(buf, call_id)?;
                        last = Some(call_id);
                    } else {
                        match self.resume_pending(buf)? {
                            Some((next_offset, pending)) => {
                                offset = next_offset;
                                last = Some(pending);
                            }
                            None => break 'walk,
                        }
                    }
                }
                NodeKind::Jump | NodeKind::Label => unreachable!("not produced by classification"),
            }
        }

        self.check_call_links();
        debug_assert!(self.pending_empty(), "worklists must drain at completion");
        Ok(())
    }

    /// Pops the next deferred branch, conditional jumps first, and returns
    /// the cursor offset and last-node to resume with.
    fn resume_pending(&mut self, buf: &[u8]) -> Result<Option<(usize, NodeId)>, CfgError> {
        let pending = self
            .cond_worklist
            .pop()
            .or_else(|| self.call_worklist.pop());
        match pending {
            Some(id) => {
                let target = self.source_branch_target(buf, id)?;
                Ok(Some((target, id)))
            }
            None => Ok(None),
        }
    }

    /// Absolute branch target of a node, read from its source bytes.
    fn source_branch_target(&self, buf: &[u8], id: NodeId) -> Result<usize, CfgError> {
        let position = self
            .node(id)
            .position
            .expect("pending branch has a source offset");
        Ok(decoder::branch_target(buf, position)?)
    }

    /// Wires `current` as the successor of `last` according to `last`'s kind.
    fn wire_successor(&mut self, last: NodeId, current: NodeId) {
        let kind = self.node(last).kind;
        match kind {
            NodeKind::Line | NodeKind::Jump | NodeKind::Return | NodeKind::Label => {
                self.node_mut(last).fallthrough = Some(current);
            }
            NodeKind::CondJump | NodeKind::Call => {
                let node = self.node_mut(last);
                if node.fallthrough.is_none() {
                    node.fallthrough = Some(current);
                } else {
                    node.taken = Some(current);
                }
            }
        }
    }

    /// Resolves the open edge of `last` to an already-analyzed node.
    ///
    /// A line cannot point at a non-adjacent node directly, so it is linked
    /// through a synthetic unconditional jump; branches fill their free edge
    /// slot instead.
    fn link_revisited(&mut self, last: NodeId, found: NodeId) {
        match self.node(last).kind {
            NodeKind::Line => {
                let jump = self.allocate(Node::synthetic_jump(Some(found), Some(last)));
                self.node_mut(last).fallthrough = Some(jump);
            }
            NodeKind::CondJump | NodeKind::Call => {
                let node = self.node_mut(last);
                if node.fallthrough.is_none() {
                    node.fallthrough = Some(found);
                } else {
                    node.taken = Some(found);
                }
            }
            NodeKind::Jump | NodeKind::Return | NodeKind::Label => {}
        }
    }

    /// Terminates the open edge of `last` with a label when the cursor left
    /// the analyzed region.
    fn terminate_with_label(&mut self, last: NodeId, offset: usize) -> Result<(), CfgError> {
        match self.node(last).kind {
            NodeKind::Line => {
                let label = self.allocate(Node::label());
                self.node_mut(last).fallthrough = Some(label);
            }
            NodeKind::CondJump => {
                let label = self.allocate(Node::label());
                let node = self.node_mut(last);
                if node.fallthrough.is_none() {
                    node.fallthrough = Some(label);
                } else {
                    node.taken = Some(label);
                }
            }
            NodeKind::Call => {
                let position = self.node(last).position.unwrap_or(offset);
                return Err(CfgError::CallLeavesRegion(position));
            }
            NodeKind::Jump | NodeKind::Return | NodeKind::Label => {}
        }
        Ok(())
    }

    /// Post-condition check: every call should have both edges resolved.
    /// Missing links are reported but tolerated, unlike the conditional-jump
    /// check the exporter enforces.
    fn check_call_links(&self) {
        for id in self.ids() {
            let node = self.node(id);
            if node.kind != NodeKind::Call {
                continue;
            }
            if node.fallthrough.is_none() {
                warn!(
                    "call at {:#x} has no fallthrough edge",
                    node.position.unwrap_or(0)
                );
            }
            if node.taken.is_none() {
                warn!("call at {:#x} has no taken edge", node.position.unwrap_or(0));
            }
        }
    }
}
