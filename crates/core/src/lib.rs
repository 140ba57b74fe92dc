//! Control-flow graph reconstruction and relayout for raw x86 code.
//!
//! The pipeline ingests a byte buffer, rebuilds the control-flow graph
//! reachable from an entry offset ([`cfg::build_graph`]), optionally rewrites
//! the graph ([`simplify`], [`encoder`]), and re-emits equivalent machine code
//! in one of three physical layouts ([`emit`]). [`export`] serializes the
//! graph for external visualization tooling.

pub mod cfg;
pub mod decoder;
pub mod emit;
pub mod encoder;
pub mod export;
pub mod opcode;
pub mod simplify;

pub use cfg::{build_graph, CodeGraph, Node, NodeId, WORKLIST_CAPACITY};
pub use decoder::{LengthDecoder, NodeKind};
