use thiserror::Error;

/// Custom error type for instruction classification and length decoding.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The external length decoder could not determine an instruction length.
    #[error("length decoder failed at offset {0:#x}")]
    Lde(usize),
    /// A read would fall outside the analyzed buffer.
    #[error("offset {offset:#x} is outside the {len:#x}-byte buffer")]
    OutOfBounds {
        /// Offset at which the read was attempted.
        offset: usize,
        /// Length of the buffer.
        len: usize,
    },
    /// The bytes at the given offset do not carry a branch displacement.
    #[error("no branch displacement at offset {0:#x}")]
    NotABranch(usize),
}

/// Error type for control-flow graph construction.
#[derive(Debug, Error)]
pub enum CfgError {
    /// Decoding error from the classifier or the external length decoder.
    #[error("decoding error: {0}")]
    Decode(#[from] DecodeError),
    /// A pending-branch worklist hit its capacity bound.
    #[error("pending-branch worklist capacity {0} exceeded")]
    WorklistOverflow(usize),
    /// The entry offset does not point into the input buffer.
    #[error("entry offset {entry:#x} is outside the {len:#x}-byte buffer")]
    EntryOutOfBounds {
        /// The requested entry offset.
        entry: usize,
        /// Length of the input buffer.
        len: usize,
    },
    /// A call targets code outside the analyzed region.
    #[error("call at offset {0:#x} branches outside the analyzed region")]
    CallLeavesRegion(usize),
}

/// Error type for code emission.
#[derive(Debug, Error)]
pub enum EmitError {
    /// A pending-branch worklist hit its capacity bound.
    #[error("pending-branch worklist capacity {0} exceeded")]
    WorklistOverflow(usize),
    /// The graph has no entry node to start placement from.
    #[error("graph has no entry node")]
    EmptyGraph,
}

/// Error type for graph export.
#[derive(Debug, Error)]
pub enum ExportError {
    /// The graph file could not be written.
    #[error("could not write graph file: {0}")]
    Io(#[from] std::io::Error),
    /// A conditional jump has no taken edge, so its true branch cannot be drawn.
    #[error("conditional jump node {0} has no taken edge")]
    MissingBranchTarget(usize),
}
