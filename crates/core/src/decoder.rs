//! Branch-class classification and absolute target computation.
//!
//! This is deliberately not a disassembler. The core only needs to know where
//! an instruction ends (the [`LengthDecoder`] collaborator) and whether it
//! redirects control; operands of line instructions stay opaque bytes.

use crate::opcode;
use codegraph_utils::errors::DecodeError;
use tracing::warn;

/// Classification of a node in the control-flow graph.
///
/// `Line`, `Jump`, `CondJump`, `Call` and `Return` come straight from the
/// opcode bytes. `Label` is never produced by classification; it marks a spot
/// where control leaves the analyzed region and carries no bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Opaque instruction with no control-flow significance.
    Line,
    /// Unconditional jump (`EB` / `E9`).
    Jump,
    /// Conditional jump (`7x`, `0F 8x`, or a LOOP-class opcode).
    CondJump,
    /// Near call (`E8`).
    Call,
    /// Near return (`C3`).
    Return,
    /// Zero-size marker for control continuing outside the analyzed region.
    Label,
}

/// External instruction-length decoder.
///
/// The core treats length decoding as a collaborator: implementations return
/// the byte length of the instruction at `offset`, or a [`DecodeError`] that
/// aborts the whole analysis session.
pub trait LengthDecoder {
    /// Byte length of the instruction at `offset` in `buf`.
    fn length(&self, buf: &[u8], offset: usize) -> Result<usize, DecodeError>;
}

impl<F> LengthDecoder for F
where
    F: Fn(&[u8], usize) -> Result<usize, DecodeError>,
{
    fn length(&self, buf: &[u8], offset: usize) -> Result<usize, DecodeError> {
        self(buf, offset)
    }
}

/// Classifies the instruction at `offset` into a [`NodeKind`].
///
/// Checks are ordered from most to least specific: two-byte conditional jumps
/// first, then single-byte branch opcodes, and finally the opaque `Line`
/// fallback for everything the graph does not care about.
pub fn classify(buf: &[u8], offset: usize) -> Result<NodeKind, DecodeError> {
    let first = byte_at(buf, offset)?;

    if first == opcode::TWO_BYTE_ESCAPE
        && offset + 1 < buf.len()
        && opcode::is_long_jcc_suffix(buf[offset + 1])
    {
        return Ok(NodeKind::CondJump);
    }

    if opcode::is_short_jcc(first) {
        return Ok(NodeKind::CondJump);
    }

    if opcode::is_loop_class(first) {
        // Approximation: the loop-counter semantics are ignored and the
        // instruction is modeled as a plain two-way branch.
        warn!(
            "loop-class opcode {:#04x} at {:#x} treated as conditional jump",
            first, offset
        );
        return Ok(NodeKind::CondJump);
    }

    Ok(match first {
        opcode::JMP_REL8 | opcode::JMP_REL32 => NodeKind::Jump,
        opcode::RET_NEAR => NodeKind::Return,
        opcode::CALL_REL32 => NodeKind::Call,
        _ => NodeKind::Line,
    })
}

/// Computes the absolute target offset of the branch at `offset`.
///
/// Handles 1-byte and 4-byte two's-complement displacements. A target before
/// the buffer start wraps to a huge offset and is treated by the builder as
/// control leaving the analyzed region, mirroring how targets past the buffer
/// end are handled.
pub fn branch_target(buf: &[u8], offset: usize) -> Result<usize, DecodeError> {
    let first = byte_at(buf, offset)?;

    if first == opcode::TWO_BYTE_ESCAPE
        && offset + 1 < buf.len()
        && opcode::is_long_jcc_suffix(buf[offset + 1])
    {
        return relative(buf, offset, 2, 6);
    }

    if opcode::is_short_jcc(first) || opcode::is_loop_class(first) || first == opcode::JMP_REL8 {
        return relative(buf, offset, 1, 2);
    }

    if first == opcode::JMP_REL32 || first == opcode::CALL_REL32 {
        return relative(buf, offset, 1, 5);
    }

    Err(DecodeError::NotABranch(offset))
}

fn byte_at(buf: &[u8], offset: usize) -> Result<u8, DecodeError> {
    buf.get(offset).copied().ok_or(DecodeError::OutOfBounds {
        offset,
        len: buf.len(),
    })
}

/// Reads a displacement of `length - disp_at` bytes at `offset + disp_at` and
/// resolves it against the end of the instruction.
fn relative(
    buf: &[u8],
    offset: usize,
    disp_at: usize,
    length: usize,
) -> Result<usize, DecodeError> {
    let end = offset + length;
    if end > buf.len() {
        return Err(DecodeError::OutOfBounds {
            offset: end,
            len: buf.len(),
        });
    }

    let disp = match length - disp_at {
        1 => i64::from(buf[offset + disp_at] as i8),
        _ => {
            let mut raw = [0u8; 4];
            raw.copy_from_slice(&buf[offset + disp_at..end]);
            i64::from(i32::from_le_bytes(raw))
        }
    };

    Ok((end as i64 + disp) as usize)
}
