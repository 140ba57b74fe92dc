//! x86 opcode constants and range helpers used for branch classification.
//!
//! Only the opcodes that transfer control are named here; everything else is
//! treated as an opaque "line" instruction whose length comes from the
//! external length decoder.

/// Short unconditional jump, 8-bit displacement.
pub const JMP_REL8: u8 = 0xEB;
/// Long unconditional jump, 32-bit displacement.
pub const JMP_REL32: u8 = 0xE9;
/// Near call, 32-bit displacement.
pub const CALL_REL32: u8 = 0xE8;
/// Near return.
pub const RET_NEAR: u8 = 0xC3;
/// Single-byte no-op, used by the NOP-padding layout.
pub const NOP: u8 = 0x90;
/// First byte of the two-byte opcode escape.
pub const TWO_BYTE_ESCAPE: u8 = 0x0F;

/// Placeholder written into displacement slots that have not been patched.
/// An int3 pattern, so unpatched output traps instead of looking valid.
pub const UNPATCHED: u8 = 0xCC;

/// Short conditional jump (`7x`, 8-bit displacement).
pub fn is_short_jcc(byte: u8) -> bool {
    (0x70..=0x7F).contains(&byte)
}

/// Second byte of a long conditional jump (`0F 8x`, 32-bit displacement).
pub fn is_long_jcc_suffix(byte: u8) -> bool {
    (0x80..=0x8F).contains(&byte)
}

/// LOOPNZ/LOOPZ/LOOP/JCXZ, all with 8-bit displacements.
pub fn is_loop_class(byte: u8) -> bool {
    (0xE0..=0xE3).contains(&byte)
}
