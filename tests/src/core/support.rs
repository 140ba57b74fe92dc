//! Shared fixtures: a length decoder for the instruction subset the tests
//! use, and a path tracer for semantic-equivalence checks.

use codegraph_core::LengthDecoder;
use codegraph_utils::errors::DecodeError;
use std::collections::BTreeSet;

/// Length decoder covering the opcode subset used by the fixtures: one-byte
/// lines, `lea esp,[esp+4]`, and every branch form the classifier knows.
#[derive(Debug)]
pub(crate) struct ByteLde;

impl LengthDecoder for ByteLde {
    fn length(&self, buf: &[u8], offset: usize) -> Result<usize, DecodeError> {
        let byte = *buf.get(offset).ok_or(DecodeError::OutOfBounds {
            offset,
            len: buf.len(),
        })?;
        Ok(match byte {
            0x0F => 6,
            0x70..=0x7F | 0xE0..=0xE3 | 0xEB => 2,
            0xE8 | 0xE9 => 5,
            0x8D => 4,
            _ => 1,
        })
    }
}

/// Collects the opcode-token sequence of every control path through `buf`
/// starting at offset 0.
///
/// Unconditional jumps and NOPs are glue and contribute no token; lines,
/// returns, calls and the condition code of every conditional branch do.
/// Only suitable for acyclic programs.
pub(crate) fn control_paths(buf: &[u8]) -> BTreeSet<Vec<String>> {
    let mut paths = BTreeSet::new();
    walk(buf, 0, Vec::new(), Vec::new(), &mut paths);
    paths
}

fn walk(
    buf: &[u8],
    mut offset: usize,
    mut returns: Vec<usize>,
    mut path: Vec<String>,
    paths: &mut BTreeSet<Vec<String>>,
) {
    let mut steps = 0;
    loop {
        steps += 1;
        assert!(steps < 1_000, "path tracer did not terminate");

        let byte = buf[offset];

        if byte == 0x0F && (0x80..=0x8F).contains(&buf[offset + 1]) {
            path.push(format!("jcc{:x}", buf[offset + 1] & 0x0F));
            walk(buf, rel32(buf, offset, 2), returns.clone(), path.clone(), paths);
            offset += 6;
            continue;
        }
        if (0x70..=0x7F).contains(&byte) {
            path.push(format!("jcc{:x}", byte & 0x0F));
            walk(buf, rel8(buf, offset, 2), returns.clone(), path.clone(), paths);
            offset += 2;
            continue;
        }

        match byte {
            0xEB => offset = rel8(buf, offset, 2),
            0xE9 => offset = rel32(buf, offset, 1),
            0xE8 => {
                returns.push(offset + 5);
                path.push("call".to_owned());
                offset = rel32(buf, offset, 1);
            }
            0xC3 => {
                path.push("ret".to_owned());
                match returns.pop() {
                    Some(site) => offset = site,
                    None => {
                        paths.insert(path);
                        return;
                    }
                }
            }
            0x90 => offset += 1,
            0x8D => {
                path.push("lea".to_owned());
                offset += 4;
            }
            other => {
                path.push(format!("{other:02x}"));
                offset += 1;
            }
        }
    }
}

fn rel8(buf: &[u8], offset: usize, length: usize) -> usize {
    let disp = i64::from(buf[offset + length - 1] as i8);
    ((offset + length) as i64 + disp) as usize
}

fn rel32(buf: &[u8], offset: usize, disp_at: usize) -> usize {
    let length = disp_at + 4;
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&buf[offset + disp_at..offset + length]);
    let disp = i64::from(i32::from_le_bytes(raw));
    ((offset + length) as i64 + disp) as usize
}
