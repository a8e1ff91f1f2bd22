//! The recursive serialized-Var format used by save states.
//!
//! `{type_tag: u32}` then, per type: integer (4 bytes), real (4 bytes),
//! string (`len: u32` + bytes including the NUL terminator), or array
//! (`count: u32` + repeated `{NUL-terminated key, serialized Var}`).
//! Null has no payload.

use scriv_core::{Var, Variant, name_hash};

use crate::calcio::FormatError;

const TAG_NULL: u32 = 0x0000_0000;
const TAG_INT: u32 = 0x0100_0001;
const TAG_REAL: u32 = 0x0100_0002;
const TAG_STR: u32 = 0x0200_0000;
const TAG_ARRAY: u32 = 0x0000_0010;

/// Serialize a var. Bytes and label values have no persistent form and
/// degrade to null.
pub fn write_var(out: &mut Vec<u8>, var: &Var) {
    match var.get() {
        Variant::Null | Variant::Bytes(_) | Variant::Label { .. } => {
            out.extend_from_slice(&TAG_NULL.to_ne_bytes());
        }
        Variant::Int(v) => {
            out.extend_from_slice(&TAG_INT.to_ne_bytes());
            out.extend_from_slice(&v.to_ne_bytes());
        }
        Variant::Real(v) => {
            out.extend_from_slice(&TAG_REAL.to_ne_bytes());
            out.extend_from_slice(&v.to_ne_bytes());
        }
        Variant::Str(s) => {
            out.extend_from_slice(&TAG_STR.to_ne_bytes());
            out.extend_from_slice(&(s.len() as u32 + 1).to_ne_bytes());
            out.extend_from_slice(s.as_bytes());
            out.push(0);
        }
        Variant::Array(arr) => {
            out.extend_from_slice(&TAG_ARRAY.to_ne_bytes());
            let entries = arr.snapshot();
            out.extend_from_slice(&(entries.len() as u32).to_ne_bytes());
            for (_, name, var) in entries {
                out.extend_from_slice(name.as_bytes());
                out.push(0);
                write_var(out, &var);
            }
        }
    }
}

/// Deserialize one var, returning it and the bytes consumed.
pub fn read_var(src: &[u8]) -> Result<(Var, usize), FormatError> {
    let var = Var::new();
    let used = read_into(src, &var)?;
    Ok((var, used))
}

/// Deserialize into an existing cell, returning the bytes consumed.
pub fn read_into(src: &[u8], var: &Var) -> Result<usize, FormatError> {
    let mut at = 0;
    let tag = take_u32(src, &mut at)?;
    match tag {
        TAG_NULL => var.set(Variant::Null),
        TAG_INT => {
            let v = take_u32(src, &mut at)? as i32;
            var.set_int(v);
        }
        TAG_REAL => {
            let v = f32::from_ne_bytes(take_u32(src, &mut at)?.to_ne_bytes());
            var.set_real(v);
        }
        TAG_STR => {
            let len = take_u32(src, &mut at)? as usize;
            let bytes = src.get(at..at + len).ok_or(FormatError::Truncated(at))?;
            let text = match bytes.split_last() {
                Some((0, rest)) => rest,
                _ => bytes,
            };
            let text = std::str::from_utf8(text).map_err(|_| FormatError::BadText)?;
            var.set_str(text);
            at += len;
        }
        TAG_ARRAY => {
            let count = take_u32(src, &mut at)? as usize;
            var.set(Variant::Null);
            let arr = var.array_for_write();
            for _ in 0..count {
                let rest = src.get(at..).ok_or(FormatError::Truncated(at))?;
                let nul = rest
                    .iter()
                    .position(|&b| b == 0)
                    .ok_or(FormatError::Truncated(at))?;
                let name =
                    std::str::from_utf8(&rest[..nul]).map_err(|_| FormatError::BadText)?;
                let name = name.to_owned();
                at += nul + 1;

                let child = Var::new();
                let rest = src.get(at..).ok_or(FormatError::Truncated(at))?;
                at += read_into(rest, &child)?;
                arr.insert(name_hash(&name), &name, child);
            }
        }
        other => return Err(FormatError::BadTag(other)),
    }
    Ok(at)
}

fn take_u32(src: &[u8], at: &mut usize) -> Result<u32, FormatError> {
    let bytes = src.get(*at..*at + 4).ok_or(FormatError::Truncated(*at))?;
    *at += 4;
    Ok(u32::from_ne_bytes(bytes.try_into().unwrap()))
}
