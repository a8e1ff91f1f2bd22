//! Reader and writer for self-describing calc blobs.
//!
//! A blob is a sequence of u32 opcodes; `Push` is followed by a value
//! header `{type: u32, size: u32}` and `size` payload bytes. Multi-byte
//! words are host-endian (the Program header's endian tag guards loads).

use crate::opcode::{CalcOp, ValueTag, VarOp};

/// Malformed calc blob.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    #[error("calc blob truncated at offset {0}")]
    Truncated(usize),
    #[error("unknown calc opcode {0:#x}")]
    BadOp(u32),
    #[error("unknown value tag {0:#x}")]
    BadTag(u32),
    #[error("unknown variable op {0:#x}")]
    BadVarOp(u32),
    #[error("value payload is not valid UTF-8")]
    BadText,
}

/// A decoded push value: tag plus raw payload bytes.
#[derive(Clone, Copy, Debug)]
pub struct RawValue<'a> {
    pub tag: ValueTag,
    pub payload: &'a [u8],
}

impl<'a> RawValue<'a> {
    /// Payload as a NUL-terminated string (LitStr payloads).
    pub fn text(&self) -> Result<&'a str, FormatError> {
        let bytes = match self.payload.split_last() {
            Some((0, rest)) => rest,
            _ => self.payload,
        };
        std::str::from_utf8(bytes).map_err(|_| FormatError::BadText)
    }
}

/// Cursor over a calc blob.
#[derive(Clone, Debug)]
pub struct CalcCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> CalcCursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    #[inline]
    pub fn pos(&self) -> usize {
        self.pos
    }

    #[inline]
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    pub fn read_u32(&mut self) -> Result<u32, FormatError> {
        let end = self.pos + 4;
        let bytes = self
            .data
            .get(self.pos..end)
            .ok_or(FormatError::Truncated(self.pos))?;
        self.pos = end;
        Ok(u32::from_ne_bytes(bytes.try_into().unwrap()))
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], FormatError> {
        let end = self.pos + len;
        let bytes = self
            .data
            .get(self.pos..end)
            .ok_or(FormatError::Truncated(self.pos))?;
        self.pos = end;
        Ok(bytes)
    }

    pub fn next_op(&mut self) -> Result<CalcOp, FormatError> {
        let raw = self.read_u32()?;
        CalcOp::from_u32(raw).ok_or(FormatError::BadOp(raw))
    }

    pub fn peek_op(&self) -> Result<CalcOp, FormatError> {
        self.clone().next_op()
    }

    /// Read the value header and payload following a `Push` op.
    pub fn read_value(&mut self) -> Result<RawValue<'a>, FormatError> {
        let raw_tag = self.read_u32()?;
        let tag = ValueTag::from_u32(raw_tag).ok_or(FormatError::BadTag(raw_tag))?;
        let size = self.read_u32()? as usize;
        let payload = self.read_bytes(size)?;
        Ok(RawValue { tag, payload })
    }

    pub fn next_var_op(&mut self) -> Result<VarOp, FormatError> {
        let raw = self.read_u32()?;
        VarOp::from_u32(raw).ok_or(FormatError::BadVarOp(raw))
    }

    /// Read the `{hash, NUL-terminated name}` payload of a Hash var op.
    pub fn read_hash_ref(&mut self) -> Result<(u32, &'a str), FormatError> {
        let hash = self.read_u32()?;
        let rest = &self.data[self.pos..];
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(FormatError::Truncated(self.pos))?;
        let name = std::str::from_utf8(&rest[..nul]).map_err(|_| FormatError::BadText)?;
        self.pos += nul + 1;
        Ok((hash, name))
    }

    /// Read the size-prefixed sub-blob of a Calc var op.
    pub fn read_sub_blob(&mut self) -> Result<&'a [u8], FormatError> {
        let size = self.read_u32()? as usize;
        self.read_bytes(size)
    }
}

/// Append an opcode word.
pub fn write_op(out: &mut Vec<u8>, op: CalcOp) {
    out.extend_from_slice(&(op as u32).to_ne_bytes());
}

/// Append `Push` + value header + payload. Returns the offset of the
/// value header (tag field) for later patching.
pub fn write_value(out: &mut Vec<u8>, tag: ValueTag, payload: &[u8]) -> usize {
    write_op(out, CalcOp::Push);
    let header = out.len();
    out.extend_from_slice(&tag.to_u32().to_ne_bytes());
    out.extend_from_slice(&(payload.len() as u32).to_ne_bytes());
    out.extend_from_slice(payload);
    header
}

/// Append a variable-chain opcode word.
pub fn write_var_op(out: &mut Vec<u8>, op: VarOp) {
    out.extend_from_slice(&(op as u32).to_ne_bytes());
}

/// Patch the size field of a value header written by [`write_value`].
pub fn set_value_size(out: &mut [u8], header: usize, size: u32) {
    out[header + 4..header + 8].copy_from_slice(&size.to_ne_bytes());
}

pub fn value_size(out: &[u8], header: usize) -> u32 {
    u32::from_ne_bytes(out[header + 4..header + 8].try_into().unwrap())
}

/// Patch the tag field of a value header written by [`write_value`].
pub fn set_value_tag(out: &mut [u8], header: usize, tag: ValueTag) {
    out[header..header + 4].copy_from_slice(&tag.to_u32().to_ne_bytes());
}

/// Count push values in a blob, skipping payloads.
pub fn count_values(blob: &[u8]) -> Result<usize, FormatError> {
    let mut cursor = CalcCursor::new(blob);
    let mut count = 0;
    loop {
        match cursor.next_op()? {
            CalcOp::End => return Ok(count),
            CalcOp::Push => {
                cursor.read_value()?;
                count += 1;
            }
            _ => {}
        }
    }
}

/// True when the blob is exactly one pushed variable reference, the shape
/// required for by-reference arguments.
pub fn is_single_var(blob: &[u8]) -> Result<bool, FormatError> {
    if count_values(blob)? != 1 {
        return Ok(false);
    }
    let mut cursor = CalcCursor::new(blob);
    if cursor.next_op()? != CalcOp::Push {
        return Ok(false);
    }
    Ok(cursor.read_value()?.tag.is_var())
}
