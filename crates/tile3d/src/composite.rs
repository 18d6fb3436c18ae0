//! Composite (`cmpt`) container splitting.
//!
//! ```text
//!   00 : [u8;4] magic = "cmpt"
//!   04 : u32    version (must be 1)
//!   08 : u32    byteLength
//!   0C : u32    tilesLength
//!   10 : inner tiles, each self-describing (own magic, byteLength at +8)
//! ```
//!
//! Splitting is non-recursive; the pipeline drives nested composites through
//! an explicit work list so arbitrarily deep nesting never grows the call
//! stack.

use crate::error::{TileError, TileResult};
use crate::format::CMPT_MAGIC;
use crate::header::{le_u32, take};

pub const CMPT_HEADER_LEN: usize = 16;

/// Slice a composite buffer into its immediate children, in stored order.
pub fn split_composite(buffer: &[u8]) -> TileResult<Vec<&[u8]>> {
    let mut p = buffer;
    if take(&mut p, 4, "cmpt magic")? != CMPT_MAGIC {
        return Err(TileError::Truncated("cmpt magic"));
    }
    let version = le_u32(&mut p, "cmpt version")?;
    if version != 1 {
        return Err(TileError::BadVersion { format: "cmpt", version });
    }
    let byte_length = le_u32(&mut p, "cmpt byteLength")? as usize;
    let tiles_length = le_u32(&mut p, "cmpt tilesLength")? as usize;

    if byte_length > buffer.len() || byte_length < CMPT_HEADER_LEN {
        return Err(TileError::Truncated("cmpt byteLength"));
    }

    let mut children = Vec::with_capacity(tiles_length);
    let mut offset = CMPT_HEADER_LEN;
    for _ in 0..tiles_length {
        if offset + 12 > byte_length {
            return Err(TileError::Truncated("inner tile header"));
        }
        let len_bytes = &buffer[offset + 8..offset + 12];
        let inner_len =
            u32::from_le_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]]) as usize;
        if inner_len < 12 || offset + inner_len > byte_length {
            return Err(TileError::Truncated("inner tile byteLength"));
        }
        children.push(&buffer[offset..offset + inner_len]);
        offset += inner_len;
    }

    Ok(children)
}

#[cfg(test)]
pub(crate) fn wrap_composite(children: &[Vec<u8>]) -> Vec<u8> {
    let total = CMPT_HEADER_LEN + children.iter().map(Vec::len).sum::<usize>();
    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(&CMPT_MAGIC);
    out.extend_from_slice(&1u32.to_le_bytes());
    out.extend_from_slice(&(total as u32).to_le_bytes());
    out.extend_from_slice(&(children.len() as u32).to_le_bytes());
    for child in children {
        out.extend_from_slice(child);
    }
    out
}
