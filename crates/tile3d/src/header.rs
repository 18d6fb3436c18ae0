//! Fixed tile headers and section slicing.
//!
//! All three terminal binary formats share the same little-endian prefix:
//!
//! ```text
//!   00 : [u8;4] magic
//!   04 : u32    version (must be 1)
//!   08 : u32    byteLength (whole tile, header included)
//!   0C : u32    featureTableJSONByteLength
//!   10 : u32    featureTableBinaryByteLength
//!   14 : u32    batchTableJSONByteLength
//!   18 : u32    batchTableBinaryByteLength
//! ```
//!
//! `i3dm` appends one extra field:
//!
//! ```text
//!   1C : u32    gltfFormat (0 = URI string payload, 1 = embedded GLB)
//! ```
//!
//! Everything after the tables is the model payload (GLB for b3dm/i3dm,
//! nothing for pnts).

use crate::error::{TileError, TileResult};
use crate::format::TileFormat;

pub const TILE_HEADER_LEN: usize = 28;
pub const I3DM_HEADER_LEN: usize = 32;

#[inline(always)]
fn need(buf: &[u8], want: usize, what: &'static str) -> TileResult<()> {
    if buf.len() < want {
        Err(TileError::Truncated(what))
    } else {
        Ok(())
    }
}

#[inline(always)]
pub(crate) fn take<'a>(buf: &mut &'a [u8], n: usize, what: &'static str) -> TileResult<&'a [u8]> {
    need(buf, n, what)?;
    let (head, tail) = buf.split_at(n);
    *buf = tail;
    Ok(head)
}

#[inline(always)]
pub(crate) fn le_u32(buf: &mut &[u8], what: &'static str) -> TileResult<u32> {
    let b = take(buf, 4, what)?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

/// Parsed fixed header, format-independent part.
#[derive(Debug, Clone, Copy)]
pub struct TileHeader {
    pub version: u32,
    pub byte_length: u32,
    pub ft_json_len: u32,
    pub ft_bin_len: u32,
    pub bt_json_len: u32,
    pub bt_bin_len: u32,
    /// Only set for i3dm.
    pub gltf_format: Option<u32>,
}

/// Borrowed view of one tile's sections.
#[derive(Debug)]
pub struct TileBody<'a> {
    pub header: TileHeader,
    pub feature_json: &'a [u8],
    pub feature_bin: &'a [u8],
    pub batch_json: &'a [u8],
    pub batch_bin: &'a [u8],
    /// Model payload after the tables.
    pub payload: &'a [u8],
    /// Byte offset of `payload` within the tile buffer, for collaborators
    /// that parse from the original buffer.
    pub payload_offset: usize,
}

/// Split a binary tile buffer into its header-declared sections.
///
/// The expected magic must already have been established by the sniffer;
/// this re-checks it and validates version and section bounds.
pub fn split_tile(buffer: &[u8], format: TileFormat) -> TileResult<TileBody<'_>> {
    let (magic, name, header_len) = match format {
        TileFormat::Batched => (crate::format::B3DM_MAGIC, "b3dm", TILE_HEADER_LEN),
        TileFormat::Instanced => (crate::format::I3DM_MAGIC, "i3dm", I3DM_HEADER_LEN),
        TileFormat::PointCloud => (crate::format::PNTS_MAGIC, "pnts", TILE_HEADER_LEN),
        _ => return Err(TileError::Truncated("not a terminal binary tile")),
    };

    let mut p = buffer;
    let head = take(&mut p, 4, "magic")?;
    if head != magic {
        let mut m = [0u8; 4];
        m.copy_from_slice(head);
        return Err(TileError::UnrecognizedFormat(m));
    }

    let version = le_u32(&mut p, "version")?;
    if version != 1 {
        return Err(TileError::BadVersion { format: name, version });
    }

    let byte_length = le_u32(&mut p, "byteLength")?;
    let ft_json_len = le_u32(&mut p, "featureTableJSONByteLength")?;
    let ft_bin_len = le_u32(&mut p, "featureTableBinaryByteLength")?;
    let bt_json_len = le_u32(&mut p, "batchTableJSONByteLength")?;
    let bt_bin_len = le_u32(&mut p, "batchTableBinaryByteLength")?;
    let gltf_format = if format == TileFormat::Instanced {
        Some(le_u32(&mut p, "gltfFormat")?)
    } else {
        None
    };

    let total = byte_length as usize;
    if total > buffer.len() || total < header_len {
        return Err(TileError::Truncated("declared byteLength"));
    }

    let mut offset = header_len;
    let feature_json = section(buffer, total, &mut offset, ft_json_len, "feature table JSON")?;
    let feature_bin = section(buffer, total, &mut offset, ft_bin_len, "feature table binary")?;
    let batch_json = section(buffer, total, &mut offset, bt_json_len, "batch table JSON")?;
    let batch_bin = section(buffer, total, &mut offset, bt_bin_len, "batch table binary")?;
    let payload = &buffer[offset..total];

    Ok(TileBody {
        header: TileHeader {
            version,
            byte_length,
            ft_json_len,
            ft_bin_len,
            bt_json_len,
            bt_bin_len,
            gltf_format,
        },
        feature_json,
        feature_bin,
        batch_json,
        batch_bin,
        payload,
        payload_offset: offset,
    })
}

fn section<'a>(
    buffer: &'a [u8],
    total: usize,
    offset: &mut usize,
    len: u32,
    what: &'static str,
) -> TileResult<&'a [u8]> {
    let end = offset
        .checked_add(len as usize)
        .ok_or(TileError::Truncated(what))?;
    if end > total {
        return Err(TileError::Truncated(what));
    }
    let s = &buffer[*offset..end];
    *offset = end;
    Ok(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tile(magic: &[u8; 4], sections: [&[u8]; 4], payload: &[u8], gltf_format: Option<u32>) -> Vec<u8> {
        let header_len = if gltf_format.is_some() { I3DM_HEADER_LEN } else { TILE_HEADER_LEN };
        let total = header_len
            + sections.iter().map(|s| s.len()).sum::<usize>()
            + payload.len();
        let mut out = Vec::with_capacity(total);
        out.extend_from_slice(magic);
        out.extend_from_slice(&1u32.to_le_bytes());
        out.extend_from_slice(&(total as u32).to_le_bytes());
        for s in &sections {
            out.extend_from_slice(&(s.len() as u32).to_le_bytes());
        }
        if let Some(f) = gltf_format {
            out.extend_from_slice(&f.to_le_bytes());
        }
        for s in &sections {
            out.extend_from_slice(s);
        }
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn splits_sections_in_order() {
        let buf = tile(b"b3dm", [b"{\"a\":1}", b"\x01\x02", b"{}", b"\x03"], b"GLB!", None);
        let body = split_tile(&buf, TileFormat::Batched).unwrap();
        assert_eq!(body.feature_json, b"{\"a\":1}");
        assert_eq!(body.feature_bin, b"\x01\x02");
        assert_eq!(body.batch_json, b"{}");
        assert_eq!(body.batch_bin, b"\x03");
        assert_eq!(body.payload, b"GLB!");
        assert_eq!(body.payload_offset, buf.len() - 4);
    }

    #[test]
    fn i3dm_carries_gltf_format() {
        let buf = tile(b"i3dm", [b"", b"", b"", b""], b"model.glb\0", Some(0));
        let body = split_tile(&buf, TileFormat::Instanced).unwrap();
        assert_eq!(body.header.gltf_format, Some(0));
        assert_eq!(body.payload, b"model.glb\0");
    }

    #[test]
    fn rejects_bad_version() {
        let mut buf = tile(b"pnts", [b"", b"", b"", b""], b"", None);
        buf[4] = 2;
        assert!(matches!(
            split_tile(&buf, TileFormat::PointCloud),
            Err(TileError::BadVersion { format: "pnts", version: 2 })
        ));
    }

    #[test]
    fn rejects_overlong_sections() {
        let mut buf = tile(b"b3dm", [b"{}", b"", b"", b""], b"", None);
        // Claim a feature-table JSON longer than the tile itself.
        buf[12..16].copy_from_slice(&1000u32.to_le_bytes());
        assert!(matches!(
            split_tile(&buf, TileFormat::Batched),
            Err(TileError::Truncated(_))
        ));
    }
}
