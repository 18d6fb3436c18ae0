use crate::error::{TileError, TileResult};

pub const B3DM_MAGIC: [u8; 4] = *b"b3dm";
pub const I3DM_MAGIC: [u8; 4] = *b"i3dm";
pub const PNTS_MAGIC: [u8; 4] = *b"pnts";
pub const CMPT_MAGIC: [u8; 4] = *b"cmpt";

/// Closed set of tile sub-formats the pipeline understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TileFormat {
    /// UTF-8 tileset manifest.
    Json,
    /// Batched model (`b3dm`).
    Batched,
    /// Instanced model (`i3dm`).
    Instanced,
    /// Point cloud (`pnts`).
    PointCloud,
    /// Composite of nested tiles (`cmpt`).
    Composite,
}

impl TileFormat {
    /// Classify a raw buffer by its head bytes.
    ///
    /// A leading `{`, space, or `<` means UTF-8 text and is parsed as a JSON
    /// manifest downstream. Anything else must carry one of the four known
    /// 4-byte ASCII magic tokens; unknown magic is fatal for the tile.
    pub fn sniff(buffer: &[u8]) -> TileResult<TileFormat> {
        let first = *buffer.first().ok_or(TileError::Truncated("empty buffer"))?;
        if first == b'{' || first == b' ' || first == b'<' {
            return Ok(TileFormat::Json);
        }

        if buffer.len() < 4 {
            return Err(TileError::Truncated("magic token"));
        }
        let magic = [buffer[0], buffer[1], buffer[2], buffer[3]];
        match magic {
            B3DM_MAGIC => Ok(TileFormat::Batched),
            I3DM_MAGIC => Ok(TileFormat::Instanced),
            PNTS_MAGIC => Ok(TileFormat::PointCloud),
            CMPT_MAGIC => Ok(TileFormat::Composite),
            other => Err(TileError::UnrecognizedFormat(other)),
        }
    }

    /// The wire tag carried on decoded content.
    pub fn magic(self) -> &'static str {
        match self {
            TileFormat::Json => "json",
            TileFormat::Batched => "b3dm",
            TileFormat::Instanced => "i3dm",
            TileFormat::PointCloud => "pnts",
            TileFormat::Composite => "cmpt",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniffs_binary_magic() {
        assert_eq!(TileFormat::sniff(b"b3dm\x01\x00").unwrap(), TileFormat::Batched);
        assert_eq!(TileFormat::sniff(b"i3dm").unwrap(), TileFormat::Instanced);
        assert_eq!(TileFormat::sniff(b"pnts").unwrap(), TileFormat::PointCloud);
        assert_eq!(TileFormat::sniff(b"cmpt").unwrap(), TileFormat::Composite);
    }

    #[test]
    fn sniffs_text_heads_as_json() {
        assert_eq!(TileFormat::sniff(b"{\"asset\":{}}").unwrap(), TileFormat::Json);
        assert_eq!(TileFormat::sniff(b"  {}").unwrap(), TileFormat::Json);
        assert_eq!(TileFormat::sniff(b"<xml/>").unwrap(), TileFormat::Json);
    }

    #[test]
    fn unknown_magic_is_fatal() {
        match TileFormat::sniff(b"glTF") {
            Err(TileError::UnrecognizedFormat(m)) => assert_eq!(&m, b"glTF"),
            other => panic!("expected UnrecognizedFormat, got {other:?}"),
        }
    }

    #[test]
    fn empty_buffer_is_truncated() {
        assert!(matches!(TileFormat::sniff(b""), Err(TileError::Truncated(_))));
    }
}
