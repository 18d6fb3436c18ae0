//! Model-parser collaborator boundary.
//!
//! The low-level model (glTF-style) parser is external to this crate: it
//! turns a binary chunk into a mesh graph. The pipeline hands it the tile
//! buffer and the byte offset of the embedded model payload and gets back
//! primitives with attribute views plus an optional parser-side feature
//! table (tile-level tables take precedence when both exist).

use async_trait::async_trait;

use crate::error::TileResult;
use crate::feature_table::FeatureTable;
use crate::mesh::MeshData;

/// Per-source knobs forwarded to the parser.
#[derive(Debug, Clone, Default)]
pub struct ParseOptions {
    /// Largest texture edge the parser should decode; larger images are
    /// downsampled on its side of the boundary.
    pub max_texture_size: Option<u32>,
}

/// Parser output. Pool buffer ids are parser-local; the pipeline re-tags
/// them with request-scoped identities before any identity-keyed step runs.
#[derive(Debug, Default)]
pub struct ParsedModel {
    pub mesh: MeshData,
    pub feature_table: Option<FeatureTable>,
}

#[async_trait]
pub trait ModelParser: Send + Sync {
    async fn parse(
        &self,
        buffer: &[u8],
        byte_offset: usize,
        options: &ParseOptions,
    ) -> TileResult<ParsedModel>;
}
