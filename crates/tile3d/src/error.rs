use thiserror::Error;

/// Failures surfaced by the tile decode pipeline.
///
/// Empty geometry is deliberately *not* an error: a tile with zero
/// contributing vertices resolves its bounding box and centers to zero and
/// decodes normally.
#[derive(Debug, Error)]
pub enum TileError {
    /// The buffer head matched none of the known magic tokens. Fatal for the
    /// tile; callers must not retry.
    #[error("unrecognized tile magic {:?}", String::from_utf8_lossy(.0))]
    UnrecognizedFormat([u8; 4]),

    /// The buffer ended before a declared section did.
    #[error("truncated tile payload: {0}")]
    Truncated(&'static str),

    #[error("unsupported {format} version {version}")]
    BadVersion { format: &'static str, version: u32 },

    /// Manifest or feature/batch-table JSON failed to parse. Propagated to
    /// the caller un-recovered; manifest correctness is an upstream contract.
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A feature-table or header field is inconsistent with its payload.
    #[error("malformed tile field: {0}")]
    Malformed(&'static str),

    /// The model-parser collaborator rejected its payload.
    #[error("model parse failed: {0}")]
    Parse(String),

    #[error("network failure{}: {message}", .status.map(|s| format!(" (status {s})")).unwrap_or_default())]
    Network { status: Option<u16>, message: String },

    /// The in-flight request was aborted. Not a failure; pending work ends
    /// with no result delivered.
    #[error("request aborted")]
    Aborted,

    /// The source decoded but carried nothing usable (no meshes, no
    /// positions). Surfaces as a not-found-like signal, never a crash.
    #[error("no usable content in tile")]
    NoContent,
}

impl TileError {
    /// True for outcomes the host should treat as "tile does not exist"
    /// rather than a decode failure.
    pub fn is_not_found(&self) -> bool {
        match self {
            TileError::NoContent => true,
            TileError::Network { status: Some(404), .. } => true,
            _ => false,
        }
    }
}

pub type TileResult<T> = Result<T, TileError>;
