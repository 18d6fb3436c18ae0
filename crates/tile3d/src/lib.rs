//! Tile-content decoding and coordinate reprojection for binary 3D
//! geospatial tiles.
//!
//! Given a raw tile buffer this crate identifies the sub-format, decodes it
//! into mesh/feature data (delegating glTF-style model parsing to an
//! external collaborator), computes a numerically safe local origin, and
//! rewrites every vertex from the global double-precision earth-fixed frame
//! into a single-precision, map-projected, locally-offset frame a real-time
//! renderer can consume.
//!
//! Recognized buffers (little-endian):
//!
//! - `b3dm`: batched model. Fixed header, feature/batch tables, embedded
//!   GLB; vertices are reprojected to map units around a per-tile center,
//!   or rebased in model space when primitives share position buffers.
//! - `i3dm`: instanced model. Per-instance translations from the feature
//!   table, embedded or URI-referenced GLB, optional synthesized
//!   east-north-up orientation.
//! - `pnts`: point cloud. Positions (plain or quantized) and colors from
//!   the feature table.
//! - `cmpt`: composite. Self-describing nested tiles, unpacked through an
//!   explicit work list to unbounded depth.
//! - buffers starting with `{`, space, or `<`: a JSON tileset manifest.
//!
//! The map projection itself, the model parser, and the network fetch layer
//! are consumed through traits ([`Projection`], [`ModelParser`], [`Fetch`]);
//! this crate owns everything between the raw bytes and the renderer-ready
//! buffers.

mod bounds;
mod center;
mod composite;
mod error;
mod feature_table;
mod fetch;
mod format;
mod geodesy;
mod header;
mod instanced;
mod mesh;
mod parse;
mod pipeline;
mod project;
mod texture;
mod transform;

pub use bounds::{Aabb, BoundingAccumulator};
pub use center::{model_center, model_frame_center, node_up_matrix};
pub use composite::split_composite;
pub use error::{TileError, TileResult};
pub use feature_table::FeatureTable;
pub use fetch::{AbortHandle, Fetch, FetchFuture, FetchJob, FetchOptions, FetchResponse};
pub use format::{TileFormat, B3DM_MAGIC, CMPT_MAGIC, I3DM_MAGIC, PNTS_MAGIC};
pub use geodesy::{ecef_to_geodetic, enu_basis, geodetic_to_ecef, wgs84, Geodetic};
pub use header::{split_tile, TileBody, TileHeader, I3DM_HEADER_LEN, TILE_HEADER_LEN};
pub use instanced::{rebase_instances, InstancedTile};
pub use mesh::{
    AttrBuffer, AttrData, AttributeRef, BufferId, BufferIdGen, MeshData, Primitive, Quantization,
    TextureData, TransferEntry, TransferList, UpAxis,
};
pub use parse::{ModelParser, ParseOptions, ParsedModel};
pub use pipeline::{
    decode_tile, BatchedContent, Collaborators, ContentKind, DecodeParams, InstancedContent,
    PointCloudContent, TileContent,
};
pub use project::{projected_point, Projection, WebMercator};
pub use texture::{flatten_texture, flatten_textures};
pub use transform::{
    detect_shared_positions, project_mesh, rebase_mesh, select_mode, ProjectedTile, RebasedTile,
    TransformMode,
};
