//! Tile decode pipeline: format dispatch, terminal loaders, and output
//! assembly.
//!
//! Control flow per tile: sniff → composite work list or one of the three
//! terminal loaders → center calculation → coordinate transform → texture
//! flattening → content + transfer list. Each tile decodes atomically from
//! the host's point of view: content and buffers are delivered together or
//! not at all.

use glam::{DMat4, DVec3};
use serde_json::Value;

use crate::bounds::Aabb;
use crate::composite::split_composite;
use crate::error::{TileError, TileResult};
use crate::feature_table::{trim_padding, FeatureTable};
use crate::fetch::{Fetch, FetchOptions};
use crate::format::TileFormat;
use crate::geodesy::Geodetic;
use crate::header::split_tile;
use crate::instanced::rebase_instances;
use crate::mesh::{
    AttrData, AttributeRef, BufferIdGen, MeshData, Primitive, Quantization, TransferList, UpAxis,
};
use crate::parse::{ModelParser, ParseOptions};
use crate::project::Projection;
use crate::texture::flatten_textures;
use crate::transform::{project_mesh, rebase_mesh, select_mode, TransformMode};

/// Immutable per-request decode parameters.
#[derive(Debug, Clone, Default)]
pub struct DecodeParams {
    /// Which tile source this request belongs to.
    pub root_index: usize,
    pub up_axis: UpAxis,
    pub external_transform: Option<DMat4>,
    pub parse_options: ParseOptions,
    /// Options for payload sub-fetches (external i3dm glTF).
    pub fetch_options: FetchOptions,
}

/// External collaborators consumed by the pipeline.
pub struct Collaborators<'a> {
    pub parser: &'a dyn ModelParser,
    pub projection: &'a dyn Projection,
    /// Required only for i3dm tiles whose glTF payload is a URI.
    pub fetcher: Option<&'a dyn Fetch>,
}

#[derive(Debug)]
pub struct TileContent {
    /// Wire tag of the decoded sub-format.
    pub format: TileFormat,
    pub root_index: usize,
    pub kind: ContentKind,
}

#[derive(Debug)]
pub enum ContentKind {
    /// A tileset manifest; geometry-free.
    Manifest(Value),
    Batched(BatchedContent),
    Instanced(InstancedContent),
    PointCloud(PointCloudContent),
    /// Leaf contents of a composite, in original order, nesting flattened.
    Composite(Vec<TileContent>),
}

#[derive(Debug)]
pub struct BatchedContent {
    pub mesh: MeshData,
    pub feature_table: FeatureTable,
    pub batch_table: Option<Value>,
    /// Earth-fixed double-precision center chosen for this tile.
    pub rtc_center: DVec3,
    pub rtc_coord: Geodetic,
    /// Map-unit center, present in projected mode only.
    pub proj_center: Option<DVec3>,
    /// True when vertices stayed in the modeling frame (shared positions);
    /// the renderer applies the projection transform at draw time.
    pub model_space: bool,
    pub bounds: Aabb,
}

#[derive(Debug)]
pub struct InstancedContent {
    pub instances: MeshData,
    /// The instanced model mesh, when the payload was available.
    pub model: Option<MeshData>,
    pub model_uri: Option<String>,
    pub feature_table: FeatureTable,
    pub batch_table: Option<Value>,
    pub rtc_center: DVec3,
    pub rtc_coord: Geodetic,
    pub bounds: Aabb,
}

#[derive(Debug)]
pub struct PointCloudContent {
    pub points: MeshData,
    pub feature_table: FeatureTable,
    pub batch_table: Option<Value>,
    pub rtc_center: DVec3,
    pub rtc_coord: Geodetic,
    pub bounds: Aabb,
}

/// Decode one tile buffer into renderer-ready content.
///
/// This is the whole per-tile pipeline; it runs to completion once the data
/// is in memory, suspending only inside collaborator calls.
pub async fn decode_tile(
    buffer: &[u8],
    params: &DecodeParams,
    collab: &Collaborators<'_>,
) -> TileResult<(TileContent, TransferList)> {
    let mut ids = BufferIdGen::default();
    match TileFormat::sniff(buffer)? {
        TileFormat::Composite => decode_composite(buffer, params, collab, &mut ids).await,
        format => decode_leaf(buffer, format, params, collab, &mut ids).await,
    }
}

/// Unpack a composite through an explicit work list. Nested composites are
/// pushed back onto the list rather than recursed into, so nesting depth
/// never grows the call stack; leaves come out in original order.
async fn decode_composite<'a>(
    buffer: &'a [u8],
    params: &DecodeParams,
    collab: &Collaborators<'_>,
    ids: &mut BufferIdGen,
) -> TileResult<(TileContent, TransferList)> {
    let mut work: Vec<&'a [u8]> = Vec::new();
    for child in split_composite(buffer)?.into_iter().rev() {
        work.push(child);
    }

    let mut leaves = Vec::new();
    let mut transfer = TransferList::default();
    while let Some(child) = work.pop() {
        match TileFormat::sniff(child)? {
            TileFormat::Composite => {
                for grandchild in split_composite(child)?.into_iter().rev() {
                    work.push(grandchild);
                }
            }
            format => {
                let (content, child_transfer) =
                    decode_leaf(child, format, params, collab, ids).await?;
                leaves.push(content);
                transfer.merge(child_transfer);
            }
        }
    }

    log::debug!("composite unpacked into {} leaf tiles", leaves.len());
    Ok((
        TileContent {
            format: TileFormat::Composite,
            root_index: params.root_index,
            kind: ContentKind::Composite(leaves),
        },
        transfer,
    ))
}

async fn decode_leaf(
    buffer: &[u8],
    format: TileFormat,
    params: &DecodeParams,
    collab: &Collaborators<'_>,
    ids: &mut BufferIdGen,
) -> TileResult<(TileContent, TransferList)> {
    let (kind, transfer) = match format {
        TileFormat::Json => {
            let manifest: Value = serde_json::from_slice(buffer)?;
            (ContentKind::Manifest(manifest), TransferList::default())
        }
        TileFormat::Batched => decode_batched(buffer, params, collab, ids).await?,
        TileFormat::Instanced => decode_instanced(buffer, params, collab, ids).await?,
        TileFormat::PointCloud => decode_points(buffer, params, ids)?,
        TileFormat::Composite => unreachable!("composites are expanded by the work list"),
    };
    Ok((
        TileContent { format, root_index: params.root_index, kind },
        transfer,
    ))
}

async fn decode_batched(
    buffer: &[u8],
    params: &DecodeParams,
    collab: &Collaborators<'_>,
    ids: &mut BufferIdGen,
) -> TileResult<(ContentKind, TransferList)> {
    let body = split_tile(buffer, TileFormat::Batched)?;
    let feature_table = FeatureTable::parse(body.feature_json, body.feature_bin)?;
    let batch_table = parse_batch_table(body.batch_json)?;

    let parsed = collab
        .parser
        .parse(buffer, body.payload_offset, &params.parse_options)
        .await?;
    let mut mesh = parsed.mesh;
    if mesh.primitives.is_empty() || mesh.has_no_positions() {
        return Err(TileError::NoContent);
    }
    mesh.assign_buffer_ids(ids);

    let rtc = feature_table
        .rtc_center()
        .or_else(|| parsed.feature_table.as_ref().and_then(FeatureTable::rtc_center));
    let external = params.external_transform.as_ref();

    let (rtc_center, rtc_coord, proj_center, model_space, bounds) = match select_mode(&mesh) {
        TransformMode::Projected => {
            let tile = project_mesh(&mut mesh, rtc, params.up_axis, external, collab.projection);
            (tile.rtc_center, tile.rtc_coord, Some(tile.proj_center), false, tile.bounds)
        }
        TransformMode::ModelSpace => {
            log::debug!("shared position buffers detected, rebasing in model space");
            let tile = rebase_mesh(&mut mesh, rtc, params.up_axis, external);
            (tile.rtc_center, tile.rtc_coord, None, true, tile.bounds)
        }
    };

    flatten_textures(&mut mesh);

    let mut transfer = TransferList::default();
    transfer.extend_from_mesh(&mesh);

    Ok((
        ContentKind::Batched(BatchedContent {
            mesh,
            feature_table,
            batch_table,
            rtc_center,
            rtc_coord,
            proj_center,
            model_space,
            bounds,
        }),
        transfer,
    ))
}

async fn decode_instanced(
    buffer: &[u8],
    params: &DecodeParams,
    collab: &Collaborators<'_>,
    ids: &mut BufferIdGen,
) -> TileResult<(ContentKind, TransferList)> {
    let body = split_tile(buffer, TileFormat::Instanced)?;
    let feature_table = FeatureTable::parse(body.feature_json, body.feature_bin)?;
    let batch_table = parse_batch_table(body.batch_json)?;

    let mut instances = instance_mesh(&feature_table, ids)?;

    let (model, model_uri) = match body.header.gltf_format {
        Some(1) => {
            let parsed = collab
                .parser
                .parse(buffer, body.payload_offset, &params.parse_options)
                .await?;
            let mut model = parsed.mesh;
            model.assign_buffer_ids(ids);
            flatten_textures(&mut model);
            (Some(model), None)
        }
        Some(0) => {
            let uri = payload_uri(body.payload)?;
            match collab.fetcher {
                Some(fetcher) => {
                    let job = fetcher.start(&uri, &params.fetch_options);
                    let response = job.result.await?;
                    if !(200..300).contains(&response.status) {
                        return Err(TileError::Network {
                            status: Some(response.status),
                            message: format!("fetching instanced model {uri}"),
                        });
                    }
                    let parsed = collab
                        .parser
                        .parse(&response.data, 0, &params.parse_options)
                        .await?;
                    let mut model = parsed.mesh;
                    model.assign_buffer_ids(ids);
                    flatten_textures(&mut model);
                    (Some(model), Some(uri))
                }
                None => {
                    log::warn!("i3dm references external model {uri} but no fetcher is configured");
                    (None, Some(uri))
                }
            }
        }
        _ => return Err(TileError::Malformed("gltfFormat")),
    };

    let tile = rebase_instances(
        &mut instances,
        feature_table.rtc_center(),
        feature_table.east_north_up(),
        params.external_transform.as_ref(),
        ids,
    );

    let mut transfer = TransferList::default();
    transfer.extend_from_mesh(&instances);
    if let Some(model) = &model {
        transfer.extend_from_mesh(model);
    }

    Ok((
        ContentKind::Instanced(InstancedContent {
            instances,
            model,
            model_uri,
            feature_table,
            batch_table,
            rtc_center: tile.rtc_center,
            rtc_coord: tile.rtc_coord,
            bounds: tile.bounds,
        }),
        transfer,
    ))
}

fn decode_points(
    buffer: &[u8],
    params: &DecodeParams,
    ids: &mut BufferIdGen,
) -> TileResult<(ContentKind, TransferList)> {
    let body = split_tile(buffer, TileFormat::PointCloud)?;
    let feature_table = FeatureTable::parse(body.feature_json, body.feature_bin)?;
    let batch_table = parse_batch_table(body.batch_json)?;

    let mut points = point_mesh(&feature_table, ids)?;
    let tile = rebase_instances(
        &mut points,
        feature_table.rtc_center(),
        feature_table.east_north_up(),
        params.external_transform.as_ref(),
        ids,
    );

    let mut transfer = TransferList::default();
    transfer.extend_from_mesh(&points);

    Ok((
        ContentKind::PointCloud(PointCloudContent {
            points,
            feature_table,
            batch_table,
            rtc_center: tile.rtc_center,
            rtc_coord: tile.rtc_coord,
            bounds: tile.bounds,
        }),
        transfer,
    ))
}

/// Build the point-cloud mesh from feature-table attributes.
fn point_mesh(ft: &FeatureTable, ids: &mut BufferIdGen) -> TileResult<MeshData> {
    let count = ft.points_length().unwrap_or(0);
    let mut mesh = MeshData::default();
    let mut prim = Primitive::default();

    if count > 0 {
        read_positions_into(ft, count, &mut mesh, &mut prim, ids)?;

        if let Some(offset) = ft.binary_ref("RGBA") {
            let data = ft.read_u8(offset, count * 4)?;
            let buffer = mesh.push_buffer(AttrData::U8(data), ids);
            prim.colors = Some(AttributeRef { buffer, offset: 0, count, components: 4 });
        } else if let Some(offset) = ft.binary_ref("RGB") {
            let data = ft.read_u8(offset, count * 3)?;
            let buffer = mesh.push_buffer(AttrData::U8(data), ids);
            prim.colors = Some(AttributeRef { buffer, offset: 0, count, components: 3 });
        }

        if let Some(offset) = ft.binary_ref("NORMAL") {
            let data = ft.read_f32(offset, count * 3)?;
            let buffer = mesh.push_buffer(AttrData::F32(data), ids);
            prim.normals = Some(AttributeRef { buffer, offset: 0, count, components: 3 });
        }
    }

    mesh.primitives.push(prim);
    Ok(mesh)
}

/// Build the per-instance mesh (translations and optional orientation
/// attributes) from an i3dm feature table.
fn instance_mesh(ft: &FeatureTable, ids: &mut BufferIdGen) -> TileResult<MeshData> {
    let count = ft.instances_length().unwrap_or(0);
    let mut mesh = MeshData::default();
    let mut prim = Primitive::default();

    if count > 0 {
        read_positions_into(ft, count, &mut mesh, &mut prim, ids)?;

        if let Some(offset) = ft.binary_ref("NORMAL_UP") {
            let data = ft.read_f32(offset, count * 3)?;
            let buffer = mesh.push_buffer(AttrData::F32(data), ids);
            prim.normals = Some(AttributeRef { buffer, offset: 0, count, components: 3 });
        }
        if let Some(offset) = ft.binary_ref("NORMAL_RIGHT") {
            let data = ft.read_f32(offset, count * 3)?;
            let buffer = mesh.push_buffer(AttrData::F32(data), ids);
            prim.tangents = Some(AttributeRef { buffer, offset: 0, count, components: 3 });
        }
        if let Some(offset) = ft.binary_ref("BATCH_ID") {
            let data = ft.read_u16(offset, count)?;
            let buffer = mesh.push_buffer(AttrData::U16(data), ids);
            prim.feature_ids = Some(AttributeRef { buffer, offset: 0, count, components: 1 });
        }
    }

    mesh.primitives.push(prim);
    Ok(mesh)
}

fn read_positions_into(
    ft: &FeatureTable,
    count: usize,
    mesh: &mut MeshData,
    prim: &mut Primitive,
    ids: &mut BufferIdGen,
) -> TileResult<()> {
    if let Some(offset) = ft.binary_ref("POSITION") {
        let data = ft.read_f32(offset, count * 3)?;
        let buffer = mesh.push_buffer(AttrData::F32(data), ids);
        prim.positions = Some(AttributeRef { buffer, offset: 0, count, components: 3 });
    } else if let Some(offset) = ft.binary_ref("POSITION_QUANTIZED") {
        let (min, scale) = ft
            .quantized_volume()
            .ok_or(TileError::Malformed("POSITION_QUANTIZED without volume uniforms"))?;
        let data = ft.read_u16(offset, count * 3)?;
        let buffer = mesh.push_buffer(AttrData::U16(data), ids);
        prim.positions = Some(AttributeRef { buffer, offset: 0, count, components: 3 });
        prim.quantization = Some(Quantization { min, scale });
    } else {
        return Err(TileError::NoContent);
    }
    Ok(())
}

fn parse_batch_table(json: &[u8]) -> TileResult<Option<Value>> {
    if json.is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_slice(trim_padding(json))?))
}

/// The i3dm payload for `gltfFormat = 0`: a NUL-padded UTF-8 URI.
fn payload_uri(payload: &[u8]) -> TileResult<String> {
    let text = std::str::from_utf8(payload).map_err(|_| TileError::Malformed("glTF URI"))?;
    let uri = text.trim_end_matches('\0').trim();
    if uri.is_empty() {
        return Err(TileError::NoContent);
    }
    Ok(uri.to_string())
}
