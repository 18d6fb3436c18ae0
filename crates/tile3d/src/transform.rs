//! Per-vertex coordinate transformation.
//!
//! Two modes. The common one reprojects every vertex into map units relative
//! to the tile's projected center. The fallback fires when primitives share
//! a position buffer: reprojecting in place would corrupt the buffer for the
//! second primitive, so vertices are only rebased inside their own modeling
//! frame and the tile is flagged for draw-time projection.
//!
//! A position buffer is rewritten at most once per tile. Aliased views are
//! tracked in a side table owned by the invocation (buffer identity →
//! processed offsets), never on the buffers themselves.

use std::collections::{HashMap, HashSet};

use glam::{DMat4, DVec3};

use crate::bounds::{Aabb, BoundingAccumulator};
use crate::center::{model_center, model_frame_center, node_up_matrix, read_position};
use crate::geodesy::{ecef_to_geodetic, Geodetic};
use crate::mesh::{AttrBuffer, AttrData, AttributeRef, BufferId, MeshData, UpAxis};
use crate::project::{projected_point, Projection};

/// How this tile's vertices were rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformMode {
    /// Vertices are in map units, offset from the projected center.
    Projected,
    /// Vertices stay in the modeling frame, rebased around the RTC center;
    /// the renderer applies the projection transform at draw time.
    ModelSpace,
}

/// Declare sharing when any two primitives reference the same buffer at the
/// same offset. Buffers are tagged with a visit id on first sight; the
/// composite key is (visit id, offset). Runs once per tile, before transform
/// selection; the decision is global.
pub fn detect_shared_positions(mesh: &MeshData) -> bool {
    let mut seen: HashSet<(BufferId, usize)> = HashSet::new();
    for prim in &mesh.primitives {
        let Some(attr) = prim.positions else { continue };
        let id = mesh.buffers[attr.buffer].id;
        if !seen.insert((id, attr.offset)) {
            return true;
        }
    }
    false
}

pub fn select_mode(mesh: &MeshData) -> TransformMode {
    if detect_shared_positions(mesh) {
        TransformMode::ModelSpace
    } else {
        TransformMode::Projected
    }
}

#[derive(Debug)]
pub struct ProjectedTile {
    /// Earth-fixed double-precision center chosen for this tile.
    pub rtc_center: DVec3,
    /// The center in geodetic degrees.
    pub rtc_coord: Geodetic,
    /// The center in map units; subtracted from every emitted vertex.
    pub proj_center: DVec3,
    /// Union of the per-primitive output-frame bounds.
    pub bounds: Aabb,
}

#[derive(Debug)]
pub struct RebasedTile {
    pub rtc_center: DVec3,
    pub rtc_coord: Geodetic,
    pub bounds: Aabb,
}

/// Side table of already-rewritten buffer regions, scoped to one transform
/// invocation. Also remembers the output bounds per region so aliasing
/// primitives can adopt them without a second pass.
#[derive(Default)]
struct ProcessedRegions {
    offsets: HashMap<BufferId, HashSet<usize>>,
    bounds: HashMap<(BufferId, usize), Aabb>,
}

impl ProcessedRegions {
    fn already_done(&self, id: BufferId, offset: usize) -> Option<Aabb> {
        if self.offsets.get(&id).is_some_and(|s| s.contains(&offset)) {
            self.bounds.get(&(id, offset)).copied()
        } else {
            None
        }
    }

    fn mark(&mut self, id: BufferId, offset: usize, bounds: Aabb) {
        self.offsets.entry(id).or_default().insert(offset);
        self.bounds.insert((id, offset), bounds);
    }
}

/// Projected mode: reproject every vertex into map units.
///
/// Per vertex: dequantize → node chain → up-axis → + earth-fixed RTC →
/// external transform (skipped when exactly identity) → geodetic degrees →
/// forward projection → minus projected center → stored as f32. Exactly one
/// RTC/projected center is used for the whole tile.
pub fn project_mesh(
    mesh: &mut MeshData,
    feature_rtc: Option<DVec3>,
    up: UpAxis,
    external: Option<&DMat4>,
    projection: &dyn Projection,
) -> ProjectedTile {
    let rtc = feature_rtc.unwrap_or(DVec3::ZERO);
    let rtc_center = model_center(mesh, rtc, up, external);
    let rtc_coord = ecef_to_geodetic(rtc_center);
    let proj_center = projected_point(projection, rtc_coord);

    let ext = external.filter(|m| **m != DMat4::IDENTITY);
    let mut done = ProcessedRegions::default();
    let mut tile_acc: Option<Aabb> = None;

    for pi in 0..mesh.primitives.len() {
        let Some(attr) = mesh.primitives[pi].positions else { continue };
        let id = mesh.buffers[attr.buffer].id;

        if let Some(bounds) = done.already_done(id, attr.offset) {
            mesh.primitives[pi].bounds = Some(bounds);
            mesh.primitives[pi].quantization = None;
            continue;
        }
        if !position_storage_supported(&mesh.buffers[attr.buffer]) {
            log::warn!("skipping position buffer with unsupported storage type");
            continue;
        }

        let quant = mesh.primitives[pi].quantization;
        let node_up = node_up_matrix(up, &mesh.primitives[pi]);

        let mut out = Vec::with_capacity(attr.count * 3);
        let mut acc = BoundingAccumulator::new();
        {
            let data = &mesh.buffers[attr.buffer].data;
            for i in 0..attr.count {
                let p = read_position(data, &attr, quant.as_ref(), i);
                let mut q = node_up.transform_point3(p) + rtc;
                if let Some(m) = ext {
                    q = m.transform_point3(q);
                }
                let g = ecef_to_geodetic(q);
                let v = projected_point(projection, g) - proj_center;
                acc.fold(v);
                out.push(v.x as f32);
                out.push(v.y as f32);
                out.push(v.z as f32);
            }
        }

        write_positions(&mut mesh.buffers[attr.buffer], &attr, &out);
        let bounds = acc.aabb();
        mesh.primitives[pi].bounds = Some(bounds);
        mesh.primitives[pi].quantization = None;
        done.mark(id, attr.offset, bounds);
        tile_acc = Some(match tile_acc {
            Some(b) => b.union(&bounds),
            None => bounds,
        });
    }

    ProjectedTile {
        rtc_center,
        rtc_coord,
        proj_center,
        bounds: tile_acc.unwrap_or(Aabb::ZERO),
    }
}

/// Model-space mode: rebase vertices inside their modeling frame.
///
/// `new = N⁻¹ · ((N · v) − c)` with N the up-axis × node-chain matrix and c
/// the freshly chosen center in that frame. The reported tile center is
/// still the full earth-fixed one so the host can place the tile.
pub fn rebase_mesh(
    mesh: &mut MeshData,
    feature_rtc: Option<DVec3>,
    up: UpAxis,
    external: Option<&DMat4>,
) -> RebasedTile {
    let rtc = feature_rtc.unwrap_or(DVec3::ZERO);
    let rtc_center = model_center(mesh, rtc, up, external);
    let rtc_coord = ecef_to_geodetic(rtc_center);
    let center = model_frame_center(mesh, up);

    let mut done = ProcessedRegions::default();
    let mut tile_acc: Option<Aabb> = None;

    for pi in 0..mesh.primitives.len() {
        let Some(attr) = mesh.primitives[pi].positions else { continue };
        let id = mesh.buffers[attr.buffer].id;

        if let Some(bounds) = done.already_done(id, attr.offset) {
            mesh.primitives[pi].bounds = Some(bounds);
            mesh.primitives[pi].quantization = None;
            continue;
        }
        if !position_storage_supported(&mesh.buffers[attr.buffer]) {
            log::warn!("skipping position buffer with unsupported storage type");
            continue;
        }

        let quant = mesh.primitives[pi].quantization;
        let node_up = node_up_matrix(up, &mesh.primitives[pi]);
        let inverse = node_up.inverse();

        let mut out = Vec::with_capacity(attr.count * 3);
        let mut acc = BoundingAccumulator::new();
        {
            let data = &mesh.buffers[attr.buffer].data;
            for i in 0..attr.count {
                let p = read_position(data, &attr, quant.as_ref(), i);
                let v = inverse.transform_point3(node_up.transform_point3(p) - center);
                acc.fold(v);
                out.push(v.x as f32);
                out.push(v.y as f32);
                out.push(v.z as f32);
            }
        }

        write_positions(&mut mesh.buffers[attr.buffer], &attr, &out);
        let bounds = acc.aabb();
        mesh.primitives[pi].bounds = Some(bounds);
        mesh.primitives[pi].quantization = None;
        done.mark(id, attr.offset, bounds);
        tile_acc = Some(match tile_acc {
            Some(b) => b.union(&bounds),
            None => bounds,
        });
    }

    RebasedTile {
        rtc_center,
        rtc_coord,
        bounds: tile_acc.unwrap_or(Aabb::ZERO),
    }
}

pub(crate) fn position_storage_supported(buf: &AttrBuffer) -> bool {
    matches!(buf.data, AttrData::F32(_) | AttrData::U16(_))
}

/// Store rewritten positions. Quantized (u16) storage widens to f32 in
/// place, preserving raw values in untouched regions so aliasing primitives
/// with their own quantization uniforms still read correctly; the buffer
/// keeps its identity.
pub(crate) fn write_positions(buf: &mut AttrBuffer, attr: &AttributeRef, values: &[f32]) {
    if let AttrData::U16(v) = &buf.data {
        buf.data = AttrData::F32(v.iter().map(|&x| x as f32).collect());
    }
    match &mut buf.data {
        AttrData::F32(v) => {
            let start = attr.offset * 3;
            v[start..start + values.len()].copy_from_slice(values);
        }
        _ => unreachable!("position storage checked before write"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::{AttributeRef, BufferIdGen, Primitive};

    fn mesh_with(buffers: Vec<AttrData>, prims: Vec<(usize, usize, usize)>) -> MeshData {
        let mut mesh = MeshData::default();
        let mut ids = BufferIdGen::default();
        for data in buffers {
            mesh.push_buffer(data, &mut ids);
        }
        for (buffer, offset, count) in prims {
            mesh.primitives.push(Primitive {
                positions: Some(AttributeRef { buffer, offset, count, components: 3 }),
                ..Default::default()
            });
        }
        mesh
    }

    #[test]
    fn distinct_buffers_are_not_shared() {
        let mesh = mesh_with(
            vec![
                AttrData::F32(vec![0.0; 9]),
                AttrData::F32(vec![0.0; 9]),
            ],
            vec![(0, 0, 3), (1, 0, 3)],
        );
        assert!(!detect_shared_positions(&mesh));
        assert_eq!(select_mode(&mesh), TransformMode::Projected);
    }

    #[test]
    fn same_buffer_different_offsets_is_not_shared() {
        let mesh = mesh_with(
            vec![AttrData::F32(vec![0.0; 18])],
            vec![(0, 0, 3), (0, 3, 3)],
        );
        assert!(!detect_shared_positions(&mesh));
    }

    #[test]
    fn aliased_buffer_at_equal_offset_flips_mode() {
        let mesh = mesh_with(
            vec![AttrData::F32(vec![0.0; 9])],
            vec![(0, 0, 3), (0, 0, 3)],
        );
        assert!(detect_shared_positions(&mesh));
        assert_eq!(select_mode(&mesh), TransformMode::ModelSpace);
    }

    #[test]
    fn rebase_round_trips_within_f32_rounding() {
        // rebase(v, c) + c must reconstruct v to single precision.
        let original = [
            DVec3::new(4_517_590.9, 832_293.25, 4_487_348.4),
            DVec3::new(4_517_591.9, 832_294.25, 4_487_349.4),
            DVec3::new(4_517_592.9, 832_292.25, 4_487_347.4),
        ];
        let mut positions = Vec::new();
        for v in &original {
            positions.extend([v.x as f32, v.y as f32, v.z as f32]);
        }
        let mut mesh = mesh_with(vec![AttrData::F32(positions)], vec![(0, 0, 3)]);

        let tile = rebase_mesh(&mut mesh, None, UpAxis::Z, None);
        let AttrData::F32(out) = &mesh.buffers[0].data else { panic!() };
        for (i, v) in original.iter().enumerate() {
            let rebased = DVec3::new(
                out[i * 3] as f64,
                out[i * 3 + 1] as f64,
                out[i * 3 + 2] as f64,
            );
            let restored = rebased + tile.rtc_center;
            // Single-precision spacing at planetary magnitude is ~0.5 m; the
            // rebased offsets restore well inside it.
            assert!((restored - *v).length() < 0.5, "vertex {i}: {restored} vs {v}");
        }
        // The rebased coordinates themselves are small.
        assert!(out.iter().all(|c| c.abs() < 16.0));
    }

    #[test]
    fn model_space_rebase_processes_aliased_region_once() {
        let mesh_positions = vec![1.0f32, 2.0, 3.0, 5.0, 6.0, 7.0];
        let mut mesh = mesh_with(
            vec![AttrData::F32(mesh_positions)],
            vec![(0, 0, 2), (0, 0, 2)],
        );
        let tile = rebase_mesh(&mut mesh, None, UpAxis::Z, None);
        // Both primitives report identical bounds, and the buffer holds the
        // rebased values exactly once (center is the midpoint (3,4,5)).
        assert_eq!(mesh.primitives[0].bounds, mesh.primitives[1].bounds);
        let AttrData::F32(out) = &mesh.buffers[0].data else { panic!() };
        assert_eq!(*out, [-2.0, -2.0, -2.0, 2.0, 2.0, 2.0]);
        assert_eq!(tile.rtc_center, DVec3::new(3.0, 4.0, 5.0));
    }
}
