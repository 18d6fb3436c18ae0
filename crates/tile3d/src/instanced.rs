//! Point-cloud and instanced-model rebasing.
//!
//! These formats carry no node hierarchy, just raw positions, one RTC
//! center, and optional per-instance orientation flags. Vertices are rebased
//! to a freshly chosen center for float precision; map projection is
//! deferred to the renderer. An external transform applies only to the
//! derived center, never to the vertices.

use glam::{DMat4, DVec3};

use crate::bounds::{Aabb, BoundingAccumulator};
use crate::center::read_position;
use crate::geodesy::{ecef_to_geodetic, enu_basis, Geodetic};
use crate::mesh::{AttrData, AttributeRef, BufferId, BufferIdGen, MeshData};
use crate::transform::{position_storage_supported, write_positions};

#[derive(Debug)]
pub struct InstancedTile {
    /// Earth-fixed center after the external transform, when present.
    pub rtc_center: DVec3,
    pub rtc_coord: Geodetic,
    /// Bounds of the rebased vertices.
    pub bounds: Aabb,
}

/// Rebase instance/point positions around a freshly computed center.
///
/// When `east_north_up` is requested and the mesh carries no explicit
/// orientation attribute, a per-instance rotation is synthesized from each
/// vertex's earth-fixed position (local tangent frame) before rebasing.
pub fn rebase_instances(
    mesh: &mut MeshData,
    feature_rtc: Option<DVec3>,
    east_north_up: bool,
    external: Option<&DMat4>,
    ids: &mut BufferIdGen,
) -> InstancedTile {
    let old_rtc = feature_rtc.unwrap_or(DVec3::ZERO);

    if east_north_up && !has_orientation(mesh) {
        synthesize_east_north_up(mesh, old_rtc, ids);
    }

    // Center over raw positions plus the RTC center; empty geometry resolves
    // to the origin.
    let mut acc = BoundingAccumulator::new();
    for prim in &mesh.primitives {
        let Some(attr) = prim.positions else { continue };
        let data = &mesh.buffers[attr.buffer].data;
        for i in 0..attr.count {
            acc.fold(read_position(data, &attr, prim.quantization.as_ref(), i) + old_rtc);
        }
    }
    let new_rtc = acc.center();
    let delta = old_rtc - new_rtc;

    let mut done: std::collections::HashSet<(BufferId, usize)> = Default::default();
    let mut tile_acc = BoundingAccumulator::new();

    for pi in 0..mesh.primitives.len() {
        let Some(attr) = mesh.primitives[pi].positions else { continue };
        if !position_storage_supported(&mesh.buffers[attr.buffer]) {
            log::warn!("skipping position buffer with unsupported storage type");
            continue;
        }
        let id = mesh.buffers[attr.buffer].id;
        if !done.insert((id, attr.offset)) {
            mesh.primitives[pi].quantization = None;
            continue;
        }

        let quant = mesh.primitives[pi].quantization;
        let mut out = Vec::with_capacity(attr.count * 3);
        {
            let data = &mesh.buffers[attr.buffer].data;
            for i in 0..attr.count {
                let v = read_position(data, &attr, quant.as_ref(), i) + delta;
                tile_acc.fold(v);
                out.push(v.x as f32);
                out.push(v.y as f32);
                out.push(v.z as f32);
            }
        }
        write_positions(&mut mesh.buffers[attr.buffer], &attr, &out);
        mesh.primitives[pi].quantization = None;
    }

    let bounds = tile_acc.aabb();
    for prim in &mut mesh.primitives {
        if prim.positions.is_some() {
            prim.bounds = Some(bounds);
        }
    }

    let mut center = new_rtc;
    if let Some(ext) = external {
        center = ext.transform_point3(center);
    }

    InstancedTile {
        rtc_center: center,
        rtc_coord: ecef_to_geodetic(center),
        bounds,
    }
}

/// Any explicit orientation attribute (normal, tangent, or a decoded
/// rotation) suppresses synthesis.
fn has_orientation(mesh: &MeshData) -> bool {
    mesh.primitives.iter().any(|p| {
        p.normals.is_some() || p.tangents.is_some() || p.instance_rotations.is_some()
    })
}

/// Build a 3×3 east/north/up rotation per instance from its earth-fixed
/// position, packed column-major into a fresh 9-component attribute.
fn synthesize_east_north_up(mesh: &mut MeshData, old_rtc: DVec3, ids: &mut BufferIdGen) {
    for pi in 0..mesh.primitives.len() {
        let Some(attr) = mesh.primitives[pi].positions else { continue };
        let quant = mesh.primitives[pi].quantization;

        let mut packed = Vec::with_capacity(attr.count * 9);
        {
            let data = &mesh.buffers[attr.buffer].data;
            for i in 0..attr.count {
                let p = read_position(data, &attr, quant.as_ref(), i) + old_rtc;
                let g = ecef_to_geodetic(p);
                let basis = enu_basis(g.lat.to_radians(), g.lon.to_radians());
                packed.extend(basis.to_cols_array().map(|v| v as f32));
            }
        }

        let buffer = mesh.push_buffer(AttrData::F32(packed), ids);
        mesh.primitives[pi].instance_rotations = Some(AttributeRef {
            buffer,
            offset: 0,
            count: attr.count,
            components: 9,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geodesy::geodetic_to_ecef;
    use crate::mesh::Primitive;

    fn instance_mesh(positions: Vec<f32>) -> (MeshData, BufferIdGen) {
        let count = positions.len() / 3;
        let mut mesh = MeshData::default();
        let mut ids = BufferIdGen::default();
        let buffer = mesh.push_buffer(AttrData::F32(positions), &mut ids);
        mesh.primitives.push(Primitive {
            positions: Some(AttributeRef { buffer, offset: 0, count, components: 3 }),
            ..Default::default()
        });
        (mesh, ids)
    }

    #[test]
    fn rebases_around_new_center() {
        let (mut mesh, mut ids) = instance_mesh(vec![0.0, 0.0, 0.0, 10.0, 20.0, 30.0]);
        let old_rtc = DVec3::new(1000.0, 2000.0, 3000.0);
        let tile = rebase_instances(&mut mesh, Some(old_rtc), false, None, &mut ids);

        // New center is old_rtc plus the local midpoint.
        assert_eq!(tile.rtc_center, DVec3::new(1005.0, 2010.0, 3015.0));
        let AttrData::F32(out) = &mesh.buffers[0].data else { panic!() };
        assert_eq!(*out, [-5.0, -10.0, -15.0, 5.0, 10.0, 15.0]);
        assert_eq!(tile.bounds.min, DVec3::new(-5.0, -10.0, -15.0));
        assert_eq!(tile.bounds.max, DVec3::new(5.0, 10.0, 15.0));
    }

    #[test]
    fn external_transform_moves_only_the_center() {
        let (mut mesh, mut ids) = instance_mesh(vec![0.0, 0.0, 0.0]);
        let ext = DMat4::from_translation(DVec3::new(0.0, 0.0, 100.0));
        let tile = rebase_instances(&mut mesh, None, false, Some(&ext), &mut ids);
        assert_eq!(tile.rtc_center, DVec3::new(0.0, 0.0, 100.0));
        // The vertex itself stayed untouched by the external transform.
        let AttrData::F32(out) = &mesh.buffers[0].data else { panic!() };
        assert_eq!(*out, [0.0, 0.0, 0.0]);
    }

    #[test]
    fn synthesizes_rotations_only_without_explicit_orientation() {
        let anchor = geodetic_to_ecef(45.0, 9.0, 0.0);
        let (mut mesh, mut ids) = instance_mesh(vec![0.0, 0.0, 0.0]);
        let tile = rebase_instances(&mut mesh, Some(anchor), true, None, &mut ids);

        let rot = mesh.primitives[0].instance_rotations.expect("synthesized");
        assert_eq!(rot.components, 9);
        assert_eq!(rot.count, 1);
        let AttrData::F32(packed) = &mesh.buffers[rot.buffer].data else { panic!() };
        // Third column is û; it points along the ellipsoid normal.
        let up = DVec3::new(packed[6] as f64, packed[7] as f64, packed[8] as f64);
        assert!(up.dot(anchor.normalize()) > 0.999);
        assert!((tile.rtc_coord.lat - 45.0).abs() < 1e-6);

        // Explicit normals suppress synthesis.
        let (mut mesh2, mut ids2) = instance_mesh(vec![0.0, 0.0, 0.0]);
        let normals = mesh2.push_buffer(AttrData::F32(vec![0.0, 0.0, 1.0]), &mut ids2);
        mesh2.primitives[0].normals =
            Some(AttributeRef { buffer: normals, offset: 0, count: 1, components: 3 });
        rebase_instances(&mut mesh2, Some(anchor), true, None, &mut ids2);
        assert!(mesh2.primitives[0].instance_rotations.is_none());
    }

    #[test]
    fn empty_instances_resolve_to_zero_center() {
        let mut mesh = MeshData::default();
        let mut ids = BufferIdGen::default();
        let tile = rebase_instances(&mut mesh, None, false, None, &mut ids);
        assert_eq!(tile.rtc_center, DVec3::ZERO);
        assert_eq!(tile.bounds, Aabb::ZERO);
        assert_eq!(tile.rtc_coord, Geodetic::default());
    }
}
