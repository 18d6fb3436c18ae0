//! Model-center calculation.
//!
//! Walks every primitive carrying positions, lifts each vertex through the
//! node chain, up-axis correction, and (when requested) the external
//! transform plus the format-supplied RTC offset, and takes the midpoint of
//! the resulting extrema. Tiles with zero contributing vertices resolve to
//! the origin, never NaN.

use glam::{DMat4, DVec3};

use crate::bounds::BoundingAccumulator;
use crate::mesh::{AttrData, AttributeRef, MeshData, Primitive, Quantization, UpAxis};

/// Up-axis correction composed with the primitive's ancestor node matrices.
/// Matrices multiply in list order, so the last listed matrix reaches a
/// vertex first.
pub fn node_up_matrix(up: UpAxis, prim: &Primitive) -> DMat4 {
    let node = prim
        .node_matrices
        .iter()
        .fold(DMat4::IDENTITY, |acc, m| acc * *m);
    up.correction() * node
}

/// Read one dequantized position in double precision.
#[inline]
pub(crate) fn read_position(
    data: &AttrData,
    attr: &AttributeRef,
    quant: Option<&Quantization>,
    i: usize,
) -> DVec3 {
    let base = (attr.offset + i) * 3;
    let raw = match data {
        AttrData::F32(v) => DVec3::new(v[base] as f64, v[base + 1] as f64, v[base + 2] as f64),
        AttrData::U16(v) => DVec3::new(v[base] as f64, v[base + 1] as f64, v[base + 2] as f64),
        AttrData::U8(v) => DVec3::new(v[base] as f64, v[base + 1] as f64, v[base + 2] as f64),
        AttrData::U32(v) => DVec3::new(v[base] as f64, v[base + 1] as f64, v[base + 2] as f64),
    };
    match quant {
        Some(q) => q.min + raw * q.scale,
        None => raw,
    }
}

/// Representative center of the mesh in the pre-projection frame: combined
/// matrix = up-axis × node chain × external transform, plus the
/// feature-table RTC offset (zero when absent).
pub fn model_center(
    mesh: &MeshData,
    feature_rtc: DVec3,
    up: UpAxis,
    external: Option<&DMat4>,
) -> DVec3 {
    let mut acc = BoundingAccumulator::new();
    for prim in &mesh.primitives {
        let Some(attr) = prim.positions else { continue };
        let mut combined = node_up_matrix(up, prim);
        if let Some(ext) = external {
            combined *= *ext;
        }
        let data = &mesh.buffers[attr.buffer].data;
        for i in 0..attr.count {
            let p = read_position(data, &attr, prim.quantization.as_ref(), i);
            acc.fold(combined.transform_point3(p) + feature_rtc);
        }
    }
    acc.center()
}

/// Center of the mesh in the shared modeling frame (node chain and up-axis
/// only). This is the rebase origin for the shared-position transform mode,
/// where vertices never leave the modeling frame.
pub fn model_frame_center(mesh: &MeshData, up: UpAxis) -> DVec3 {
    let mut acc = BoundingAccumulator::new();
    for prim in &mesh.primitives {
        let Some(attr) = prim.positions else { continue };
        let m = node_up_matrix(up, prim);
        let data = &mesh.buffers[attr.buffer].data;
        for i in 0..attr.count {
            let p = read_position(data, &attr, prim.quantization.as_ref(), i);
            acc.fold(m.transform_point3(p));
        }
    }
    acc.center()
}
