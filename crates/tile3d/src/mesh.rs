//! Decoded mesh/instance data model.
//!
//! Attributes are typed views into a per-mesh buffer pool. Pool buffers carry
//! a `BufferId` unique within one decode request; that identity (never the
//! contents) drives the sharing detector, the processed-offsets side table,
//! and transfer-list dedupe. Two primitives referencing the same pool entry
//! alias the same underlying storage, which real-world exporters do produce.

use glam::{DMat4, DVec3};

use crate::bounds::Aabb;

/// Identity tag of one backing buffer within a decode request.
pub type BufferId = u64;

/// Allocator for visit ids. One per decode request; ids are never reused
/// across buffers of the same request, including across composite children.
#[derive(Debug, Default)]
pub struct BufferIdGen(u64);

impl BufferIdGen {
    pub fn next_id(&mut self) -> BufferId {
        self.0 += 1;
        self.0
    }
}

/// Typed backing storage for attribute data.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrData {
    F32(Vec<f32>),
    U8(Vec<u8>),
    U16(Vec<u16>),
    U32(Vec<u32>),
}

impl AttrData {
    /// Raw byte view over the storage, for zero-copy hand-off to GPU upload
    /// paths on the host side.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            AttrData::F32(v) => bytemuck::cast_slice(v),
            AttrData::U8(v) => v,
            AttrData::U16(v) => bytemuck::cast_slice(v),
            AttrData::U32(v) => bytemuck::cast_slice(v),
        }
    }

    pub fn byte_len(&self) -> usize {
        self.as_bytes().len()
    }
}

#[derive(Debug)]
pub struct AttrBuffer {
    pub id: BufferId,
    pub data: AttrData,
}

/// View of one attribute inside a pool buffer.
///
/// `offset` counts elements (vertices/instances), not bytes, so the view
/// survives a quantized buffer being widened to f32 in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeRef {
    /// Pool index within the owning mesh.
    pub buffer: usize,
    /// First element of this view.
    pub offset: usize,
    /// Number of elements.
    pub count: usize,
    /// Components per element (3 for positions/normals, 4 for colors, 9 for
    /// packed rotation matrices).
    pub components: usize,
}

/// Dequantization uniforms: `value * scale + min` restores a position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quantization {
    pub min: DVec3,
    pub scale: DVec3,
}

#[derive(Debug, Default)]
pub struct Primitive {
    pub positions: Option<AttributeRef>,
    pub normals: Option<AttributeRef>,
    pub tangents: Option<AttributeRef>,
    pub colors: Option<AttributeRef>,
    pub feature_ids: Option<AttributeRef>,
    /// Synthesized or decoded per-instance rotation matrices (9 floats,
    /// column-major east/north/up).
    pub instance_rotations: Option<AttributeRef>,
    pub indices: Option<AttributeRef>,
    /// Ancestor node matrices in order; the last entry applies to a vertex
    /// first.
    pub node_matrices: Vec<DMat4>,
    /// Present when positions are stored quantized.
    pub quantization: Option<Quantization>,
    /// Index into the mesh texture list.
    pub texture: Option<usize>,
    /// Bounds in the output frame, written back by the transformer.
    pub bounds: Option<Aabb>,
}

#[derive(Debug, Clone)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    /// Raw RGBA8 pixels; dropped by the flattener when uniform.
    pub pixels: Option<Vec<u8>>,
    /// Normalized flat-fill color, set by the flattener.
    pub color: Option<[f32; 4]>,
}

#[derive(Debug, Default)]
pub struct MeshData {
    pub buffers: Vec<AttrBuffer>,
    pub primitives: Vec<Primitive>,
    pub textures: Vec<TextureData>,
}

impl MeshData {
    /// Append a buffer to the pool, tagging it with a fresh visit id.
    pub fn push_buffer(&mut self, data: AttrData, ids: &mut BufferIdGen) -> usize {
        self.buffers.push(AttrBuffer { id: ids.next_id(), data });
        self.buffers.len() - 1
    }

    /// Re-tag every pool buffer with request-scoped ids. Parsers hand back
    /// meshes with pool-local ids; identity must be unique per request
    /// before the sharing detector or the transfer list see the mesh.
    pub fn assign_buffer_ids(&mut self, ids: &mut BufferIdGen) {
        for buf in &mut self.buffers {
            buf.id = ids.next_id();
        }
    }

    /// True when no primitive references a position attribute.
    pub fn has_no_positions(&self) -> bool {
        self.primitives.iter().all(|p| p.positions.is_none())
    }
}

/// Ordered manifest of zero-copy buffers handed to the host.
///
/// Entries dedupe by buffer identity; contents are never compared. The
/// decoded content itself moves to the host together with this list, after
/// which the decode side must not touch the buffers again.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TransferList {
    entries: Vec<TransferEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferEntry {
    pub id: BufferId,
    pub byte_len: usize,
}

impl TransferList {
    pub fn push(&mut self, entry: TransferEntry) {
        if !self.entries.iter().any(|e| e.id == entry.id) {
            self.entries.push(entry);
        }
    }

    pub fn merge(&mut self, other: TransferList) {
        for entry in other.entries {
            self.push(entry);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TransferEntry> {
        self.entries.iter()
    }

    pub fn contains_id(&self, id: BufferId) -> bool {
        self.entries.iter().any(|e| e.id == id)
    }

    /// Collect every pool buffer of a mesh.
    pub fn extend_from_mesh(&mut self, mesh: &MeshData) {
        for buf in &mesh.buffers {
            self.push(TransferEntry { id: buf.id, byte_len: buf.data.byte_len() });
        }
    }
}

/// Up-axis tag of the source model frame. The decoder corrects everything to
/// Z-up before earth-fixed math.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpAxis {
    X,
    #[default]
    Y,
    Z,
}

impl UpAxis {
    /// Rotation taking the tagged up axis onto +Z.
    pub fn correction(self) -> DMat4 {
        match self {
            UpAxis::X => DMat4::from_rotation_y(-std::f64::consts::FRAC_PI_2),
            UpAxis::Y => DMat4::from_rotation_x(std::f64::consts::FRAC_PI_2),
            UpAxis::Z => DMat4::IDENTITY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_list_dedupes_by_identity() {
        let mut list = TransferList::default();
        list.push(TransferEntry { id: 7, byte_len: 12 });
        list.push(TransferEntry { id: 7, byte_len: 12 });
        list.push(TransferEntry { id: 8, byte_len: 12 });
        assert_eq!(list.len(), 2);

        let mut other = TransferList::default();
        other.push(TransferEntry { id: 8, byte_len: 12 });
        other.push(TransferEntry { id: 9, byte_len: 4 });
        list.merge(other);
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn up_axis_corrections_land_on_z() {
        let up = |axis: UpAxis, v: DVec3| axis.correction().transform_point3(v);
        assert!(up(UpAxis::Y, DVec3::Y).abs_diff_eq(DVec3::Z, 1e-12));
        assert!(up(UpAxis::X, DVec3::X).abs_diff_eq(DVec3::Z, 1e-12));
        assert_eq!(up(UpAxis::Z, DVec3::Z), DVec3::Z);
    }
}
