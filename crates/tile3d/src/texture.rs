//! Uniform-texture flattening.

use crate::mesh::{MeshData, TextureData};

/// Collapse single-color textures to a flat-fill material.
///
/// Every 4-byte RGBA pixel is compared against the first; a uniform image
/// drops its pixel array and keeps only the normalized color, so the
/// renderer can skip sampling entirely.
pub fn flatten_textures(mesh: &mut MeshData) {
    for tex in &mut mesh.textures {
        flatten_texture(tex);
    }
}

pub fn flatten_texture(tex: &mut TextureData) {
    let Some(pixels) = tex.pixels.as_ref() else { return };
    if pixels.len() < 4 || pixels.len() % 4 != 0 {
        return;
    }

    let first: [u8; 4] = [pixels[0], pixels[1], pixels[2], pixels[3]];
    if !pixels.chunks_exact(4).all(|px| px == first) {
        return;
    }

    tex.color = Some([
        first[0] as f32 / 255.0,
        first[1] as f32 / 255.0,
        first[2] as f32 / 255.0,
        first[3] as f32 / 255.0,
    ]);
    tex.pixels = None;
}
