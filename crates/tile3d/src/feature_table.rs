//! Feature table: JSON header plus binary body.
//!
//! The JSON header carries either literal values (`"RTC_CENTER": [x,y,z]`)
//! or references into the binary body (`{"byteOffset": n}`). Only the
//! accessors the pipeline needs are typed; the rest of the header stays
//! available as raw JSON for the host.

use glam::DVec3;
use serde_json::Value;

use crate::error::{TileError, TileResult};

#[derive(Debug, Default, Clone)]
pub struct FeatureTable {
    header: Value,
    body: Vec<u8>,
}

impl FeatureTable {
    /// Parse a feature table from its two tile sections. An empty JSON
    /// section yields an empty table; malformed JSON propagates.
    pub fn parse(json: &[u8], body: &[u8]) -> TileResult<FeatureTable> {
        let header = if json.is_empty() {
            Value::Object(Default::default())
        } else {
            serde_json::from_slice(trim_padding(json))?
        };
        Ok(FeatureTable { header, body: body.to_vec() })
    }

    pub fn header(&self) -> &Value {
        &self.header
    }

    /// Earth-fixed double-precision center supplied by the format itself.
    pub fn rtc_center(&self) -> Option<DVec3> {
        self.f64x3("RTC_CENTER")
    }

    /// Whether the format asks for synthesized per-instance orientation.
    pub fn east_north_up(&self) -> bool {
        self.header
            .get("EAST_NORTH_UP")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn points_length(&self) -> Option<usize> {
        self.usize_value("POINTS_LENGTH")
    }

    pub fn instances_length(&self) -> Option<usize> {
        self.usize_value("INSTANCES_LENGTH")
    }

    /// Quantization volume, normalized to per-unit uniforms: the stored u16
    /// lattice spans 0..=65535 across the volume, so the effective scale is
    /// `QUANTIZED_VOLUME_SCALE / 65535`.
    pub fn quantized_volume(&self) -> Option<(DVec3, DVec3)> {
        let offset = self.f64x3("QUANTIZED_VOLUME_OFFSET")?;
        let scale = self.f64x3("QUANTIZED_VOLUME_SCALE")?;
        Some((offset, scale / 65535.0))
    }

    /// Byte offset of a binary-body attribute, when present.
    pub fn binary_ref(&self, key: &str) -> Option<usize> {
        self.header
            .get(key)?
            .get("byteOffset")?
            .as_u64()
            .map(|v| v as usize)
    }

    pub fn has(&self, key: &str) -> bool {
        self.header.get(key).is_some()
    }

    pub fn read_f32(&self, byte_offset: usize, count: usize) -> TileResult<Vec<f32>> {
        let bytes = self.body_slice(byte_offset, count * 4)?;
        Ok(bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }

    pub fn read_u16(&self, byte_offset: usize, count: usize) -> TileResult<Vec<u16>> {
        let bytes = self.body_slice(byte_offset, count * 2)?;
        Ok(bytes
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect())
    }

    pub fn read_u8(&self, byte_offset: usize, count: usize) -> TileResult<Vec<u8>> {
        Ok(self.body_slice(byte_offset, count)?.to_vec())
    }

    fn body_slice(&self, byte_offset: usize, byte_len: usize) -> TileResult<&[u8]> {
        let end = byte_offset
            .checked_add(byte_len)
            .ok_or(TileError::Truncated("feature table body"))?;
        self.body
            .get(byte_offset..end)
            .ok_or(TileError::Truncated("feature table body"))
    }

    fn f64x3(&self, key: &str) -> Option<DVec3> {
        let arr = self.header.get(key)?.as_array()?;
        if arr.len() != 3 {
            return None;
        }
        Some(DVec3::new(
            arr[0].as_f64()?,
            arr[1].as_f64()?,
            arr[2].as_f64()?,
        ))
    }

    fn usize_value(&self, key: &str) -> Option<usize> {
        self.header.get(key)?.as_u64().map(|v| v as usize)
    }
}

/// Writers pad the JSON section with trailing spaces to align the binary
/// body; strip them before handing the bytes to serde.
pub(crate) fn trim_padding(json: &[u8]) -> &[u8] {
    let end = json
        .iter()
        .rposition(|&b| b != b' ' && b != 0)
        .map_or(0, |i| i + 1);
    &json[..end]
}
