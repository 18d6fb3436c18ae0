use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use log::{info, warn};
use std::fs;
use std::path::PathBuf;

use tile3d::{
    decode_tile, split_composite, split_tile, Collaborators, ContentKind, DecodeParams,
    FeatureTable, ModelParser, ParseOptions, ParsedModel, TileContent, TileError, TileFormat,
    TileResult, UpAxis, WebMercator,
};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum UpAxisArg {
    X,
    Y,
    Z,
}

impl From<UpAxisArg> for UpAxis {
    fn from(axis: UpAxisArg) -> UpAxis {
        match axis {
            UpAxisArg::X => UpAxis::X,
            UpAxisArg::Y => UpAxis::Y,
            UpAxisArg::Z => UpAxis::Z,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "tileprobe", version, about = "Inspect binary 3D tile files")]
struct Args {
    /// Tile file (.b3dm/.i3dm/.pnts/.cmpt) or a JSON manifest.
    input: PathBuf,

    /// Up axis of the source models.
    #[arg(long, value_enum, default_value_t = UpAxisArg::Y)]
    up_axis: UpAxisArg,

    /// Run the full decode pipeline (web-mercator projection) in addition
    /// to the header summary. Formats embedding glTF need a model parser
    /// and fall back to the summary.
    #[arg(long, default_value_t = true)]
    decode: bool,
}

/// The probe ships no glTF parser; formats that need one report it.
struct NoModelParser;

#[async_trait::async_trait]
impl ModelParser for NoModelParser {
    async fn parse(
        &self,
        _buffer: &[u8],
        _byte_offset: usize,
        _options: &ParseOptions,
    ) -> TileResult<ParsedModel> {
        Err(TileError::Parse("tileprobe has no model parser".into()))
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let buffer = fs::read(&args.input)
        .with_context(|| format!("reading {}", args.input.display()))?;
    let format = TileFormat::sniff(&buffer)?;
    info!(
        "{}: {} bytes, format {}",
        args.input.display(),
        buffer.len(),
        format.magic()
    );

    summarize(&buffer, format, 0)?;

    if args.decode {
        decode(&buffer, args.up_axis.into());
    }
    Ok(())
}

fn summarize(buffer: &[u8], format: TileFormat, depth: usize) -> Result<()> {
    let pad = "  ".repeat(depth);
    match format {
        TileFormat::Json => {
            let manifest: serde_json::Value = serde_json::from_slice(buffer)?;
            let keys: Vec<&str> = manifest
                .as_object()
                .map(|o| o.keys().map(String::as_str).collect())
                .unwrap_or_default();
            info!("{pad}manifest keys: {keys:?}");
        }
        TileFormat::Composite => {
            let children = split_composite(buffer)?;
            info!("{pad}cmpt with {} inner tiles", children.len());
            for child in children {
                let child_format = TileFormat::sniff(child)?;
                info!("{pad}- inner {} ({} bytes)", child_format.magic(), child.len());
                summarize(child, child_format, depth + 1)?;
            }
        }
        _ => {
            let body = split_tile(buffer, format)?;
            info!(
                "{pad}version {}, feature table {}+{} bytes, batch table {}+{} bytes, payload {} bytes",
                body.header.version,
                body.header.ft_json_len,
                body.header.ft_bin_len,
                body.header.bt_json_len,
                body.header.bt_bin_len,
                body.payload.len(),
            );
            if let Some(gltf_format) = body.header.gltf_format {
                info!("{pad}gltfFormat {gltf_format}");
            }

            let table = FeatureTable::parse(body.feature_json, body.feature_bin)?;
            if let Some(object) = table.header().as_object() {
                let keys: Vec<&str> = object.keys().map(String::as_str).collect();
                info!("{pad}feature table: {keys:?}");
            }
            if let Some(rtc) = table.rtc_center() {
                info!("{pad}RTC_CENTER ({:.3}, {:.3}, {:.3})", rtc.x, rtc.y, rtc.z);
            }
            if let Some(n) = table.points_length() {
                info!("{pad}{n} points");
            }
            if let Some(n) = table.instances_length() {
                info!("{pad}{n} instances");
            }
        }
    }
    Ok(())
}

fn decode(buffer: &[u8], up_axis: UpAxis) {
    let parser = NoModelParser;
    let collab = Collaborators { parser: &parser, projection: &WebMercator, fetcher: None };
    let params = DecodeParams { up_axis, ..Default::default() };

    match pollster::block_on(decode_tile(buffer, &params, &collab)) {
        Ok((content, transfer)) => {
            report(&content, 0);
            info!("{} transferable buffers", transfer.len());
        }
        Err(TileError::Parse(reason)) => warn!("full decode unavailable: {reason}"),
        Err(error) => warn!("decode failed: {error}"),
    }
}

fn report(content: &TileContent, depth: usize) {
    let pad = "  ".repeat(depth);
    match &content.kind {
        ContentKind::Manifest(_) => info!("{pad}decoded manifest"),
        ContentKind::Batched(batched) => {
            let c = batched.rtc_coord;
            info!(
                "{pad}b3dm center lon {:.6} lat {:.6} h {:.2}, {} primitives, model_space {}",
                c.lon,
                c.lat,
                c.height,
                batched.mesh.primitives.len(),
                batched.model_space,
            );
        }
        ContentKind::Instanced(instanced) => {
            let c = instanced.rtc_coord;
            info!(
                "{pad}i3dm center lon {:.6} lat {:.6} h {:.2}, model {}",
                c.lon,
                c.lat,
                c.height,
                instanced.model_uri.as_deref().unwrap_or("embedded"),
            );
        }
        ContentKind::PointCloud(points) => {
            let c = points.rtc_coord;
            let b = points.bounds;
            info!(
                "{pad}pnts center lon {:.6} lat {:.6} h {:.2}, bounds ({:.2},{:.2},{:.2})..({:.2},{:.2},{:.2})",
                c.lon, c.lat, c.height, b.min.x, b.min.y, b.min.z, b.max.x, b.max.y, b.max.z,
            );
        }
        ContentKind::Composite(leaves) => {
            info!("{pad}cmpt with {} decoded leaves", leaves.len());
            for leaf in leaves {
                report(leaf, depth + 1);
            }
        }
    }
}
