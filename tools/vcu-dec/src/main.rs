//! vcu-dec: decode a bitstream to raw YUV through the VCU output pipeline.
//!
//! `vcu-dec decode` runs one session against the simulated engine and writes
//! the visible area of every delivered picture to the output file.
//! `vcu-dec generate` writes a synthetic VSIM bitstream to decode.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use vcu_common::{
    ChromaMode, CropInfo, DecoderConfig, Dimension, ErrorLevel, FourCC, OutputBitDepth,
    OutputFormat, PlaneId, SequenceMode, StreamSettings,
};
use vcu_decoder::{DecoderContext, Frame, SimDevice, SimStreamWriter};

#[derive(Parser, Debug)]
#[command(name = "vcu-dec")]
#[command(about = "Decode a bitstream through the VCU output pipeline")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Decode a bitstream and write raw YUV.
    Decode(DecodeArgs),
    /// Write a synthetic VSIM bitstream.
    Generate(GenerateArgs),
}

#[derive(clap::Args, Debug)]
struct DecodeArgs {
    /// Input bitstream (overrides the configuration file).
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Raw YUV output file.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// JSON configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output format: auto, native or a FourCC such as I420.
    #[arg(long, value_parser = parse_output_format)]
    output_format: Option<OutputFormat>,

    /// Output bit depth: first, alloc, stream, 8, 10 or 12.
    #[arg(long, value_parser = parse_bit_depth)]
    bit_depth: Option<OutputBitDepth>,

    /// Stop after this many pictures.
    #[arg(long)]
    max_frames: Option<u32>,

    /// Give up after this many seconds.
    #[arg(long)]
    timeout: Option<u64>,

    /// Stop on hardware warnings too.
    #[arg(long)]
    warnings_as_errors: bool,

    /// Print the effective configuration as JSON before decoding.
    #[arg(long)]
    print_config: bool,
}

#[derive(clap::Args, Debug)]
struct GenerateArgs {
    /// Output bitstream.
    #[arg(short, long)]
    output: PathBuf,

    #[arg(long, default_value = "30")]
    frames: usize,

    #[arg(long, default_value = "1920")]
    width: u32,

    #[arg(long, default_value = "1080")]
    height: u32,

    #[arg(long, default_value = "8")]
    bit_depth: u8,

    /// Chroma subsampling: 400, 420, 422 or 444.
    #[arg(long, default_value = "420", value_parser = parse_chroma)]
    chroma: ChromaMode,

    /// Display buffers the stream needs.
    #[arg(long, default_value = "4")]
    buffers: u8,

    /// Rows cropped at the bottom of each picture.
    #[arg(long, default_value = "0")]
    crop_bottom: u32,
}

fn parse_output_format(value: &str) -> Result<OutputFormat, String> {
    match value.to_ascii_lowercase().as_str() {
        "auto" => Ok(OutputFormat::Auto),
        "native" => Ok(OutputFormat::Native),
        _ => value
            .parse::<FourCC>()
            .map(OutputFormat::Explicit)
            .map_err(|e| e.to_string()),
    }
}

fn parse_bit_depth(value: &str) -> Result<OutputBitDepth, String> {
    match value.to_ascii_lowercase().as_str() {
        "first" => Ok(OutputBitDepth::First),
        "alloc" => Ok(OutputBitDepth::Alloc),
        "stream" => Ok(OutputBitDepth::Stream),
        other => other
            .parse::<u8>()
            .map(OutputBitDepth::Fixed)
            .map_err(|_| format!("invalid bit depth '{value}'")),
    }
}

fn parse_chroma(value: &str) -> Result<ChromaMode, String> {
    match value {
        "400" => Ok(ChromaMode::Mono),
        "420" => Ok(ChromaMode::Yuv420),
        "422" => Ok(ChromaMode::Yuv422),
        "444" => Ok(ChromaMode::Yuv444),
        _ => Err(format!("invalid chroma mode '{value}'")),
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .compact()
        .init();

    match args.command {
        Command::Decode(args) => decode(args),
        Command::Generate(args) => generate(args),
    }
}

// ---------------------------------------------------------------------------
// decode
// ---------------------------------------------------------------------------

fn decode(args: DecodeArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => DecoderConfig::load(path)
            .with_context(|| format!("failed to load configuration {}", path.display()))?,
        None => DecoderConfig::default(),
    };
    if let Some(input) = args.input {
        config.input = input;
    }
    if let Some(format) = args.output_format {
        config.output_format = format;
    }
    if let Some(bit_depth) = args.bit_depth {
        config.output_bit_depth = bit_depth;
    }
    if let Some(max_frames) = args.max_frames {
        config.max_frames = max_frames;
    }
    if args.timeout.is_some() {
        config.timeout_secs = args.timeout;
    }
    if args.warnings_as_errors {
        config.exit_condition = ErrorLevel::Warning;
    }
    if config.input.as_os_str().is_empty() {
        bail!("no input bitstream given");
    }
    config.enable_yuv_output = args.output.is_some();

    if args.print_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
    }

    let mut output = match &args.output {
        Some(path) => Some(BufWriter::new(
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?,
        )),
        None => None,
    };

    let ctx = DecoderContext::create(config, Arc::new(SimDevice::new()), None)
        .context("failed to create the decoder")?;
    ctx.start().context("failed to start decoding")?;

    let mut written = 0u64;
    let mut consume = |frame: Arc<Frame>| -> Result<()> {
        if let Some(out) = output.as_mut() {
            write_visible(&frame, out)?;
        }
        written += 1;
        Ok(())
    };
    loop {
        match ctx.next_frame() {
            Some(frame) => consume(frame)?,
            None if ctx.eos() || !ctx.running() => break,
            None => {}
        }
    }
    while let Some(frame) = ctx.dequeue(Duration::ZERO) {
        consume(frame)?;
    }

    let stats = ctx.join().context("decoding failed")?;
    if let Some(out) = output.as_mut() {
        out.flush()?;
    }
    if let Some(info) = ctx.stream_info() {
        println!("{info}");
    }
    if stats.timeout_occurred {
        warn!("Decoding stopped on timeout");
    }
    info!(frames = written, "Pictures written");
    println!("{stats}");
    Ok(())
}

/// Write the cropped area of each plane, row by row.
fn write_visible(frame: &Frame, out: &mut impl Write) -> Result<()> {
    let pixmap = frame
        .buffer()
        .pixmap_meta()
        .context("frame has no pixmap metadata")?;
    let format = pixmap
        .fourcc
        .pic_format()
        .with_context(|| format!("unknown FourCC {}", pixmap.fourcc))?;
    let bytes = frame.buffer().read();

    if format.storage.is_tiled() {
        out.write_all(&bytes)?;
        return Ok(());
    }

    let dim = frame.info().dim;
    let crop = *frame.crop_info();
    let crop = if crop.cropping { crop } else { CropInfo::default() };
    let (sx, sy) = format.chroma.subsampling();
    let bps = format.bytes_per_sample() as usize;
    let right_edge = dim.width.saturating_sub(crop.right);
    let bottom_edge = dim.height.saturating_sub(crop.bottom);

    for plane in &pixmap.planes {
        let (dx, dy) = if plane.id.is_luma() { (1, 1) } else { (sx, sy) };
        let components = if plane.id == PlaneId::UV { 2 } else { 1 };
        let sample = components * bps;
        let first_col = (crop.left / dx) as usize;
        let last_col = right_edge.div_ceil(dx) as usize;
        for row in crop.top / dy..bottom_edge.div_ceil(dy) {
            let line = plane.offset + row as usize * plane.pitch as usize;
            let visible = bytes
                .get(line + first_col * sample..line + last_col * sample)
                .context("plane row outside the picture buffer")?;
            out.write_all(visible)?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// generate
// ---------------------------------------------------------------------------

fn generate(args: GenerateArgs) -> Result<()> {
    let settings = StreamSettings {
        dim: Dimension::new(args.width, args.height),
        chroma: args.chroma,
        bit_depth: args.bit_depth,
        profile_idc: 1,
        level: Some(51),
        sequence_mode: SequenceMode::Progressive,
    };
    let crop = CropInfo {
        cropping: args.crop_bottom > 0,
        bottom: args.crop_bottom,
        ..Default::default()
    };
    SimStreamWriter::new()
        .sequence(&settings, &crop, args.buffers)
        .frames(args.frames)
        .write_to(&args.output)
        .with_context(|| format!("failed to write {}", args.output.display()))?;
    info!(
        path = %args.output.display(),
        frames = args.frames,
        resolution = %settings.dim,
        "Bitstream written"
    );
    Ok(())
}
