//! detect_image - run the detection pipeline over one image
//!
//! Writes the annotated image and prints the detection report as JSON.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;

use sitewatch::detect::{FaceBackendKind, PhoneStrategy};
use sitewatch::{Frame, Pipeline, SiteConfig};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Image to analyse (JPEG or PNG).
    input: PathBuf,
    /// Where to write the annotated image; format follows the extension.
    #[arg(long, short, default_value = "annotated.jpg")]
    output: PathBuf,
    /// OpenCV cascade XML for the face classifier.
    #[arg(long, env = "SITEWATCH_CASCADE_PATH")]
    cascade: Option<PathBuf>,
    /// Use fixed face boxes instead of the cascade (x,y,w,h; repeatable).
    #[arg(long = "stub-face", value_name = "X,Y,W,H", value_parser = parse_box)]
    stub_faces: Vec<[u32; 4]>,
    /// Phone heuristic (darkblob|edge).
    #[arg(long)]
    phone_strategy: Option<PhoneStrategy>,
    /// Pretty-print the JSON report.
    #[arg(long)]
    pretty: bool,
}

fn parse_box(raw: &str) -> Result<[u32; 4], String> {
    let parts: Vec<u32> = raw
        .split(',')
        .map(|p| p.trim().parse::<u32>())
        .collect::<Result<_, _>>()
        .map_err(|e| format!("invalid box '{}': {}", raw, e))?;
    <[u32; 4]>::try_from(parts).map_err(|_| format!("box '{}' needs four values", raw))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let mut cfg = SiteConfig::load()?;
    if let Some(path) = args.cascade {
        cfg.detector.face.cascade_path = path;
    }
    if !args.stub_faces.is_empty() {
        cfg.detector.face.backend = FaceBackendKind::Stub;
        cfg.detector.face.stub_faces = args.stub_faces;
    }
    if let Some(strategy) = args.phone_strategy {
        cfg.detector.phone.strategy = strategy;
    }
    let pipeline = Pipeline::from_config(&cfg.detector)?;

    let bytes = std::fs::read(&args.input)
        .with_context(|| format!("read {}", args.input.display()))?;
    let frame = Frame::decode(&bytes)?;
    let result = pipeline.detect(&frame)?;

    result
        .annotated
        .image()
        .save(&args.output)
        .map_err(|e| anyhow!("write {}: {}", args.output.display(), e))?;
    log::info!(
        "{} detection(s), annotated image written to {}",
        result.count(),
        args.output.display()
    );

    let report = result.report();
    let json = if args.pretty {
        serde_json::to_string_pretty(&report)?
    } else {
        serde_json::to_string(&report)?
    };
    println!("{}", json);
    Ok(())
}
