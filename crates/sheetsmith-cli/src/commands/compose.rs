//! `sheetsmith compose <key> <frames...>`
//!
//! Packs frames already on disk, e.g. hand-touched exports, with the same
//! layout and metadata rules as generated assets.

use crate::GlobalArgs;
use anyhow::{Context, Result};
use sheetsmith_pipeline::process::{normalize, BackgroundRemover, EdgeKeyRemover, ProcessedFrame};
use sheetsmith_pipeline::sheet::{compose, write_sheet};
use sheetsmith_pipeline::AnimationParams;
use std::path::PathBuf;

pub struct ComposeArgs {
    pub key: String,
    pub frames: Vec<PathBuf>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<u32>,
    pub key_background: bool,
}

pub fn run(global: &GlobalArgs, args: ComposeArgs) -> Result<()> {
    let config = super::load_config(global)?;
    let remover = EdgeKeyRemover::new(config.processing.key_tolerance);

    let mut frames = Vec::with_capacity(args.frames.len());
    for path in &args.frames {
        let mut image = image::open(path)
            .with_context(|| format!("Failed to read frame {}", path.display()))?
            .to_rgba8();
        if args.key_background {
            image = remover
                .remove_background(image)
                .map_err(|e| anyhow::anyhow!("{}", e))?;
        }
        let width = args.width.unwrap_or(image.width());
        let height = args.height.unwrap_or(image.height());
        frames.push(ProcessedFrame {
            image: normalize(image, width, height),
            source: path.display().to_string(),
        });
    }

    let animation = args.fps.map(|fps| AnimationParams { fps, looping: true });
    let (sheet, metadata) = compose(&args.key, &frames, config.layout_policy(), animation.as_ref())
        .map_err(|e| anyhow::anyhow!("{}", e))?;
    let written = write_sheet(&sheet, &metadata, &config.output.output_root)
        .map_err(|e| anyhow::anyhow!("{}", e))?;

    println!(
        "Composed {} frame(s) into {}x{} grid",
        sheet.frame_count, sheet.columns, sheet.rows
    );
    println!("  Sheet: {}", written.sheet_path.display());
    println!("  Metadata: {}", written.metadata_path.display());
    Ok(())
}
