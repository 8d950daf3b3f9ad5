//! Sprite sheet composition and the sidecar metadata engines import

use crate::process::ProcessedFrame;
use crate::request::AnimationParams;
use image::{ImageFormat, RgbaImage};
use serde::{Deserialize, Serialize};
use sheetsmith_core::{Result, SheetsmithError};
use std::path::{Path, PathBuf};

/// How frames are arranged on the sheet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutPolicy {
    /// Row-major grid, at most `max_columns` wide
    Grid { max_columns: u32 },
    /// Every frame in a single row
    Strip,
}

impl Default for LayoutPolicy {
    fn default() -> Self {
        LayoutPolicy::Grid { max_columns: 4 }
    }
}

impl LayoutPolicy {
    /// `(columns, rows)` for `frame_count` frames
    pub fn layout(&self, frame_count: u32) -> (u32, u32) {
        if frame_count == 0 {
            return (0, 0);
        }
        let columns = match *self {
            LayoutPolicy::Grid { max_columns } => max_columns.max(1).min(frame_count),
            LayoutPolicy::Strip => frame_count,
        };
        (columns, frame_count.div_ceil(columns))
    }
}

/// A composed sheet, not yet on disk
#[derive(Debug, Clone)]
pub struct SpriteSheet {
    pub bitmap: RgbaImage,
    pub frame_width: u32,
    pub frame_height: u32,
    pub frame_count: u32,
    pub columns: u32,
    pub rows: u32,
}

impl SpriteSheet {
    /// Top-left pixel of the cell holding frame `index`
    pub fn cell_origin(&self, index: u32) -> (u32, u32) {
        cell_origin(index, self.columns, self.frame_width, self.frame_height)
    }
}

fn cell_origin(index: u32, columns: u32, cell_width: u32, cell_height: u32) -> (u32, u32) {
    ((index % columns) * cell_width, (index / columns) * cell_height)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GodotImportSettings {
    pub hframes: u32,
    pub vframes: u32,
}

/// JSON sidecar written next to every sheet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SheetMetadata {
    pub asset_type: String,
    pub frame_width: u32,
    pub frame_height: u32,
    pub frame_count: u32,
    pub columns: u32,
    pub rows: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fps: Option<u32>,
    #[serde(default, rename = "loop", skip_serializing_if = "Option::is_none")]
    pub looping: Option<bool>,
    /// Sheet file name, relative to the metadata file
    pub spritesheet_path: String,
    /// Service-side origin of each frame, in sheet order
    pub source_files: Vec<String>,
    pub godot_import_settings: GodotImportSettings,
}

pub fn sheet_file_name(asset_key: &str) -> String {
    format!("{}_spritesheet.png", asset_key)
}

pub fn metadata_file_name(asset_key: &str) -> String {
    format!("{}_metadata.json", asset_key)
}

/// Lay `frames` out on a transparent canvas.
///
/// Cells are sized to the largest frame; smaller frames sit at their cell's
/// top-left corner. Frame order is preserved row-major.
pub fn compose(
    asset_key: &str,
    frames: &[ProcessedFrame],
    layout: LayoutPolicy,
    animation: Option<&AnimationParams>,
) -> Result<(SpriteSheet, SheetMetadata)> {
    if frames.is_empty() {
        return Err(SheetsmithError::CompositionFailed(format!(
            "{}: no frames to compose",
            asset_key
        )));
    }

    let frame_count = u32::try_from(frames.len()).map_err(|_| {
        SheetsmithError::CompositionFailed(format!("{}: too many frames", asset_key))
    })?;
    let frame_width = frames.iter().map(|f| f.width()).max().unwrap_or(0);
    let frame_height = frames.iter().map(|f| f.height()).max().unwrap_or(0);
    if frame_width == 0 || frame_height == 0 {
        return Err(SheetsmithError::CompositionFailed(format!(
            "{}: frames have zero size",
            asset_key
        )));
    }

    let (columns, rows) = layout.layout(frame_count);
    let (Some(sheet_width), Some(sheet_height)) = (
        frame_width.checked_mul(columns),
        frame_height.checked_mul(rows),
    ) else {
        return Err(SheetsmithError::CompositionFailed(format!(
            "{}: sheet of {}x{} cells at {}x{} overflows",
            asset_key, columns, rows, frame_width, frame_height
        )));
    };

    let mut bitmap = RgbaImage::new(sheet_width, sheet_height);
    for (index, frame) in (0u32..).zip(frames) {
        let (x, y) = cell_origin(index, columns, frame_width, frame_height);
        image::imageops::replace(&mut bitmap, &frame.image, i64::from(x), i64::from(y));
    }

    let sheet = SpriteSheet {
        bitmap,
        frame_width,
        frame_height,
        frame_count,
        columns,
        rows,
    };
    let metadata = SheetMetadata {
        asset_type: asset_key.to_string(),
        frame_width,
        frame_height,
        frame_count,
        columns,
        rows,
        fps: animation.map(|a| a.fps),
        looping: animation.map(|a| a.looping),
        spritesheet_path: sheet_file_name(asset_key),
        source_files: frames.iter().map(|f| f.source.clone()).collect(),
        godot_import_settings: GodotImportSettings {
            hframes: columns,
            vframes: rows,
        },
    };
    Ok((sheet, metadata))
}

/// Final locations of a written sheet pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenSheet {
    pub sheet_path: PathBuf,
    pub metadata_path: PathBuf,
}

/// Write bitmap and metadata into `dir` as one unit.
///
/// Both files are staged under temporary names first and then renamed into
/// place, bitmap before metadata. A reader never sees metadata without its
/// bitmap: a failed bitmap leaves no metadata, and a failed metadata rename
/// removes the bitmap again.
pub fn write_sheet(sheet: &SpriteSheet, metadata: &SheetMetadata, dir: &Path) -> Result<WrittenSheet> {
    std::fs::create_dir_all(dir).map_err(|e| composition_error(dir, e))?;

    let asset_key = metadata.asset_type.as_str();
    let sheet_path = dir.join(sheet_file_name(asset_key));
    let metadata_path = dir.join(metadata_file_name(asset_key));
    let sheet_tmp = staging_path(&sheet_path);
    let metadata_tmp = staging_path(&metadata_path);

    let staged = stage(sheet, metadata, &sheet_tmp, &metadata_tmp);
    if let Err(e) = staged {
        discard(&sheet_tmp);
        discard(&metadata_tmp);
        return Err(e);
    }

    if let Err(e) = std::fs::rename(&sheet_tmp, &sheet_path) {
        discard(&sheet_tmp);
        discard(&metadata_tmp);
        return Err(composition_error(&sheet_path, e));
    }

    if let Err(e) = std::fs::rename(&metadata_tmp, &metadata_path) {
        discard(&metadata_tmp);
        discard(&sheet_path);
        return Err(composition_error(&metadata_path, e));
    }

    log::info!(
        "wrote {} ({}x{} frames) and {}",
        sheet_path.display(),
        sheet.columns,
        sheet.rows,
        metadata_path.display()
    );
    Ok(WrittenSheet {
        sheet_path,
        metadata_path,
    })
}

fn stage(sheet: &SpriteSheet, metadata: &SheetMetadata, sheet_tmp: &Path, metadata_tmp: &Path) -> Result<()> {
    sheet
        .bitmap
        .save_with_format(sheet_tmp, ImageFormat::Png)
        .map_err(|e| SheetsmithError::CompositionFailed(format!("{}: {}", sheet_tmp.display(), e)))?;

    let json = serde_json::to_string_pretty(metadata)
        .map_err(|e| SheetsmithError::CompositionFailed(format!("{}: {}", metadata_tmp.display(), e)))?;
    std::fs::write(metadata_tmp, json).map_err(|e| composition_error(metadata_tmp, e))?;
    Ok(())
}

fn staging_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    target.with_file_name(format!(".{}.partial", name))
}

fn discard(path: &Path) {
    if path.is_file() {
        if let Err(e) = std::fs::remove_file(path) {
            log::warn!("could not remove {}: {}", path.display(), e);
        }
    }
}

fn composition_error(path: &Path, e: std::io::Error) -> SheetsmithError {
    SheetsmithError::CompositionFailed(format!("{}: {}", path.display(), e))
}
