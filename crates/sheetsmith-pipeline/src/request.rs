//! Asset requests and batch files
//!
//! An `AssetRequest` names one sprite or sprite animation to produce. Batch
//! files are TOML documents with one `[[asset]]` table per request:
//!
//! ```toml
//! [[asset]]
//! key = "mummy_walk"
//! prompt = "mummy shambling walk cycle, dragging feet, loose bandages"
//! width = 64
//! height = 64
//! frames = 8
//!
//! [asset.animation]
//! fps = 12
//! ```

use serde::{Deserialize, Serialize};
use sheetsmith_core::{Result, SheetsmithError};
use std::path::Path;

/// Playback parameters for an animated asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnimationParams {
    #[serde(default = "default_fps")]
    pub fps: u32,
    #[serde(default = "default_true", rename = "loop")]
    pub looping: bool,
}

fn default_fps() -> u32 {
    12
}

fn default_true() -> bool {
    true
}

impl Default for AnimationParams {
    fn default() -> Self {
        Self {
            fps: default_fps(),
            looping: true,
        }
    }
}

/// One logical still or animated asset to generate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRequest {
    /// Stable key; names the produced sheet and metadata files
    #[serde(rename = "key")]
    pub asset_key: String,
    pub prompt: String,
    /// Frame width after normalization
    #[serde(rename = "width")]
    pub target_width: u32,
    /// Frame height after normalization
    #[serde(rename = "height")]
    pub target_height: u32,
    /// Number of frames (batch size for stills, animation length for video jobs)
    #[serde(rename = "frames", default = "default_frame_count")]
    pub frame_count: u32,
    /// Present when the job produces a video container instead of stills
    #[serde(default)]
    pub animation: Option<AnimationParams>,
}

fn default_frame_count() -> u32 {
    1
}

impl AssetRequest {
    /// Request for `frame_count` still frames
    pub fn still(
        asset_key: impl Into<String>,
        prompt: impl Into<String>,
        target_width: u32,
        target_height: u32,
        frame_count: u32,
    ) -> Self {
        Self {
            asset_key: asset_key.into(),
            prompt: prompt.into(),
            target_width,
            target_height,
            frame_count,
            animation: None,
        }
    }

    /// Same request, generated as an animation
    pub fn animated(mut self, params: AnimationParams) -> Self {
        self.animation = Some(params);
        self
    }

    pub fn is_animated(&self) -> bool {
        self.animation.is_some()
    }

    /// Check the request shape; no I/O
    pub fn validate(&self) -> Result<()> {
        if self.asset_key.trim().is_empty() {
            return Err(SheetsmithError::InvalidRequest(
                "asset_key must not be empty".to_string(),
            ));
        }
        if !self
            .asset_key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(SheetsmithError::InvalidRequest(format!(
                "asset_key '{}' may only contain ASCII letters, digits, '_' and '-'",
                self.asset_key
            )));
        }
        if self.prompt.trim().is_empty() {
            return Err(SheetsmithError::InvalidRequest(format!(
                "{}: prompt must not be empty",
                self.asset_key
            )));
        }
        if self.target_width == 0 || self.target_height == 0 {
            return Err(SheetsmithError::InvalidRequest(format!(
                "{}: target size must be positive, got {}x{}",
                self.asset_key, self.target_width, self.target_height
            )));
        }
        if self.frame_count == 0 {
            return Err(SheetsmithError::InvalidRequest(format!(
                "{}: frame_count must be at least 1",
                self.asset_key
            )));
        }
        if let Some(anim) = &self.animation {
            if anim.fps == 0 {
                return Err(SheetsmithError::InvalidRequest(format!(
                    "{}: animation fps must be positive",
                    self.asset_key
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct BatchFile {
    #[serde(default, rename = "asset")]
    assets: Vec<AssetRequest>,
}

/// Parse a batch definition from TOML text
pub fn parse_batch(content: &str) -> Result<Vec<AssetRequest>> {
    let file: BatchFile = toml::from_str(content)?;
    Ok(file.assets)
}

/// Load a batch definition file
pub fn load_batch(path: &Path) -> Result<Vec<AssetRequest>> {
    let content = std::fs::read_to_string(path)?;
    parse_batch(&content).map_err(|e| {
        SheetsmithError::ConfigError(format!("Failed to parse batch {}: {}", path.display(), e))
    })
}
