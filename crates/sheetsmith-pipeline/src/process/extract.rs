//! Frame extraction from video artifacts
//!
//! The extraction tool is a collaborator behind `FrameExtractor`. The contract
//! relied on: success means numbered stills exist in the output directory.

use sheetsmith_core::{Result, SheetsmithError};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Output pattern handed to the extractor, relative to its output directory
pub const FRAME_PATTERN: &str = "frame_%04d.png";

pub trait FrameExtractor {
    /// Name for logs
    fn name(&self) -> &str;

    /// Split `input` into still frames scaled to `width` x `height` with
    /// nearest-neighbour sampling, returning their paths in playback order.
    fn extract(&self, input: &Path, output_dir: &Path, width: u32, height: u32) -> Result<Vec<PathBuf>>;
}

/// Runs the ffmpeg binary
#[derive(Debug, Clone)]
pub struct FfmpegExtractor {
    program: PathBuf,
}

impl Default for FfmpegExtractor {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl FfmpegExtractor {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Whether the binary can be launched at all
    pub fn is_available(&self) -> bool {
        Command::new(&self.program)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Argument list for one extraction
    pub fn arguments(input: &Path, output_dir: &Path, width: u32, height: u32) -> Vec<String> {
        vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-y".to_string(),
            "-i".to_string(),
            input.to_string_lossy().to_string(),
            "-vf".to_string(),
            scale_filter(width, height),
            output_dir.join(FRAME_PATTERN).to_string_lossy().to_string(),
        ]
    }
}

/// Nearest-neighbour scale so hard pixel edges survive
pub fn scale_filter(width: u32, height: u32) -> String {
    format!("scale={}:{}:flags=neighbor", width, height)
}

impl FrameExtractor for FfmpegExtractor {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    fn extract(&self, input: &Path, output_dir: &Path, width: u32, height: u32) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(output_dir)?;

        let output = Command::new(&self.program)
            .args(Self::arguments(input, output_dir, width, height))
            .stdin(Stdio::null())
            .output()
            .map_err(|e| {
                SheetsmithError::ExtractionFailed(format!(
                    "failed to launch '{}': {}",
                    self.program.display(),
                    e
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
            return Err(SheetsmithError::ExtractionFailed(format!(
                "'{}' exited with {}: {}",
                self.program.display(),
                output.status,
                tail.into_iter().rev().collect::<Vec<_>>().join(" | ")
            )));
        }

        let frames = collect_numbered_frames(output_dir)?;
        if frames.is_empty() {
            return Err(SheetsmithError::ExtractionFailed(format!(
                "no frames written for {}",
                input.display()
            )));
        }
        Ok(frames)
    }
}

/// `frame_NNNN.png` files in `dir`, ordered by frame number
pub fn collect_numbered_frames(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut frames: Vec<(u64, PathBuf)> = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let number = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_prefix("frame_"))
            .and_then(|n| n.strip_suffix(".png"))
            .and_then(|n| n.parse::<u64>().ok());
        if let Some(number) = number {
            frames.push((number, path));
        }
    }
    frames.sort_by_key(|(number, _)| *number);
    Ok(frames.into_iter().map(|(_, path)| path).collect())
}
