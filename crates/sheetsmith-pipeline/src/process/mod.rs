//! Per-asset post-processing
//!
//! Raw artifacts become `ProcessedFrame`s in three steps:
//! 1. video artifacts are split into stills by a `FrameExtractor`
//! 2. each still goes through a `BackgroundRemover`
//! 3. each still is normalized to the request's frame size with a
//!    nearest-neighbour filter
//!
//! Output order follows artifact order, then extraction order within a video.

pub mod background;
pub mod extract;

use crate::config::{BackgroundMode, PipelineConfig};
use crate::fetch::RawArtifact;
use crate::request::AssetRequest;
use crate::service::ArtifactKind;
use image::imageops::{self, FilterType};
use image::RgbaImage;
use sheetsmith_core::{Result, SheetsmithError};
use std::path::Path;

pub use background::{BackgroundRemover, EdgeKeyRemover, KeepBackground};
pub use extract::{FfmpegExtractor, FrameExtractor};

/// One normalized frame, ready for composition
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedFrame {
    pub image: RgbaImage,
    /// Where the frame came from (artifact path, `#frame` suffix for extracted stills)
    pub source: String,
}

impl ProcessedFrame {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Resize to exactly `width` x `height` with nearest-neighbour sampling.
/// A frame already at the target size comes back untouched.
pub fn normalize(image: RgbaImage, width: u32, height: u32) -> RgbaImage {
    if image.dimensions() == (width, height) {
        return image;
    }
    imageops::resize(&image, width, height, FilterType::Nearest)
}

/// Decode any supported still format into RGBA
pub fn decode_still(bytes: &[u8], source: &str) -> Result<RgbaImage> {
    image::load_from_memory(bytes)
        .map(|img| img.to_rgba8())
        .map_err(|e| SheetsmithError::ImageError(format!("{}: {}", source, e)))
}

pub struct PostProcessor {
    remover: Box<dyn BackgroundRemover>,
    extractor: Box<dyn FrameExtractor>,
}

impl PostProcessor {
    pub fn new(remover: Box<dyn BackgroundRemover>, extractor: Box<dyn FrameExtractor>) -> Self {
        Self { remover, extractor }
    }

    /// Processor wired from the `[processing]` config section
    pub fn from_config(config: &PipelineConfig) -> Self {
        let remover: Box<dyn BackgroundRemover> = match config.processing.background {
            BackgroundMode::EdgeKey => Box::new(EdgeKeyRemover::new(config.processing.key_tolerance)),
            BackgroundMode::None => Box::new(KeepBackground),
        };
        let extractor = Box::new(FfmpegExtractor::new(&config.processing.ffmpeg_path));
        Self::new(remover, extractor)
    }

    pub fn remover_name(&self) -> &str {
        self.remover.name()
    }

    /// Turn every raw artifact of one asset into frames.
    ///
    /// `scratch` holds video containers and extracted stills; the caller owns
    /// its lifetime. Any failure aborts processing for this asset only.
    pub fn process(
        &self,
        request: &AssetRequest,
        artifacts: Vec<RawArtifact>,
        scratch: &Path,
    ) -> Result<Vec<ProcessedFrame>> {
        let (width, height) = (request.target_width, request.target_height);
        let mut frames = Vec::new();

        for (index, raw) in artifacts.into_iter().enumerate() {
            let source = artifact_path(&raw);
            match raw.artifact.kind {
                ArtifactKind::Still => {
                    let image = decode_still(&raw.bytes, &source)?;
                    frames.push(self.finish(image, width, height, source)?);
                }
                ArtifactKind::Video => {
                    let ext = raw.artifact.extension().unwrap_or_else(|| "mp4".to_string());
                    let video_path = scratch.join(format!("artifact_{:03}.{}", index, ext));
                    std::fs::write(&video_path, &raw.bytes)?;

                    let frame_dir = scratch.join(format!("frames_{:03}", index));
                    let stills = self.extractor.extract(&video_path, &frame_dir, width, height)?;
                    log::debug!(
                        "{}: {} extracted {} frames from {}",
                        request.asset_key,
                        self.extractor.name(),
                        stills.len(),
                        source
                    );

                    for still in stills {
                        let name = still
                            .file_name()
                            .map(|n| n.to_string_lossy().to_string())
                            .unwrap_or_default();
                        let frame_source = format!("{}#{}", source, name);
                        let bytes = std::fs::read(&still)?;
                        let image = decode_still(&bytes, &frame_source)?;
                        frames.push(self.finish(image, width, height, frame_source)?);
                    }
                }
            }
        }

        Ok(frames)
    }

    fn finish(&self, image: RgbaImage, width: u32, height: u32, source: String) -> Result<ProcessedFrame> {
        let dims = image.dimensions();
        let cleared = self.remover.remove_background(image)?;
        if cleared.dimensions() != dims {
            return Err(SheetsmithError::ImageError(format!(
                "{}: background removal changed size {:?} -> {:?}",
                source,
                dims,
                cleared.dimensions()
            )));
        }
        Ok(ProcessedFrame {
            image: normalize(cleared, width, height),
            source,
        })
    }
}

fn artifact_path(raw: &RawArtifact) -> String {
    if raw.artifact.subfolder.is_empty() {
        raw.artifact.filename.clone()
    } else {
        format!("{}/{}", raw.artifact.subfolder, raw.artifact.filename)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::AnimationParams;
    use crate::service::ArtifactRef;
    use crate::stub::{placeholder_png, STUB_BACKDROP};
    use std::path::PathBuf;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("sheetsmith_process_test_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn still(name: &str, size: u32) -> RawArtifact {
        RawArtifact {
            artifact: ArtifactRef::new(name, ArtifactKind::Still),
            bytes: placeholder_png(name, size, size).unwrap(),
        }
    }

    /// Writes `count` numbered frames of `size` x `size`, each tinted by its number
    struct FakeExtractor {
        count: u32,
        size: u32,
    }

    impl FrameExtractor for FakeExtractor {
        fn name(&self) -> &str {
            "fake"
        }

        fn extract(&self, input: &Path, output_dir: &Path, _w: u32, _h: u32) -> Result<Vec<PathBuf>> {
            assert!(input.exists());
            std::fs::create_dir_all(output_dir)?;
            for i in 1..=self.count {
                let img = RgbaImage::from_pixel(self.size, self.size, image::Rgba([i as u8, 0, 0, 255]));
                img.save(output_dir.join(format!("frame_{:04}.png", i))).unwrap();
            }
            extract::collect_numbered_frames(output_dir)
        }
    }

    struct FailingExtractor;

    impl FrameExtractor for FailingExtractor {
        fn name(&self) -> &str {
            "failing"
        }

        fn extract(&self, _: &Path, _: &Path, _: u32, _: u32) -> Result<Vec<PathBuf>> {
            Err(SheetsmithError::ExtractionFailed("exit status: 1".to_string()))
        }
    }

    #[test]
    fn test_normalize_idempotent() {
        let img = RgbaImage::from_fn(16, 16, |x, y| image::Rgba([x as u8 * 9, y as u8 * 7, 3, 200]));
        let once = normalize(img.clone(), 16, 16);
        assert_eq!(once.as_raw(), img.as_raw());
        let twice = normalize(once.clone(), 16, 16);
        assert_eq!(twice.as_raw(), once.as_raw());
    }

    #[test]
    fn test_normalize_nearest_keeps_palette() {
        // 2x2 checker upscaled must not invent blended colours
        let mut img = RgbaImage::new(2, 2);
        img.put_pixel(0, 0, image::Rgba([255, 0, 0, 255]));
        img.put_pixel(1, 0, image::Rgba([0, 0, 255, 255]));
        img.put_pixel(0, 1, image::Rgba([0, 0, 255, 255]));
        img.put_pixel(1, 1, image::Rgba([255, 0, 0, 255]));
        let big = normalize(img, 8, 8);
        assert_eq!(big.dimensions(), (8, 8));
        for pixel in big.pixels() {
            assert!(pixel.0 == [255, 0, 0, 255] || pixel.0 == [0, 0, 255, 255]);
        }
        assert_eq!(big.get_pixel(0, 0).0, [255, 0, 0, 255]);
        assert_eq!(big.get_pixel(7, 0).0, [0, 0, 255, 255]);
    }

    #[test]
    fn test_stills_one_frame_each_in_order() {
        let dir = temp_dir();
        let processor = PostProcessor::new(
            Box::new(EdgeKeyRemover::default()),
            Box::new(FailingExtractor),
        );
        let request = AssetRequest::still("khopesh", "sword", 32, 32, 3);
        let artifacts = vec![still("k_1.png", 96), still("k_2.png", 96), still("k_3.png", 96)];

        let frames = processor.process(&request, artifacts, &dir).unwrap();
        assert_eq!(frames.len(), 3);
        let sources: Vec<&str> = frames.iter().map(|f| f.source.as_str()).collect();
        assert_eq!(sources, vec!["k_1.png", "k_2.png", "k_3.png"]);
        for frame in &frames {
            assert_eq!((frame.width(), frame.height()), (32, 32));
            // backdrop keyed out, figure kept
            assert_eq!(frame.image.get_pixel(0, 0)[3], 0);
            assert_eq!(frame.image.get_pixel(16, 16)[3], 255);
            assert_ne!(frame.image.get_pixel(16, 16).0, STUB_BACKDROP);
        }
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_video_yields_extractor_count() {
        let dir = temp_dir();
        let processor = PostProcessor::new(
            Box::new(KeepBackground),
            Box::new(FakeExtractor { count: 6, size: 64 }),
        );
        let request = AssetRequest::still("anubis_spell", "anubis casting", 64, 64, 6)
            .animated(AnimationParams::default());
        let video = RawArtifact {
            artifact: ArtifactRef::new("anubis_00001.mp4", ArtifactKind::Video),
            bytes: b"container".to_vec(),
        };

        let frames = processor.process(&request, vec![video], &dir).unwrap();
        assert_eq!(frames.len(), 6);
        for (i, frame) in frames.iter().enumerate() {
            assert_eq!(frame.image.get_pixel(0, 0)[0], (i + 1) as u8);
            assert_eq!(frame.source, format!("anubis_00001.mp4#frame_{:04}.png", i + 1));
        }
        assert!(dir.join("artifact_000.mp4").exists());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_extraction_failure_aborts_asset() {
        let dir = temp_dir();
        let processor = PostProcessor::new(Box::new(KeepBackground), Box::new(FailingExtractor));
        let request = AssetRequest::still("x", "y", 8, 8, 4).animated(AnimationParams::default());
        let video = RawArtifact {
            artifact: ArtifactRef::new("x.mp4", ArtifactKind::Video),
            bytes: vec![1, 2, 3],
        };
        assert!(matches!(
            processor.process(&request, vec![video], &dir),
            Err(SheetsmithError::ExtractionFailed(_))
        ));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_undecodable_still() {
        let dir = temp_dir();
        let processor = PostProcessor::new(Box::new(KeepBackground), Box::new(FailingExtractor));
        let request = AssetRequest::still("x", "y", 8, 8, 1);
        let raw = RawArtifact {
            artifact: ArtifactRef::new("x.png", ArtifactKind::Still),
            bytes: b"not a png".to_vec(),
        };
        assert!(matches!(
            processor.process(&request, vec![raw], &dir),
            Err(SheetsmithError::ImageError(_))
        ));
        std::fs::remove_dir_all(&dir).ok();
    }
}
