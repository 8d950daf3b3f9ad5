//! Batch orchestration
//!
//! Drives each request through describe → submit → poll → fetch → process →
//! compose, one asset at a time. A failure at any stage is recorded on that
//! asset's outcome and the batch moves on; `run_batch` itself never fails.

use crate::config::PipelineConfig;
use crate::descriptor::build_variant_descriptor;
use crate::fetch::{fetch_all, require_all};
use crate::poller::CompletionPoller;
use crate::process::PostProcessor;
use crate::request::AssetRequest;
use crate::service::InferenceService;
use crate::sheet::{compose, write_sheet};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sheetsmith_core::{ContentHash, Result, SheetsmithError};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Pipeline stage an asset failed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Describe,
    Submit,
    Poll,
    Fetch,
    Process,
    Compose,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Describe => write!(f, "describe"),
            Stage::Submit => write!(f, "submit"),
            Stage::Poll => write!(f, "poll"),
            Stage::Fetch => write!(f, "fetch"),
            Stage::Process => write!(f, "process"),
            Stage::Compose => write!(f, "compose"),
        }
    }
}

/// Files written for one successful asset
#[derive(Debug, Clone, PartialEq)]
pub struct ProducedSheet {
    pub sheet_path: PathBuf,
    pub metadata_path: PathBuf,
    pub frame_count: u32,
    pub columns: u32,
    pub rows: u32,
    pub frame_width: u32,
    pub frame_height: u32,
    pub content_hash: ContentHash,
}

#[derive(Debug)]
pub enum AssetStatus {
    Succeeded(ProducedSheet),
    Failed { stage: Stage, error: SheetsmithError },
}

/// What happened to one requested asset
#[derive(Debug)]
pub struct AssetOutcome {
    pub asset_key: String,
    /// Set once the service accepted the job
    pub job_id: Option<String>,
    /// Set once a descriptor was built
    pub seed: Option<u64>,
    pub prompt: Option<String>,
    pub duration_secs: f64,
    pub status: AssetStatus,
}

impl AssetOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self.status, AssetStatus::Succeeded(_))
    }

    pub fn sheet(&self) -> Option<&ProducedSheet> {
        match &self.status {
            AssetStatus::Succeeded(sheet) => Some(sheet),
            AssetStatus::Failed { .. } => None,
        }
    }
}

/// One outcome per requested asset, in request order
#[derive(Debug)]
pub struct BatchReport {
    pub outcomes: Vec<AssetOutcome>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed() == 0
    }
}

/// Per-asset scratch directory, removed when dropped
pub struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    /// Create `<root>/<asset_key>-<sequence>-<uuid>`
    pub fn create(root: &Path, asset_key: &str, sequence: usize) -> Result<Self> {
        let path = root.join(format!("{}-{}-{}", asset_key, sequence, uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&path)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            log::warn!("could not remove scratch dir {}: {}", self.path.display(), e);
        }
    }
}

/// Identity of an attempt, filled in as stages complete
#[derive(Default)]
struct Trace {
    job_id: Option<String>,
    seed: Option<u64>,
    prompt: Option<String>,
}

pub struct Pipeline<S: InferenceService> {
    config: PipelineConfig,
    service: S,
    processor: PostProcessor,
    poller: CompletionPoller,
}

impl<S: InferenceService> Pipeline<S> {
    pub fn new(config: PipelineConfig, service: S, processor: PostProcessor) -> Self {
        let poller = CompletionPoller::from_config(&config);
        Self {
            config,
            service,
            processor,
            poller,
        }
    }

    /// Pipeline with the post-processor described by `config`
    pub fn from_config(config: PipelineConfig, service: S) -> Self {
        let processor = PostProcessor::from_config(&config);
        Self::new(config, service, processor)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    /// Run every request in order. Always returns one outcome per request.
    pub fn run_batch(&self, requests: &[AssetRequest]) -> BatchReport {
        let started_at = Utc::now();
        let mut seen = HashSet::new();
        let mut outcomes = Vec::with_capacity(requests.len());

        log::info!(
            "running {} assets against {} service",
            requests.len(),
            self.service.name()
        );

        for (sequence, request) in requests.iter().enumerate() {
            log::info!("[{}/{}] {}", sequence + 1, requests.len(), request.asset_key);

            let outcome = if seen.insert(request.asset_key.as_str()) {
                self.run_asset(request, sequence)
            } else {
                AssetOutcome {
                    asset_key: request.asset_key.clone(),
                    job_id: None,
                    seed: None,
                    prompt: None,
                    duration_secs: 0.0,
                    status: AssetStatus::Failed {
                        stage: Stage::Describe,
                        error: SheetsmithError::InvalidRequest(format!(
                            "duplicate asset_key '{}' in batch",
                            request.asset_key
                        )),
                    },
                }
            };

            match &outcome.status {
                AssetStatus::Succeeded(sheet) => log::info!(
                    "{}: {} frames -> {} ({:.1}s)",
                    outcome.asset_key,
                    sheet.frame_count,
                    sheet.sheet_path.display(),
                    outcome.duration_secs
                ),
                AssetStatus::Failed { stage, error } => {
                    log::error!("{}: failed at {}: {}", outcome.asset_key, stage, error)
                }
            }
            outcomes.push(outcome);
        }

        remove_if_empty(&self.config.scratch_root());

        BatchReport {
            outcomes,
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// Run a single request; `sequence` picks the style variant and names its scratch directory
    pub fn run_asset(&self, request: &AssetRequest, sequence: usize) -> AssetOutcome {
        let start = Instant::now();
        let mut trace = Trace::default();

        let status = match self.attempt(request, sequence, &mut trace) {
            Ok(sheet) => AssetStatus::Succeeded(sheet),
            Err((stage, error)) => AssetStatus::Failed { stage, error },
        };

        AssetOutcome {
            asset_key: request.asset_key.clone(),
            job_id: trace.job_id,
            seed: trace.seed,
            prompt: trace.prompt,
            duration_secs: start.elapsed().as_secs_f64(),
            status,
        }
    }

    fn attempt(
        &self,
        request: &AssetRequest,
        sequence: usize,
        trace: &mut Trace,
    ) -> std::result::Result<ProducedSheet, (Stage, SheetsmithError)> {
        let descriptor =
            build_variant_descriptor(request, &self.config.template, sequence).map_err(at(Stage::Describe))?;
        trace.seed = Some(descriptor.seed());
        trace.prompt = Some(descriptor.prompt().to_string());

        let handle = self.service.submit(&descriptor).map_err(at(Stage::Submit))?;
        log::info!("{}: submitted as job {}", request.asset_key, handle.job_id);
        trace.job_id = Some(handle.job_id.clone());

        let result = self
            .poller
            .await_completion(&self.service, &handle.job_id, |progress| {
                log::debug!(
                    "job {} tick {} ({:.1}s / {:.0}s)",
                    progress.job_id,
                    progress.tick,
                    progress.elapsed.as_secs_f64(),
                    progress.timeout.as_secs_f64()
                );
            })
            .map_err(at(Stage::Poll))?;
        let artifact_refs = result.into_artifacts().map_err(at(Stage::Poll))?;

        let raw = require_all(fetch_all(&self.service, &artifact_refs)).map_err(at(Stage::Fetch))?;

        let frames = {
            let scratch = ScratchDir::create(&self.config.scratch_root(), &request.asset_key, sequence)
                .map_err(at(Stage::Process))?;
            self.processor
                .process(request, raw, scratch.path())
                .map_err(at(Stage::Process))?
        };

        let (sheet, metadata) = compose(
            &request.asset_key,
            &frames,
            self.config.layout_policy(),
            request.animation.as_ref(),
        )
        .map_err(at(Stage::Compose))?;
        let written = write_sheet(&sheet, &metadata, &self.config.output.output_root)
            .map_err(at(Stage::Compose))?;
        let content_hash = ContentHash::from_file(&written.sheet_path)
            .map_err(|e| (Stage::Compose, SheetsmithError::from(e)))?;

        Ok(ProducedSheet {
            sheet_path: written.sheet_path,
            metadata_path: written.metadata_path,
            frame_count: sheet.frame_count,
            columns: sheet.columns,
            rows: sheet.rows,
            frame_width: sheet.frame_width,
            frame_height: sheet.frame_height,
            content_hash,
        })
    }
}

/// Drop the scratch root once every asset directory under it is gone
fn remove_if_empty(dir: &Path) {
    let empty = std::fs::read_dir(dir)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(false);
    if empty {
        if let Err(e) = std::fs::remove_dir(dir) {
            log::warn!("could not remove scratch root {}: {}", dir.display(), e);
        }
    }
}

fn at(stage: Stage) -> impl Fn(SheetsmithError) -> (Stage, SheetsmithError) {
    move |error| (stage, error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::extract::collect_numbered_frames;
    use crate::process::{EdgeKeyRemover, FfmpegExtractor, FrameExtractor, KeepBackground};
    use crate::request::AnimationParams;
    use crate::sheet::SheetMetadata;
    use crate::stub::{StubBehavior, StubService};
    use image::{Rgba, RgbaImage};

    /// Writes `count` numbered frames, frame N filled with red channel N
    struct NumberedExtractor {
        count: u8,
    }

    impl FrameExtractor for NumberedExtractor {
        fn name(&self) -> &str {
            "numbered"
        }

        fn extract(&self, input: &Path, output_dir: &Path, width: u32, height: u32) -> Result<Vec<PathBuf>> {
            assert_eq!(std::fs::read(input).unwrap(), b"stub video container");
            std::fs::create_dir_all(output_dir)?;
            // written out of order so the read-back has to sort
            for i in (1..=self.count).rev() {
                RgbaImage::from_pixel(width, height, Rgba([i, 0, 0, 255]))
                    .save(output_dir.join(format!("frame_{:04}.png", i)))
                    .unwrap();
            }
            collect_numbered_frames(output_dir)
        }
    }

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("sheetsmith_pipeline_test_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn test_config(root: &Path) -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.output.output_root = root.join("sprites");
        config.output.scratch_root = Some(root.join("scratch"));
        config.service.poll_interval_ms = 5;
        config.service.poll_timeout_secs = 2;
        config
    }

    fn pipeline(root: &Path, behavior: StubBehavior) -> Pipeline<StubService> {
        let processor = PostProcessor::new(
            Box::new(EdgeKeyRemover::default()),
            Box::new(FfmpegExtractor::new("ffmpeg")),
        );
        Pipeline::new(test_config(root), StubService::with_behavior(behavior), processor)
    }

    #[test]
    fn test_mummy_walk_end_to_end() {
        let root = temp_dir();
        let pipeline = pipeline(
            &root,
            StubBehavior {
                frame_size: (64, 64),
                pending_polls: 2,
                ..Default::default()
            },
        );
        let request = AssetRequest::still(
            "mummy_walk",
            "mummy shambling walk cycle, dragging feet, loose bandages",
            64,
            64,
            8,
        );

        let report = pipeline.run_batch(&[request]);
        assert!(report.all_succeeded());
        let outcome = &report.outcomes[0];
        assert_eq!(outcome.job_id.as_deref(), Some("stub-1"));
        assert!(outcome.seed.is_some());

        let sheet = outcome.sheet().unwrap();
        assert_eq!((sheet.columns, sheet.rows), (4, 2));
        assert_eq!(sheet.frame_count, 8);
        assert_eq!(sheet.sheet_path, root.join("sprites").join("mummy_walk_spritesheet.png"));

        let img = image::open(&sheet.sheet_path).unwrap().to_rgba8();
        assert_eq!(img.dimensions(), (256, 128));
        assert_eq!(img.get_pixel(0, 0)[3], 0);
        assert_eq!(img.get_pixel(32, 32)[3], 255);

        let metadata: SheetMetadata =
            serde_json::from_str(&std::fs::read_to_string(&sheet.metadata_path).unwrap()).unwrap();
        assert_eq!(metadata.frame_count, 8);
        assert_eq!(metadata.godot_import_settings.hframes, 4);
        assert_eq!(metadata.godot_import_settings.vframes, 2);
        assert_eq!(metadata.source_files[0], "mummy_walk_00001_.png");
        assert_eq!(metadata.source_files[7], "mummy_walk_00008_.png");
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_failed_asset_does_not_stop_batch() {
        let root = temp_dir();
        let pipeline = pipeline(
            &root,
            StubBehavior {
                failing_fetch_keys: vec!["scarab_idle".to_string()],
                ..Default::default()
            },
        );
        let requests = vec![
            AssetRequest::still("pharaoh_idle", "pharaoh standing", 32, 32, 2),
            AssetRequest::still("scarab_idle", "scarab beetle", 32, 32, 3),
            AssetRequest::still("sphinx_idle", "sphinx resting", 32, 32, 1),
        ];

        let report = pipeline.run_batch(&requests);
        assert_eq!(report.outcomes.len(), 3);
        assert_eq!(report.succeeded(), 2);
        assert!(report.outcomes[0].is_success());
        assert!(report.outcomes[2].is_success());
        match &report.outcomes[1].status {
            AssetStatus::Failed { stage, error } => {
                assert_eq!(*stage, Stage::Fetch);
                assert!(matches!(error, SheetsmithError::ArtifactUnavailable(_)));
            }
            other => panic!("expected fetch failure, got {:?}", other),
        }
        assert_eq!(
            pipeline.service().submitted_keys(),
            vec!["pharaoh_idle", "scarab_idle", "sphinx_idle"]
        );
        // all three artifacts of the failing asset were still attempted
        let scarab_fetches = pipeline
            .service()
            .fetched()
            .iter()
            .filter(|f| f.starts_with("scarab_idle"))
            .count();
        assert_eq!(scarab_fetches, 3);
        assert!(!root.join("sprites").join("scarab_idle_metadata.json").exists());
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_stage_attribution() {
        let root = temp_dir();
        let pipeline = pipeline(
            &root,
            StubBehavior {
                failed_keys: vec!["broken".to_string()],
                malformed_keys: vec!["garbled".to_string()],
                ..Default::default()
            },
        );
        let requests = vec![
            AssetRequest::still("", "no key", 32, 32, 1),
            AssetRequest::still("broken", "x", 32, 32, 1),
            AssetRequest::still("garbled", "x", 32, 32, 1),
        ];

        let report = pipeline.run_batch(&requests);
        let stages: Vec<(Stage, &str)> = report
            .outcomes
            .iter()
            .map(|o| match &o.status {
                AssetStatus::Failed { stage, error } => (*stage, error.kind()),
                AssetStatus::Succeeded(_) => panic!("{} should fail", o.asset_key),
            })
            .collect();
        assert_eq!(
            stages,
            vec![
                (Stage::Describe, "invalid_request"),
                (Stage::Poll, "job_failed"),
                (Stage::Poll, "malformed_completion"),
            ]
        );
        // the invalid request never reached the service
        assert_eq!(pipeline.service().submitted_keys(), vec!["broken", "garbled"]);
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_unreachable_service_fails_submit() {
        let root = temp_dir();
        let pipeline = pipeline(
            &root,
            StubBehavior {
                unreachable: true,
                ..Default::default()
            },
        );
        let report = pipeline.run_batch(&[
            AssetRequest::still("a", "x", 16, 16, 1),
            AssetRequest::still("b", "x", 16, 16, 1),
        ]);
        assert_eq!(report.failed(), 2);
        for outcome in &report.outcomes {
            assert!(outcome.job_id.is_none());
            assert!(matches!(
                outcome.status,
                AssetStatus::Failed {
                    stage: Stage::Submit,
                    error: SheetsmithError::ServiceUnavailable(_)
                }
            ));
        }
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let root = temp_dir();
        let pipeline = pipeline(&root, StubBehavior::default());
        let report = pipeline.run_batch(&[
            AssetRequest::still("torch", "x", 16, 16, 1),
            AssetRequest::still("torch", "y", 16, 16, 1),
        ]);
        assert!(report.outcomes[0].is_success());
        assert!(matches!(
            report.outcomes[1].status,
            AssetStatus::Failed {
                stage: Stage::Describe,
                error: SheetsmithError::InvalidRequest(_)
            }
        ));
        assert_eq!(pipeline.service().submitted_keys(), vec!["torch"]);
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_timeout_reported_on_outcome() {
        let root = temp_dir();
        let mut config = test_config(&root);
        config.service.poll_timeout_secs = 0;
        let pipeline = Pipeline::new(
            config,
            StubService::with_behavior(StubBehavior {
                never_completes: true,
                ..Default::default()
            }),
            PostProcessor::new(Box::new(KeepBackground), Box::new(FfmpegExtractor::default())),
        );
        let report = pipeline.run_batch(&[AssetRequest::still("slow", "x", 16, 16, 1)]);
        assert!(matches!(
            report.outcomes[0].status,
            AssetStatus::Failed {
                stage: Stage::Poll,
                error: SheetsmithError::TimedOut { .. }
            }
        ));
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_scratch_removed_after_each_asset() {
        let root = temp_dir();
        let pipeline = pipeline(&root, StubBehavior::default());
        let report = pipeline.run_batch(&[
            AssetRequest::still("lamp", "oil lamp", 16, 16, 2),
            AssetRequest::still("urn", "canopic urn", 16, 16, 2),
        ]);
        assert!(report.all_succeeded());

        assert!(!root.join("scratch").exists());
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_default_scratch_root_not_left_beside_sheets() {
        let root = temp_dir();
        let mut config = test_config(&root);
        config.output.scratch_root = None;
        let pipeline = Pipeline::new(
            config,
            StubService::new(),
            PostProcessor::new(Box::new(KeepBackground), Box::new(FfmpegExtractor::default())),
        );
        let report = pipeline.run_batch(&[AssetRequest::still("lamp", "oil lamp", 16, 16, 1)]);
        assert!(report.all_succeeded());

        let sprites = root.join("sprites");
        assert!(sprites.join("lamp_spritesheet.png").exists());
        assert!(!sprites.join(".scratch").exists());
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_animated_asset_end_to_end() {
        let root = temp_dir();
        let pipeline = Pipeline::new(
            test_config(&root),
            StubService::with_behavior(StubBehavior {
                video_for_animations: true,
                ..Default::default()
            }),
            PostProcessor::new(Box::new(KeepBackground), Box::new(NumberedExtractor { count: 6 })),
        );
        let request = AssetRequest::still("anubis_spell", "anubis casting a spell", 32, 32, 6)
            .animated(AnimationParams::default());

        let report = pipeline.run_batch(&[request]);
        assert!(report.all_succeeded());
        assert_eq!(pipeline.service().fetched(), vec!["anubis_spell_00001.mp4"]);

        let sheet = report.outcomes[0].sheet().unwrap();
        assert_eq!((sheet.columns, sheet.rows), (4, 2));
        assert_eq!(sheet.frame_count, 6);

        let metadata: SheetMetadata =
            serde_json::from_str(&std::fs::read_to_string(&sheet.metadata_path).unwrap()).unwrap();
        assert_eq!(metadata.fps, Some(12));
        assert_eq!(metadata.looping, Some(true));
        let expected: Vec<String> = (1..=6)
            .map(|i| format!("anubis_spell_00001.mp4#frame_{:04}.png", i))
            .collect();
        assert_eq!(metadata.source_files, expected);

        // tile N carries frame N
        let img = image::open(&sheet.sheet_path).unwrap().to_rgba8();
        for index in 0..6u32 {
            let (x, y) = ((index % 4) * 32, (index / 4) * 32);
            assert_eq!(img.get_pixel(x + 5, y + 5).0, [index as u8 + 1, 0, 0, 255]);
        }
        // the two unused tiles stay transparent
        assert_eq!(img.get_pixel(2 * 32 + 5, 32 + 5)[3], 0);

        assert!(!root.join("scratch").exists());
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_style_suffix_rotates_per_asset() {
        let root = temp_dir();
        let mut config = test_config(&root);
        config.template.style_suffixes = vec!["pixel art".to_string(), "isometric".to_string()];
        let pipeline = Pipeline::new(
            config,
            StubService::new(),
            PostProcessor::new(Box::new(KeepBackground), Box::new(FfmpegExtractor::default())),
        );
        let report = pipeline.run_batch(&[
            AssetRequest::still("ankh", "ankh", 16, 16, 1),
            AssetRequest::still("urn", "urn", 16, 16, 1),
            AssetRequest::still("lamp", "lamp", 16, 16, 1),
        ]);
        let prompts: Vec<&str> = report
            .outcomes
            .iter()
            .map(|o| o.prompt.as_deref().unwrap())
            .collect();
        assert_eq!(prompts, vec!["ankh, pixel art", "urn, isometric", "lamp, pixel art"]);
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_scratch_dir_naming() {
        let root = temp_dir();
        let path = {
            let scratch = ScratchDir::create(&root, "anubis_spell", 3).unwrap();
            let name = scratch.path().file_name().unwrap().to_string_lossy().to_string();
            assert!(name.starts_with("anubis_spell-3-"));
            assert!(scratch.path().is_dir());
            scratch.path().to_path_buf()
        };
        assert!(!path.exists());
        std::fs::remove_dir_all(&root).ok();
    }
}
