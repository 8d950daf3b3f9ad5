//! In-process inference service
//!
//! Answers jobs with generated placeholder frames instead of calling a
//! remote queue: a flat backdrop with a solid figure in the middle, coloured
//! from the asset key so neighbouring frames are easy to tell apart.
//! `StubBehavior` scripts the failure modes the pipeline must survive.

use crate::descriptor::JobDescriptor;
use crate::service::*;
use sheetsmith_core::{Result, SheetsmithError};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;

/// Backdrop colour of stub frames (the key colour background removal strips)
pub const STUB_BACKDROP: [u8; 4] = [255, 0, 255, 255];

/// Scripted behaviour for `StubService`
#[derive(Debug, Clone)]
pub struct StubBehavior {
    /// Every submit fails with `ServiceUnavailable`
    pub unreachable: bool,
    /// Status queries per job that report pending before completion
    pub pending_polls: u32,
    /// Jobs never leave the pending state
    pub never_completes: bool,
    /// The first N status queries fail as transient network errors
    pub transient_failures: u32,
    /// Pixel size of generated stills
    pub frame_size: (u32, u32),
    /// Animated jobs answer with one video artifact instead of stills
    pub video_for_animations: bool,
    /// Asset keys whose second artifact cannot be downloaded
    pub failing_fetch_keys: Vec<String>,
    /// Asset keys whose completed entry is malformed
    pub malformed_keys: Vec<String>,
    /// Asset keys whose job fails on the service
    pub failed_keys: Vec<String>,
}

impl Default for StubBehavior {
    fn default() -> Self {
        Self {
            unreachable: false,
            pending_polls: 0,
            never_completes: false,
            transient_failures: 0,
            frame_size: (96, 96),
            video_for_animations: false,
            failing_fetch_keys: Vec::new(),
            malformed_keys: Vec::new(),
            failed_keys: Vec::new(),
        }
    }
}

#[derive(Debug)]
struct StubJob {
    asset_key: String,
    frame_count: u32,
    animated: bool,
    polls: u32,
}

/// Inference service that never leaves the process
#[derive(Default)]
pub struct StubService {
    behavior: StubBehavior,
    jobs: RefCell<HashMap<String, StubJob>>,
    next_id: Cell<u64>,
    status_calls: Cell<u32>,
    fetched: RefCell<Vec<String>>,
}

impl StubService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_behavior(behavior: StubBehavior) -> Self {
        Self {
            behavior,
            ..Self::default()
        }
    }

    /// Number of status queries answered so far
    pub fn status_calls(&self) -> u32 {
        self.status_calls.get()
    }

    /// Filenames requested through `fetch_bytes`, in call order
    pub fn fetched(&self) -> Vec<String> {
        self.fetched.borrow().clone()
    }

    /// Asset keys submitted so far, in submission order
    pub fn submitted_keys(&self) -> Vec<String> {
        let jobs = self.jobs.borrow();
        let mut entries: Vec<(&String, &StubJob)> = jobs.iter().collect();
        entries.sort_by_key(|(id, _)| job_number(id));
        entries.into_iter().map(|(_, job)| job.asset_key.clone()).collect()
    }

    fn artifacts_for(&self, job: &StubJob) -> Vec<ArtifactRef> {
        if job.animated && self.behavior.video_for_animations {
            return vec![ArtifactRef {
                filename: format!("{}_00001.mp4", job.asset_key),
                subfolder: String::new(),
                kind: ArtifactKind::Video,
                folder_type: "output".to_string(),
            }];
        }
        (1..=job.frame_count)
            .map(|i| ArtifactRef::new(format!("{}_{:05}_.png", job.asset_key, i), ArtifactKind::Still))
            .collect()
    }
}

fn job_number(job_id: &str) -> u64 {
    job_id
        .rsplit('-')
        .next()
        .and_then(|n| n.parse().ok())
        .unwrap_or(u64::MAX)
}

impl InferenceService for StubService {
    fn name(&self) -> &str {
        "stub"
    }

    fn health_check(&self) -> Result<ServiceStatus> {
        if self.behavior.unreachable {
            return Ok(ServiceStatus::Unavailable("stub configured unreachable".to_string()));
        }
        Ok(ServiceStatus::Available)
    }

    fn submit(&self, descriptor: &JobDescriptor) -> Result<JobHandle> {
        if self.behavior.unreachable {
            return Err(SheetsmithError::ServiceUnavailable(
                "connection refused".to_string(),
            ));
        }
        let id = self.next_id.get() + 1;
        self.next_id.set(id);
        let job_id = format!("stub-{}", id);

        self.jobs.borrow_mut().insert(
            job_id.clone(),
            StubJob {
                asset_key: descriptor.asset_key().to_string(),
                frame_count: descriptor.frame_count(),
                animated: descriptor.is_animated(),
                polls: 0,
            },
        );
        Ok(JobHandle::new(job_id))
    }

    fn status(&self, job_id: &str) -> Result<StatusReport> {
        let call = self.status_calls.get() + 1;
        self.status_calls.set(call);

        if call <= self.behavior.transient_failures {
            return Err(SheetsmithError::ServiceUnavailable(
                "connection reset by peer".to_string(),
            ));
        }

        let mut jobs = self.jobs.borrow_mut();
        let Some(job) = jobs.get_mut(job_id) else {
            return Ok(StatusReport::Pending);
        };
        job.polls += 1;

        if self.behavior.never_completes || job.polls <= self.behavior.pending_polls {
            return Ok(StatusReport::Pending);
        }
        if self.behavior.failed_keys.contains(&job.asset_key) {
            return Ok(StatusReport::Failed("stub execution error".to_string()));
        }
        if self.behavior.malformed_keys.contains(&job.asset_key) {
            return Err(SheetsmithError::MalformedCompletion {
                job_id: job_id.to_string(),
                reason: "entry has no outputs table".to_string(),
            });
        }
        Ok(StatusReport::Complete(self.artifacts_for(job)))
    }

    fn fetch_bytes(&self, artifact: &ArtifactRef) -> Result<Vec<u8>> {
        self.fetched.borrow_mut().push(artifact.filename.clone());

        let failing = self.behavior.failing_fetch_keys.iter().any(|key| {
            artifact.filename == format!("{}_{:05}_.png", key, 2)
        });
        if failing {
            return Err(SheetsmithError::ArtifactUnavailable(format!(
                "{}: HTTP 404",
                artifact
            )));
        }

        match artifact.kind {
            ArtifactKind::Video => Ok(b"stub video container".to_vec()),
            ArtifactKind::Still => {
                let (width, height) = self.behavior.frame_size;
                placeholder_png(&artifact.filename, width, height)
            }
        }
    }
}

/// Encode a placeholder frame: magenta backdrop, a solid figure in the centre
pub fn placeholder_png(name: &str, width: u32, height: u32) -> Result<Vec<u8>> {
    let hash_val = name
        .bytes()
        .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));
    let figure = image::Rgba([
        ((hash_val >> 16) & 0x7F) as u8,
        ((hash_val >> 8) & 0xFF) as u8,
        (hash_val & 0x7F) as u8,
        255,
    ]);

    let mut img = image::RgbaImage::from_pixel(width, height, image::Rgba(STUB_BACKDROP));
    let (x0, x1) = (width / 4, width - width / 4);
    let (y0, y1) = (height / 4, height - height / 4);
    for y in y0..y1 {
        for x in x0..x1 {
            img.put_pixel(x, y, figure);
        }
    }

    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
        .map_err(|e| SheetsmithError::ImageError(format!("Failed to encode PNG: {}", e)))?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{build_descriptor, GenerationTemplate};
    use crate::request::AssetRequest;

    fn descriptor(key: &str, frames: u32) -> JobDescriptor {
        let request = AssetRequest::still(key, "test sprite", 32, 32, frames);
        build_descriptor(&request, &GenerationTemplate::default()).unwrap()
    }

    #[test]
    fn test_stub_completes_with_one_still_per_frame() {
        let service = StubService::new();
        let handle = service.submit(&descriptor("player_idle", 3)).unwrap();

        let StatusReport::Complete(artifacts) = service.status(&handle.job_id).unwrap() else {
            panic!("expected completion");
        };
        assert_eq!(artifacts.len(), 3);
        assert_eq!(artifacts[0].filename, "player_idle_00001_.png");
        assert!(artifacts.iter().all(|a| a.kind == ArtifactKind::Still));

        let png = service.fetch_bytes(&artifacts[0]).unwrap();
        let img = image::load_from_memory(&png).unwrap();
        assert_eq!((img.width(), img.height()), (96, 96));
    }

    #[test]
    fn test_stub_pending_then_complete() {
        let service = StubService::with_behavior(StubBehavior {
            pending_polls: 2,
            ..Default::default()
        });
        let handle = service.submit(&descriptor("a", 1)).unwrap();
        assert_eq!(service.status(&handle.job_id).unwrap(), StatusReport::Pending);
        assert_eq!(service.status(&handle.job_id).unwrap(), StatusReport::Pending);
        assert!(matches!(
            service.status(&handle.job_id).unwrap(),
            StatusReport::Complete(_)
        ));
        assert_eq!(service.status_calls(), 3);
    }

    #[test]
    fn test_stub_unreachable() {
        let service = StubService::with_behavior(StubBehavior {
            unreachable: true,
            ..Default::default()
        });
        assert!(matches!(
            service.submit(&descriptor("a", 1)),
            Err(SheetsmithError::ServiceUnavailable(_))
        ));
    }

    #[test]
    fn test_submitted_keys_keep_order() {
        let service = StubService::new();
        for key in ["one", "two", "three", "four", "five", "six", "seven", "eight", "nine", "ten"] {
            service.submit(&descriptor(key, 1)).unwrap();
        }
        assert_eq!(
            service.submitted_keys(),
            vec!["one", "two", "three", "four", "five", "six", "seven", "eight", "nine", "ten"]
        );
    }
}
