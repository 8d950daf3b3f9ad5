//! Inference service trait and the types exchanged with it

use crate::descriptor::JobDescriptor;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sheetsmith_core::Result;
use std::fmt;

/// What an artifact contains, classified from the service's output-kind tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    /// A single still image
    Still,
    /// A video/animated container that needs frame extraction
    Video,
}

impl ArtifactKind {
    /// Classify an output-kind tag (`images`, `gifs`, `videos`).
    /// Unknown tags are not artifacts we can process.
    pub fn from_output_tag(tag: &str) -> Option<Self> {
        match tag {
            "images" => Some(ArtifactKind::Still),
            "gifs" | "videos" => Some(ArtifactKind::Video),
            _ => None,
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactKind::Still => write!(f, "still"),
            ArtifactKind::Video => write!(f, "video"),
        }
    }
}

/// Pointer into the service's output store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    pub kind: ArtifactKind,
    /// Output store bucket ("output", "temp", ...)
    #[serde(default = "default_folder_type")]
    pub folder_type: String,
}

fn default_folder_type() -> String {
    "output".to_string()
}

impl ArtifactRef {
    pub fn new(filename: impl Into<String>, kind: ArtifactKind) -> Self {
        Self {
            filename: filename.into(),
            subfolder: String::new(),
            kind,
            folder_type: default_folder_type(),
        }
    }

    /// File extension in lowercase, if any
    pub fn extension(&self) -> Option<String> {
        std::path::Path::new(&self.filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.subfolder.is_empty() {
            write!(f, "{} ({})", self.filename, self.kind)
        } else {
            write!(f, "{}/{} ({})", self.subfolder, self.filename, self.kind)
        }
    }
}

/// Accepted job, used as the poll key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub job_id: String,
    pub submitted_at: DateTime<Utc>,
}

impl JobHandle {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            submitted_at: Utc::now(),
        }
    }
}

/// One status query's answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusReport {
    /// Queued or running
    Pending,
    /// Present in the completed-job index, with its artifacts in output order
    Complete(Vec<ArtifactRef>),
    /// The service reported an execution error
    Failed(String),
}

/// Status returned by a service health check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceStatus {
    Available,
    Unavailable(String),
}

/// The remote job queue. Implemented over HTTP by `ComfyClient` and
/// in-process by `StubService`.
pub trait InferenceService {
    /// Service name for logs and reports
    fn name(&self) -> &str;

    /// Check whether the service is reachable
    fn health_check(&self) -> Result<ServiceStatus>;

    /// Submit a job; one outbound request, never retried
    fn submit(&self, descriptor: &JobDescriptor) -> Result<JobHandle>;

    /// Query a job's status once
    fn status(&self, job_id: &str) -> Result<StatusReport>;

    /// Retrieve the bytes behind an artifact reference
    fn fetch_bytes(&self, artifact: &ArtifactRef) -> Result<Vec<u8>>;
}
