//! Error types for Sheetsmith

use thiserror::Error;

/// The main error type for pipeline operations
#[derive(Debug, Error)]
pub enum SheetsmithError {
    /// Bad request shape, reported before any I/O happens
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Inference service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Inference service rejected the job: {0}")]
    ServiceRejected(String),

    #[error("Malformed completion for job {job_id}: {reason}")]
    MalformedCompletion { job_id: String, reason: String },

    #[error("Job {job_id} timed out after {elapsed_secs:.1}s")]
    TimedOut { job_id: String, elapsed_secs: f64 },

    #[error("Job {job_id} failed on the service: {reason}")]
    JobFailed { job_id: String, reason: String },

    #[error("Artifact unavailable: {0}")]
    ArtifactUnavailable(String),

    #[error("Frame extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("Sheet composition failed: {0}")]
    CompositionFailed(String),

    #[error("Image error: {0}")]
    ImageError(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParseError(String),

    #[error("TOML serialization error: {0}")]
    TomlSerError(String),

    #[error("JSON error: {0}")]
    JsonError(String),
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, SheetsmithError>;

impl From<toml::de::Error> for SheetsmithError {
    fn from(err: toml::de::Error) -> Self {
        SheetsmithError::TomlParseError(err.to_string())
    }
}

impl From<toml::ser::Error> for SheetsmithError {
    fn from(err: toml::ser::Error) -> Self {
        SheetsmithError::TomlSerError(err.to_string())
    }
}

impl From<serde_json::Error> for SheetsmithError {
    fn from(err: serde_json::Error) -> Self {
        SheetsmithError::JsonError(err.to_string())
    }
}

impl SheetsmithError {
    /// Short machine-friendly name of the error kind, used in reports
    pub fn kind(&self) -> &'static str {
        match self {
            SheetsmithError::InvalidRequest(_) => "invalid_request",
            SheetsmithError::ServiceUnavailable(_) => "service_unavailable",
            SheetsmithError::ServiceRejected(_) => "service_rejected",
            SheetsmithError::MalformedCompletion { .. } => "malformed_completion",
            SheetsmithError::TimedOut { .. } => "timed_out",
            SheetsmithError::JobFailed { .. } => "job_failed",
            SheetsmithError::ArtifactUnavailable(_) => "artifact_unavailable",
            SheetsmithError::ExtractionFailed(_) => "extraction_failed",
            SheetsmithError::CompositionFailed(_) => "composition_failed",
            SheetsmithError::ImageError(_) => "image",
            SheetsmithError::ConfigError(_) => "config",
            SheetsmithError::IoError(_) => "io",
            SheetsmithError::TomlParseError(_) | SheetsmithError::TomlSerError(_) => "toml",
            SheetsmithError::JsonError(_) => "json",
        }
    }
}
