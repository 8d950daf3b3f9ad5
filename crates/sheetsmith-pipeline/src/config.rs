//! Layered configuration system
//!
//! Config is loaded with three layers of precedence (highest wins):
//! 1. Environment variables: `SHEETSMITH_SERVICE_URL`, `SHEETSMITH_OUTPUT_ROOT`, `SHEETSMITH_FFMPEG`
//! 2. Project-local: `.sheetsmith/config.toml`
//! 3. Global: `~/.sheetsmith/config.toml`
//!
//! Files are merged table-by-table before deserializing, so a project file
//! only needs to name the keys it changes.

use crate::descriptor::GenerationTemplate;
use crate::sheet::LayoutPolicy;
use serde::{Deserialize, Serialize};
use sheetsmith_core::{Result, SheetsmithError};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_SERVICE_URL: &str = "SHEETSMITH_SERVICE_URL";
pub const ENV_OUTPUT_ROOT: &str = "SHEETSMITH_OUTPUT_ROOT";
pub const ENV_FFMPEG: &str = "SHEETSMITH_FFMPEG";

/// Where jobs go and how long we wait for them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Per-request HTTP timeout
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,
}

fn default_endpoint() -> String {
    "http://127.0.0.1:8188".to_string()
}
fn default_request_timeout() -> u64 {
    60
}
fn default_poll_interval() -> u64 {
    1000
}
fn default_poll_timeout() -> u64 {
    600
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            request_timeout_secs: default_request_timeout(),
            poll_interval_ms: default_poll_interval(),
            poll_timeout_secs: default_poll_timeout(),
        }
    }
}

/// Output locations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Sheets, metadata and the build manifest land here
    #[serde(default = "default_output_root")]
    pub output_root: PathBuf,
    /// Per-asset scratch directories; defaults to `<output_root>/.scratch`
    #[serde(default)]
    pub scratch_root: Option<PathBuf>,
}

fn default_output_root() -> PathBuf {
    PathBuf::from("ai_assets/sprites")
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            output_root: default_output_root(),
            scratch_root: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutKind {
    Grid,
    Strip,
}

/// Sprite sheet layout settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SheetConfig {
    #[serde(default = "default_layout")]
    pub layout: LayoutKind,
    #[serde(default = "default_max_columns")]
    pub max_columns: u32,
}

fn default_layout() -> LayoutKind {
    LayoutKind::Grid
}
fn default_max_columns() -> u32 {
    4
}

impl Default for SheetConfig {
    fn default() -> Self {
        Self {
            layout: default_layout(),
            max_columns: default_max_columns(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackgroundMode {
    /// Key out the border-connected region matching the corner colour
    EdgeKey,
    /// Leave generated pixels untouched
    None,
}

/// Post-processing settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingConfig {
    #[serde(default = "default_background")]
    pub background: BackgroundMode,
    /// Max per-channel distance from the key colour still treated as background
    #[serde(default = "default_key_tolerance")]
    pub key_tolerance: u8,
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg_path: String,
}

fn default_background() -> BackgroundMode {
    BackgroundMode::EdgeKey
}
fn default_key_tolerance() -> u8 {
    24
}
fn default_ffmpeg() -> String {
    "ffmpeg".to_string()
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            background: default_background(),
            key_tolerance: default_key_tolerance(),
            ffmpeg_path: default_ffmpeg(),
        }
    }
}

/// Resolved pipeline configuration, passed explicitly to the orchestrator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub sheet: SheetConfig,
    #[serde(default)]
    pub processing: ProcessingConfig,
    #[serde(default)]
    pub template: GenerationTemplate,
}

impl PipelineConfig {
    /// Load config with layered precedence: global < project < env vars
    pub fn load() -> Result<Self> {
        let mut merged = toml::Table::new();

        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                merge_tables(&mut merged, Self::load_table(&global_path)?);
            }
        }

        let local_path = PathBuf::from(".sheetsmith/config.toml");
        if local_path.exists() {
            merge_tables(&mut merged, Self::load_table(&local_path)?);
        }

        let mut config = Self::from_table(merged)?;
        config.apply_env_overrides();
        config.check()?;
        Ok(config)
    }

    /// Load config from a specific file path only (env overrides still apply)
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let table = Self::load_table(path)?;
        let mut config = Self::from_table(table)?;
        config.apply_env_overrides();
        config.check()?;
        Ok(config)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.service.poll_interval_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.service.poll_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.service.request_timeout_secs)
    }

    pub fn scratch_root(&self) -> PathBuf {
        self.output
            .scratch_root
            .clone()
            .unwrap_or_else(|| self.output.output_root.join(".scratch"))
    }

    pub fn layout_policy(&self) -> LayoutPolicy {
        match self.sheet.layout {
            LayoutKind::Grid => LayoutPolicy::Grid {
                max_columns: self.sheet.max_columns,
            },
            LayoutKind::Strip => LayoutPolicy::Strip,
        }
    }

    /// Reject values no pipeline run could work with
    pub fn check(&self) -> Result<()> {
        if self.service.endpoint.trim().is_empty() {
            return Err(SheetsmithError::ConfigError(
                "service.endpoint must not be empty".to_string(),
            ));
        }
        if self.service.poll_interval_ms == 0 {
            return Err(SheetsmithError::ConfigError(
                "service.poll_interval_ms must be positive".to_string(),
            ));
        }
        if self.sheet.max_columns == 0 {
            return Err(SheetsmithError::ConfigError(
                "sheet.max_columns must be positive".to_string(),
            ));
        }
        Ok(())
    }

    fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".sheetsmith").join("config.toml"))
    }

    fn load_table(path: &Path) -> Result<toml::Table> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str::<toml::Table>(&content).map_err(|e| {
            SheetsmithError::ConfigError(format!(
                "Failed to parse config {}: {}",
                path.display(),
                e
            ))
        })
    }

    fn from_table(table: toml::Table) -> Result<Self> {
        toml::Value::Table(table)
            .try_into()
            .map_err(|e: toml::de::Error| SheetsmithError::ConfigError(e.to_string()))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var(ENV_SERVICE_URL) {
            self.service.endpoint = url;
        }
        if let Ok(root) = std::env::var(ENV_OUTPUT_ROOT) {
            self.output.output_root = PathBuf::from(root);
        }
        if let Ok(ffmpeg) = std::env::var(ENV_FFMPEG) {
            self.processing.ffmpeg_path = ffmpeg;
        }
    }
}

/// Recursively merge `overlay` into `base`; overlay wins on scalar conflicts
fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}
