//! Build manifest for tracking generated sheets
//!
//! Records every asset of a batch with its provenance (job, prompt, seed) and
//! the hash of the written sheet, so a regenerated sheet can be audited or
//! reproduced later.

use crate::pipeline::{AssetStatus, BatchReport, Stage};
use serde::{Deserialize, Serialize};
use sheetsmith_core::{Result, SheetsmithError};
use std::path::Path;

pub const MANIFEST_FILE_NAME: &str = "build_manifest.toml";

/// A record of a single requested asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub asset_key: String,
    pub status: EntryStatus,
    #[serde(default)]
    pub stage: Option<Stage>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub sheet_path: Option<String>,
    #[serde(default)]
    pub metadata_path: Option<String>,
    #[serde(default)]
    pub content_hash: Option<String>,
    pub duration_secs: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Succeeded,
    Failed,
}

/// Build manifest for one batch run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildManifest {
    pub generated_at: String,
    pub service: String,
    pub succeeded: usize,
    pub failed: usize,
    pub entries: Vec<ManifestEntry>,
}

/// TOML wrapper
#[derive(Debug, Serialize, Deserialize)]
struct ManifestFile {
    manifest: BuildManifest,
}

impl BuildManifest {
    /// Manifest describing a finished batch
    pub fn from_report(report: &BatchReport, service: &str) -> Self {
        let entries = report
            .outcomes
            .iter()
            .map(|outcome| {
                let mut entry = ManifestEntry {
                    asset_key: outcome.asset_key.clone(),
                    status: EntryStatus::Succeeded,
                    stage: None,
                    error: None,
                    job_id: outcome.job_id.clone(),
                    seed: outcome.seed,
                    prompt: outcome.prompt.clone(),
                    sheet_path: None,
                    metadata_path: None,
                    content_hash: None,
                    duration_secs: outcome.duration_secs,
                };
                match &outcome.status {
                    AssetStatus::Succeeded(sheet) => {
                        entry.sheet_path = Some(sheet.sheet_path.display().to_string());
                        entry.metadata_path = Some(sheet.metadata_path.display().to_string());
                        entry.content_hash = Some(sheet.content_hash.to_prefixed_hex());
                    }
                    AssetStatus::Failed { stage, error } => {
                        entry.status = EntryStatus::Failed;
                        entry.stage = Some(*stage);
                        entry.error = Some(error.to_string());
                    }
                }
                entry
            })
            .collect();

        Self {
            generated_at: report.finished_at.to_rfc3339(),
            service: service.to_string(),
            succeeded: report.succeeded(),
            failed: report.failed(),
            entries,
        }
    }

    pub fn entry(&self, asset_key: &str) -> Option<&ManifestEntry> {
        self.entries.iter().find(|e| e.asset_key == asset_key)
    }

    /// Load manifest from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let file: ManifestFile = toml::from_str(&content).map_err(|e| {
            SheetsmithError::TomlParseError(format!("Failed to parse manifest: {}", e))
        })?;
        Ok(file.manifest)
    }

    /// Save manifest to file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = ManifestFile {
            manifest: self.clone(),
        };
        let content = toml::to_string_pretty(&file)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{AssetOutcome, ProducedSheet};
    use chrono::Utc;
    use sheetsmith_core::ContentHash;
    use std::path::PathBuf;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("sheetsmith_manifest_test_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn report() -> BatchReport {
        BatchReport {
            outcomes: vec![
                AssetOutcome {
                    asset_key: "mummy_walk".to_string(),
                    job_id: Some("4c1a".to_string()),
                    seed: Some(42),
                    prompt: Some("mummy shambling walk cycle".to_string()),
                    duration_secs: 31.5,
                    status: AssetStatus::Succeeded(ProducedSheet {
                        sheet_path: PathBuf::from("sprites/mummy_walk_spritesheet.png"),
                        metadata_path: PathBuf::from("sprites/mummy_walk_metadata.json"),
                        frame_count: 8,
                        columns: 4,
                        rows: 2,
                        frame_width: 64,
                        frame_height: 64,
                        content_hash: ContentHash::from_bytes(b"sheet"),
                    }),
                },
                AssetOutcome {
                    asset_key: "scarab_idle".to_string(),
                    job_id: None,
                    seed: Some(7),
                    prompt: Some("scarab".to_string()),
                    duration_secs: 0.2,
                    status: AssetStatus::Failed {
                        stage: Stage::Submit,
                        error: SheetsmithError::ServiceUnavailable("connection refused".to_string()),
                    },
                },
            ],
            started_at: Utc::now(),
            finished_at: Utc::now(),
        }
    }

    #[test]
    fn test_manifest_from_report() {
        let manifest = BuildManifest::from_report(&report(), "comfyui");
        assert_eq!(manifest.succeeded, 1);
        assert_eq!(manifest.failed, 1);
        assert_eq!(manifest.service, "comfyui");

        let walk = manifest.entry("mummy_walk").unwrap();
        assert_eq!(walk.status, EntryStatus::Succeeded);
        assert!(walk.content_hash.as_deref().unwrap().starts_with("sha256:"));
        assert!(walk.stage.is_none());

        let scarab = manifest.entry("scarab_idle").unwrap();
        assert_eq!(scarab.status, EntryStatus::Failed);
        assert_eq!(scarab.stage, Some(Stage::Submit));
        assert!(scarab.error.as_deref().unwrap().contains("connection refused"));
        assert!(scarab.sheet_path.is_none());
    }

    #[test]
    fn test_manifest_save_and_load() {
        let dir = temp_dir();
        let path = dir.join(MANIFEST_FILE_NAME);

        let manifest = BuildManifest::from_report(&report(), "stub");
        manifest.save(&path).unwrap();
        let loaded = BuildManifest::load(&path).unwrap();
        assert_eq!(loaded, manifest);

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("[manifest]"));
        assert!(raw.contains("stage = \"submit\""));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_load_missing_manifest() {
        let dir = temp_dir();
        assert!(BuildManifest::load(&dir.join("nope.toml")).is_err());
        std::fs::remove_dir_all(&dir).ok();
    }
}
