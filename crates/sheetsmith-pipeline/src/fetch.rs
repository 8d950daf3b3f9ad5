//! Artifact retrieval
//!
//! One request per artifact reference. A failed download is scoped to that
//! artifact: siblings are still fetched, and the caller decides what a gap
//! means for the asset.

use crate::service::{ArtifactRef, InferenceService};
use sheetsmith_core::{Result, SheetsmithError};

/// Bytes retrieved for one artifact reference
#[derive(Debug, Clone)]
pub struct RawArtifact {
    pub artifact: ArtifactRef,
    pub bytes: Vec<u8>,
}

/// Fetch a single artifact. Every failure is reported as `ArtifactUnavailable`.
pub fn fetch<S: InferenceService + ?Sized>(service: &S, artifact: &ArtifactRef) -> Result<RawArtifact> {
    match service.fetch_bytes(artifact) {
        Ok(bytes) if bytes.is_empty() => Err(SheetsmithError::ArtifactUnavailable(format!(
            "{}: empty body",
            artifact
        ))),
        Ok(bytes) => Ok(RawArtifact {
            artifact: artifact.clone(),
            bytes,
        }),
        Err(e @ SheetsmithError::ArtifactUnavailable(_)) => Err(e),
        Err(e) => Err(SheetsmithError::ArtifactUnavailable(format!("{}: {}", artifact, e))),
    }
}

/// Fetch every artifact in order, attempting all of them even after a failure
pub fn fetch_all<S: InferenceService + ?Sized>(
    service: &S,
    artifacts: &[ArtifactRef],
) -> Vec<Result<RawArtifact>> {
    artifacts
        .iter()
        .map(|artifact| {
            let result = fetch(service, artifact);
            match &result {
                Ok(raw) => log::debug!("fetched {} ({} bytes)", artifact, raw.bytes.len()),
                Err(e) => log::warn!("{}", e),
            }
            result
        })
        .collect()
}

/// Sheet composition needs the full ordered set: any gap fails the asset,
/// naming every missing artifact.
pub fn require_all(results: Vec<Result<RawArtifact>>) -> Result<Vec<RawArtifact>> {
    let total = results.len();
    let mut fetched = Vec::with_capacity(total);
    let mut missing = Vec::new();

    for result in results {
        match result {
            Ok(raw) => fetched.push(raw),
            Err(e) => missing.push(e.to_string()),
        }
    }

    if missing.is_empty() {
        Ok(fetched)
    } else {
        Err(SheetsmithError::ArtifactUnavailable(format!(
            "{} of {} artifacts missing: {}",
            missing.len(),
            total,
            missing.join("; ")
        )))
    }
}
