//! HTTP client for a ComfyUI-style inference queue
//!
//! Endpoints used:
//! - `POST /prompt` submits a node graph and answers with a `prompt_id`
//! - `GET /history/{id}` lists outputs once the job has finished
//! - `GET /view?filename=&subfolder=&type=` serves artifact bytes
//! - `GET /system_stats` answers health checks
//!
//! Nothing here retries; callers decide what a failure means for the asset.

use crate::descriptor::JobDescriptor;
use crate::service::*;
use serde_json::Value;
use sheetsmith_core::{Result, SheetsmithError};
use std::time::Duration;

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

/// Client for one inference service endpoint
pub struct ComfyClient {
    base_url: String,
    agent: ureq::Agent,
}

impl ComfyClient {
    pub fn new(endpoint: &str, request_timeout: Duration) -> Self {
        Self {
            base_url: endpoint.trim_end_matches('/').to_string(),
            agent: build_agent(request_timeout),
        }
    }

    /// Create a client from resolved configuration
    pub fn from_config(config: &crate::config::PipelineConfig) -> Self {
        Self::new(&config.service.endpoint, config.request_timeout())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn get_json(&self, path: &str) -> std::result::Result<Value, ureq::Error> {
        let mut response = self.agent.get(&self.url(path)).call()?;
        response.body_mut().read_json::<Value>()
    }
}

impl Default for ComfyClient {
    fn default() -> Self {
        Self::new(
            "http://127.0.0.1:8188",
            Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        )
    }
}

impl InferenceService for ComfyClient {
    fn name(&self) -> &str {
        "comfyui"
    }

    fn health_check(&self) -> Result<ServiceStatus> {
        match self.get_json("/system_stats") {
            Ok(_) => Ok(ServiceStatus::Available),
            Err(e) => Ok(ServiceStatus::Unavailable(format!("{}: {}", self.base_url, e))),
        }
    }

    fn submit(&self, descriptor: &JobDescriptor) -> Result<JobHandle> {
        let payload = serde_json::json!({
            "prompt": descriptor.graph(),
            "client_id": descriptor.client_id(),
        });

        let response = self
            .agent
            .post(&self.url("/prompt"))
            .header("Content-Type", "application/json")
            .send_json(&payload);

        let body: Value = match response {
            Ok(mut ok) => ok.body_mut().read_json().map_err(|e| {
                SheetsmithError::ServiceRejected(format!("Unreadable submit response: {}", e))
            })?,
            Err(e) if is_unreachable(&e) => {
                return Err(SheetsmithError::ServiceUnavailable(format!(
                    "{}: {}",
                    self.base_url, e
                )));
            }
            Err(e) => {
                return Err(SheetsmithError::ServiceRejected(format!(
                    "Submit failed: {}",
                    e
                )));
            }
        };

        let job_id = parse_submit_response(&body)?;
        log::debug!("{}: accepted job {}", descriptor.asset_key(), job_id);
        Ok(JobHandle::new(job_id))
    }

    fn status(&self, job_id: &str) -> Result<StatusReport> {
        let body = self
            .get_json(&format!("/history/{}", job_id))
            .map_err(|e| {
                SheetsmithError::ServiceUnavailable(format!("History query failed: {}", e))
            })?;
        parse_history(job_id, &body)
    }

    fn fetch_bytes(&self, artifact: &ArtifactRef) -> Result<Vec<u8>> {
        let response = self
            .agent
            .get(&self.url("/view"))
            .query("filename", &artifact.filename)
            .query("subfolder", &artifact.subfolder)
            .query("type", &artifact.folder_type)
            .call()
            .map_err(|e| {
                SheetsmithError::ArtifactUnavailable(format!("{}: {}", artifact, e))
            })?;

        let mut reader = response.into_body().into_reader();
        let mut bytes = Vec::new();
        std::io::Read::read_to_end(&mut reader, &mut bytes).map_err(|e| {
            SheetsmithError::ArtifactUnavailable(format!("{}: failed to read body: {}", artifact, e))
        })?;

        if bytes.is_empty() {
            return Err(SheetsmithError::ArtifactUnavailable(format!(
                "{}: empty body",
                artifact
            )));
        }
        Ok(bytes)
    }
}

fn build_agent(timeout: Duration) -> ureq::Agent {
    let config = ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .build();
    config.into()
}

/// Errors meaning the service could not be reached at all
fn is_unreachable(e: &ureq::Error) -> bool {
    matches!(
        e,
        ureq::Error::Timeout(_)
            | ureq::Error::Io(_)
            | ureq::Error::ConnectionFailed
            | ureq::Error::HostNotFound
    )
}

/// Extract the job identifier from a submit acknowledgement
pub fn parse_submit_response(body: &Value) -> Result<String> {
    if let Some(id) = body.get("prompt_id").and_then(|v| v.as_str()) {
        if !id.is_empty() {
            return Ok(id.to_string());
        }
    }

    let detail = match body.get("node_errors").and_then(|v| v.as_object()) {
        Some(errors) if !errors.is_empty() => format!(
            "node errors: {}",
            serde_json::to_string(errors).unwrap_or_default()
        ),
        _ => match body.get("error") {
            Some(err) => format!("error: {}", err),
            None => "acknowledgement has no prompt_id".to_string(),
        },
    };
    Err(SheetsmithError::ServiceRejected(detail))
}

/// Interpret a `/history/{id}` payload.
///
/// A job absent from the index is still pending. Once present, the entry must
/// carry a well-formed `outputs` table; anything else is `MalformedCompletion`.
pub fn parse_history(job_id: &str, body: &Value) -> Result<StatusReport> {
    let index = body.as_object().ok_or_else(|| {
        SheetsmithError::JsonError("history payload is not an object".to_string())
    })?;

    let Some(entry) = index.get(job_id) else {
        return Ok(StatusReport::Pending);
    };

    let malformed = |reason: &str| SheetsmithError::MalformedCompletion {
        job_id: job_id.to_string(),
        reason: reason.to_string(),
    };

    if let Some(status) = entry.get("status") {
        if status.get("status_str").and_then(|s| s.as_str()) == Some("error") {
            return Ok(StatusReport::Failed(execution_error_message(status)));
        }
    }

    let outputs = entry
        .get("outputs")
        .and_then(|o| o.as_object())
        .ok_or_else(|| malformed("entry has no outputs table"))?;

    // node ids are numeric strings; order them numerically for a stable artifact order
    let mut node_ids: Vec<&String> = outputs.keys().collect();
    node_ids.sort_by_key(|id| (id.parse::<u64>().unwrap_or(u64::MAX), id.to_string()));

    let mut artifacts = Vec::new();
    for node_id in node_ids {
        let node = outputs[node_id.as_str()]
            .as_object()
            .ok_or_else(|| malformed(&format!("output of node {} is not an object", node_id)))?;

        for tag in ["images", "gifs", "videos"] {
            let Some(list) = node.get(tag) else {
                continue;
            };
            let kind = ArtifactKind::from_output_tag(tag)
                .ok_or_else(|| malformed(&format!("unclassified output tag '{}'", tag)))?;
            let list = list
                .as_array()
                .ok_or_else(|| malformed(&format!("node {} '{}' is not a list", node_id, tag)))?;

            for item in list {
                let filename = item
                    .get("filename")
                    .and_then(|f| f.as_str())
                    .filter(|f| !f.is_empty())
                    .ok_or_else(|| {
                        malformed(&format!("node {} lists an artifact without a filename", node_id))
                    })?;
                artifacts.push(ArtifactRef {
                    filename: filename.to_string(),
                    subfolder: item
                        .get("subfolder")
                        .and_then(|s| s.as_str())
                        .unwrap_or("")
                        .to_string(),
                    kind,
                    folder_type: item
                        .get("type")
                        .and_then(|t| t.as_str())
                        .unwrap_or("output")
                        .to_string(),
                });
            }
        }
    }

    if artifacts.is_empty() {
        return Err(malformed("job completed without image or video outputs"));
    }
    Ok(StatusReport::Complete(artifacts))
}

fn execution_error_message(status: &Value) -> String {
    status
        .get("messages")
        .and_then(|m| m.as_array())
        .and_then(|messages| {
            messages.iter().find_map(|msg| {
                let pair = msg.as_array()?;
                if pair.first()?.as_str()? != "execution_error" {
                    return None;
                }
                pair.get(1)?
                    .get("exception_message")
                    .and_then(|e| e.as_str())
                    .map(|e| e.trim().to_string())
            })
        })
        .unwrap_or_else(|| "execution error".to_string())
}
