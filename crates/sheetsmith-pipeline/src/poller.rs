//! Completion polling
//!
//! Blocks the calling thread between ticks. Each tick waits one interval and
//! then queries the service once; the timeout is enforced against wall-clock
//! elapsed time, so slow status responses count against the budget.

use crate::config::PipelineConfig;
use crate::service::{ArtifactRef, InferenceService, StatusReport};
use sheetsmith_core::{Result, SheetsmithError};
use std::time::{Duration, Instant};

/// Lifecycle of a polled job. Terminal states are never revisited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Complete,
    Failed,
    TimedOut,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobStatus::Pending)
    }
}

/// Outcome of waiting for one job
#[derive(Debug, Clone)]
pub struct JobResult {
    pub job_id: String,
    pub status: JobStatus,
    /// Output artifacts in service order; empty unless `Complete`
    pub artifact_refs: Vec<ArtifactRef>,
    /// Service-reported reason when `Failed`
    pub failure: Option<String>,
    pub elapsed: Duration,
    pub polls: u32,
}

impl JobResult {
    /// Convert a non-complete terminal result into the matching error
    pub fn into_artifacts(self) -> Result<Vec<ArtifactRef>> {
        match self.status {
            JobStatus::Complete => Ok(self.artifact_refs),
            JobStatus::TimedOut => Err(SheetsmithError::TimedOut {
                job_id: self.job_id,
                elapsed_secs: self.elapsed.as_secs_f64(),
            }),
            JobStatus::Failed => Err(SheetsmithError::JobFailed {
                job_id: self.job_id,
                reason: self.failure.unwrap_or_else(|| "unknown".to_string()),
            }),
            JobStatus::Pending => Err(SheetsmithError::MalformedCompletion {
                job_id: self.job_id,
                reason: "poll ended without a terminal status".to_string(),
            }),
        }
    }
}

/// Snapshot handed to the progress callback after every tick
#[derive(Debug, Clone)]
pub struct PollProgress<'a> {
    pub job_id: &'a str,
    pub tick: u32,
    pub elapsed: Duration,
    pub timeout: Duration,
    /// Transient failure swallowed on this tick, if any
    pub transient_error: Option<String>,
}

/// Polls a job at a fixed cadence until it finishes or the budget runs out
#[derive(Debug, Clone, Copy)]
pub struct CompletionPoller {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl CompletionPoller {
    pub fn new(poll_interval: Duration, timeout: Duration) -> Self {
        Self {
            poll_interval,
            timeout,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.poll_interval(), config.poll_timeout())
    }

    /// Wait for `job_id` to reach a terminal state.
    ///
    /// Transient query failures are swallowed and retried next tick.
    /// `MalformedCompletion` is not: the job is known complete and waiting
    /// longer will not repair its entry.
    pub fn await_completion<S, F>(&self, service: &S, job_id: &str, mut progress: F) -> Result<JobResult>
    where
        S: InferenceService + ?Sized,
        F: FnMut(&PollProgress<'_>),
    {
        let start = Instant::now();
        let mut tick = 0u32;

        loop {
            let remaining = self.timeout.saturating_sub(start.elapsed());
            std::thread::sleep(self.poll_interval.min(remaining));
            tick += 1;

            let mut transient_error = None;
            match service.status(job_id) {
                Ok(StatusReport::Complete(artifact_refs)) => {
                    log::debug!("job {} complete after {} polls", job_id, tick);
                    return Ok(JobResult {
                        job_id: job_id.to_string(),
                        status: JobStatus::Complete,
                        artifact_refs,
                        failure: None,
                        elapsed: start.elapsed(),
                        polls: tick,
                    });
                }
                Ok(StatusReport::Failed(reason)) => {
                    return Ok(JobResult {
                        job_id: job_id.to_string(),
                        status: JobStatus::Failed,
                        artifact_refs: Vec::new(),
                        failure: Some(reason),
                        elapsed: start.elapsed(),
                        polls: tick,
                    });
                }
                Ok(StatusReport::Pending) => {}
                Err(e @ SheetsmithError::MalformedCompletion { .. }) => return Err(e),
                Err(e) => {
                    log::warn!("status query for job {} failed, retrying: {}", job_id, e);
                    transient_error = Some(e.to_string());
                }
            }

            let elapsed = start.elapsed();
            progress(&PollProgress {
                job_id,
                tick,
                elapsed,
                timeout: self.timeout,
                transient_error,
            });

            if elapsed >= self.timeout {
                return Ok(JobResult {
                    job_id: job_id.to_string(),
                    status: JobStatus::TimedOut,
                    artifact_refs: Vec::new(),
                    failure: None,
                    elapsed,
                    polls: tick,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{build_descriptor, GenerationTemplate};
    use crate::request::AssetRequest;
    use crate::stub::{StubBehavior, StubService};

    fn submit(service: &StubService, key: &str) -> String {
        let request = AssetRequest::still(key, "sprite", 16, 16, 2);
        let descriptor = build_descriptor(&request, &GenerationTemplate::default()).unwrap();
        service.submit(&descriptor).unwrap().job_id
    }

    #[test]
    fn test_completes_after_pending_ticks() {
        let service = StubService::with_behavior(StubBehavior {
            pending_polls: 2,
            ..Default::default()
        });
        let job_id = submit(&service, "player_walk");
        let poller = CompletionPoller::new(Duration::from_millis(1), Duration::from_secs(5));

        let mut ticks = Vec::new();
        let result = poller
            .await_completion(&service, &job_id, |p| ticks.push(p.tick))
            .unwrap();

        assert_eq!(result.status, JobStatus::Complete);
        assert_eq!(result.polls, 3);
        assert_eq!(result.artifact_refs.len(), 2);
        assert_eq!(ticks, vec![1, 2]);
    }

    #[test]
    fn test_one_tick_timeout() {
        let service = StubService::with_behavior(StubBehavior {
            never_completes: true,
            ..Default::default()
        });
        let job_id = submit(&service, "never");
        let interval = Duration::from_millis(50);
        let poller = CompletionPoller::new(interval, interval);

        let result = poller.await_completion(&service, &job_id, |_| {}).unwrap();

        assert_eq!(result.status, JobStatus::TimedOut);
        assert_eq!(result.polls, 1);
        assert_eq!(service.status_calls(), 1);
        assert!(result.elapsed >= interval);
        assert!(result.elapsed < Duration::from_secs(2));
        assert!(matches!(
            result.into_artifacts(),
            Err(SheetsmithError::TimedOut { .. })
        ));
    }

    #[test]
    fn test_transient_failures_are_swallowed() {
        let service = StubService::with_behavior(StubBehavior {
            transient_failures: 2,
            ..Default::default()
        });
        let job_id = submit(&service, "blip");
        let poller = CompletionPoller::new(Duration::from_millis(1), Duration::from_secs(5));

        let mut errors = 0;
        let result = poller
            .await_completion(&service, &job_id, |p| {
                if p.transient_error.is_some() {
                    errors += 1;
                }
            })
            .unwrap();

        assert_eq!(result.status, JobStatus::Complete);
        assert_eq!(errors, 2);
        assert_eq!(result.polls, 3);
    }

    #[test]
    fn test_malformed_completion_surfaces() {
        let service = StubService::with_behavior(StubBehavior {
            malformed_keys: vec!["broken".to_string()],
            ..Default::default()
        });
        let job_id = submit(&service, "broken");
        let poller = CompletionPoller::new(Duration::from_millis(1), Duration::from_secs(5));

        let result = poller.await_completion(&service, &job_id, |_| {});
        assert!(matches!(
            result,
            Err(SheetsmithError::MalformedCompletion { .. })
        ));
        assert_eq!(service.status_calls(), 1);
    }

    #[test]
    fn test_service_failure_is_terminal() {
        let service = StubService::with_behavior(StubBehavior {
            failed_keys: vec!["oom".to_string()],
            ..Default::default()
        });
        let job_id = submit(&service, "oom");
        let poller = CompletionPoller::new(Duration::from_millis(1), Duration::from_secs(5));

        let result = poller.await_completion(&service, &job_id, |_| {}).unwrap();
        assert_eq!(result.status, JobStatus::Failed);
        assert!(result.status.is_terminal());
        assert!(matches!(
            result.into_artifacts(),
            Err(SheetsmithError::JobFailed { .. })
        ));
    }
}
