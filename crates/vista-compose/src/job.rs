//! Job submission and status polling
//!
//! A [`GenerationJob`] is created by [`JobClient::submit`] and only changes
//! when a status document is applied to it. Polling state lives in the job
//! value owned by the caller, so a timed-out or cancelled wait can be resumed
//! later with the same job (or one rebuilt from its id).

use crate::cancel::CancelToken;
use crate::config::{ApiConfig, PollingConfig};
use crate::exchange::{ExchangeKind, ExchangeLog, ExchangeOutcome, ExchangeRequest};
use crate::output::GeneratedImage;
use crate::request::Payload;
use crate::transport::Transport;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use vista_core::{Result, VistaError};

/// Status of a generation job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    /// Map the service's status vocabulary
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pending" | "not_started" | "queued" | "submitted" => Some(JobStatus::Pending),
            "running" | "in_progress" | "processing" => Some(JobStatus::Running),
            "succeeded" | "success" | "completed" | "complete" => Some(JobStatus::Succeeded),
            "failed" | "error" | "cancelled" | "canceled" | "expired" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Succeeded => write!(f, "succeeded"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Reference to one output image of a finished job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRef {
    pub url: String,
    #[serde(default)]
    pub seed: Option<u64>,
}

/// A tracked remote generation job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationJob {
    /// Remote job id
    pub id: String,
    /// Status URL announced by the service, if any
    #[serde(default)]
    pub status_url: Option<String>,
    pub status: JobStatus,
    /// Ordered outputs, filled on success
    #[serde(default)]
    pub outputs: Vec<OutputRef>,
    /// Server-reported reason, filled on failure
    #[serde(default)]
    pub error: Option<String>,
    /// Status documents applied so far
    #[serde(default)]
    pub polls: u32,
    pub submitted_at: DateTime<Utc>,
}

impl GenerationJob {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status_url: None,
            status: JobStatus::Pending,
            outputs: Vec::new(),
            error: None,
            polls: 0,
            submitted_at: Utc::now(),
        }
    }

    /// Rebuild a job from its id to continue polling it
    pub fn resume(id: impl Into<String>) -> Self {
        Self::new(id)
    }

    /// Apply a status document (submit or poll answer) to this job
    pub fn apply(&mut self, doc: &serde_json::Value) {
        if let Some(url) = doc.get("url").and_then(|u| u.as_str()) {
            self.status_url = Some(url.to_string());
        }

        match doc.get("status").and_then(|s| s.as_str()) {
            Some(raw) => match JobStatus::parse(raw) {
                Some(status) => self.status = status,
                None => {
                    log::warn!("Job {}: unrecognized status '{}'", self.id, raw);
                    self.status = JobStatus::Running;
                }
            },
            None => log::debug!("Job {}: status document without status", self.id),
        }

        match self.status {
            JobStatus::Succeeded => self.outputs = parse_outputs(doc),
            JobStatus::Failed => self.error = Some(parse_failure(doc)),
            _ => {}
        }
    }
}

fn parse_outputs(doc: &serde_json::Value) -> Vec<OutputRef> {
    doc.get("result")
        .and_then(|r| r.get("outputs"))
        .or_else(|| doc.get("outputs"))
        .and_then(|o| o.as_array())
        .map(|outputs| {
            outputs
                .iter()
                .filter_map(|out| {
                    let url = out
                        .get("image")
                        .and_then(|i| i.get("url"))
                        .or_else(|| out.get("url"))
                        .and_then(|u| u.as_str())?;
                    Some(OutputRef {
                        url: url.to_string(),
                        seed: out.get("seed").and_then(|s| s.as_u64()),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn parse_failure(doc: &serde_json::Value) -> String {
    let error = doc.get("error");
    error
        .and_then(|e| e.get("message"))
        .and_then(|m| m.as_str())
        .or_else(|| error.and_then(|e| e.as_str()))
        .or_else(|| doc.get("message").and_then(|m| m.as_str()))
        .unwrap_or("Unknown error")
        .to_string()
}

/// Submits compose payloads and follows the resulting jobs
pub struct JobClient {
    transport: Arc<dyn Transport>,
    exchanges: Arc<ExchangeLog>,
    api: ApiConfig,
    polling: PollingConfig,
}

impl JobClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        exchanges: Arc<ExchangeLog>,
        api: ApiConfig,
        polling: PollingConfig,
    ) -> Self {
        Self {
            transport,
            exchanges,
            api,
            polling,
        }
    }

    /// Send the payload to the compose endpoint
    pub fn submit(&self, payload: &Payload, api_key: &str) -> Result<GenerationJob> {
        let url = self.api.compose_url();
        let ticket = self.exchanges.begin(ExchangeRequest::new(
            ExchangeKind::Submit,
            "POST",
            &url,
            payload.to_json(),
        ));

        let response = match self.transport.post_json(&url, api_key, payload.bytes()) {
            Ok(response) => {
                self.exchanges
                    .finish(ticket, ExchangeOutcome::Response(response.clone()));
                response
            }
            Err(e) => {
                self.exchanges.finish(ticket, ExchangeOutcome::Error(e.to_json()));
                return Err(VistaError::Submit {
                    status: e.status(),
                    message: e.detail(),
                });
            }
        };

        let id = response
            .get("id")
            .or_else(|| response.get("jobId"))
            .and_then(|id| id.as_str())
            .ok_or_else(|| VistaError::Submit {
                status: None,
                message: format!(
                    "Unexpected submit response: {}",
                    serde_json::to_string(&response).unwrap_or_default()
                ),
            })?;

        let mut job = GenerationJob::new(id);
        job.apply(&response);
        log::info!("Submitted job {} ({})", job.id, job.status);
        Ok(job)
    }

    /// Fetch the job's status once and apply it
    pub fn poll(&self, job: &mut GenerationJob, api_key: &str) -> Result<()> {
        let url = job
            .status_url
            .clone()
            .unwrap_or_else(|| self.api.job_url(&job.id));
        let ticket = self.exchanges.begin(ExchangeRequest::new(
            ExchangeKind::Poll,
            "GET",
            &url,
            serde_json::Value::Null,
        ));

        match self.transport.get_json(&url, api_key) {
            Ok(doc) => {
                self.exchanges
                    .finish(ticket, ExchangeOutcome::Response(doc.clone()));
                job.polls += 1;
                job.apply(&doc);
                log::debug!("Job {} is {} after {} polls", job.id, job.status, job.polls);
                Ok(())
            }
            Err(e) => {
                self.exchanges.finish(ticket, ExchangeOutcome::Error(e.to_json()));
                Err(VistaError::Status {
                    job_id: job.id.clone(),
                    message: e.to_string(),
                })
            }
        }
    }

    /// Poll until the job is terminal, `timeout` elapses or `cancel` fires.
    ///
    /// A job that is already terminal returns without any request. The wait
    /// between polls starts at `polling.initial_interval_ms` and doubles up
    /// to `polling.max_interval_ms`.
    pub fn await_completion(
        &self,
        job: &mut GenerationJob,
        api_key: &str,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<()> {
        let start = Instant::now();
        let max_interval = Duration::from_millis(self.polling.max_interval_ms);
        let mut interval = Duration::from_millis(self.polling.initial_interval_ms).min(max_interval);

        loop {
            match job.status {
                JobStatus::Succeeded => {
                    if job.outputs.is_empty() {
                        return Err(VistaError::Generation {
                            job_id: job.id.clone(),
                            reason: "job succeeded without any output image".to_string(),
                        });
                    }
                    log::info!("Job {} succeeded with {} outputs", job.id, job.outputs.len());
                    return Ok(());
                }
                JobStatus::Failed => {
                    let reason = job
                        .error
                        .clone()
                        .unwrap_or_else(|| "Unknown error".to_string());
                    log::info!("Job {} failed: {}", job.id, reason);
                    return Err(VistaError::Generation {
                        job_id: job.id.clone(),
                        reason,
                    });
                }
                JobStatus::Pending | JobStatus::Running => {}
            }

            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return Err(VistaError::Timeout {
                    job_id: job.id.clone(),
                    waited_secs: elapsed.as_secs_f64(),
                });
            }

            if cancel.sleep(interval.min(timeout - elapsed)) {
                log::info!("Stopped waiting for job {} (cancelled)", job.id);
                return Err(VistaError::Cancelled {
                    job_id: job.id.clone(),
                });
            }

            self.poll(job, api_key)?;
            interval = (interval * 2).min(max_interval);
        }
    }

    /// Download every output image of a succeeded job, in order
    pub fn fetch_outputs(&self, job: &GenerationJob) -> Result<Vec<GeneratedImage>> {
        job.outputs
            .iter()
            .enumerate()
            .map(|(index, output)| {
                let ticket = self.exchanges.begin(ExchangeRequest::new(
                    ExchangeKind::Download,
                    "GET",
                    &output.url,
                    serde_json::Value::Null,
                ));
                match self.transport.download(&output.url) {
                    Ok(downloaded) => {
                        self.exchanges.finish(
                            ticket,
                            ExchangeOutcome::Response(serde_json::json!({
                                "bytes": downloaded.bytes.len(),
                                "content_type": downloaded.content_type,
                            })),
                        );
                        Ok(GeneratedImage::new(
                            index,
                            output.url.clone(),
                            output.seed,
                            downloaded.bytes,
                        ))
                    }
                    Err(e) => {
                        self.exchanges.finish(ticket, ExchangeOutcome::Error(e.to_json()));
                        Err(VistaError::Download {
                            url: output.url.clone(),
                            message: e.to_string(),
                        })
                    }
                }
            })
            .collect()
    }
}
