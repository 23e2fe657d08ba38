//! In-process transport for tests and offline runs
//!
//! Answers every endpoint without touching the network. Each submitted job
//! walks through a scripted list of status documents (the last one repeats),
//! and downloads return a small PNG rendered with the `image` crate.

use super::{Downloaded, Transport, TransportError, UploadBody};
use std::collections::{HashMap, VecDeque};
use std::io::{Cursor, Read};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Number of calls the mock has answered, per endpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub uploads: usize,
    pub submits: usize,
    pub polls: usize,
    pub downloads: usize,
}

#[derive(Default)]
struct MockState {
    counts: CallCounts,
    uploaded: Vec<(String, u64)>,
    submitted: Vec<Vec<u8>>,
    next_scripts: VecDeque<Vec<serde_json::Value>>,
    jobs: HashMap<String, VecDeque<serde_json::Value>>,
    upload_failure: Option<TransportError>,
    submit_failure: Option<TransportError>,
}

/// A transport that fabricates API answers locally
pub struct MockTransport {
    state: Mutex<MockState>,
    upload_delay: Duration,
    default_images: usize,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            upload_delay: Duration::ZERO,
            default_images: 1,
        }
    }

    /// Hold every upload for `delay` (for exercising concurrent callers)
    pub fn with_upload_delay(mut self, delay: Duration) -> Self {
        self.upload_delay = delay;
        self
    }

    /// Images returned by jobs that have no explicit script
    pub fn with_default_images(mut self, count: usize) -> Self {
        self.default_images = count.max(1);
        self
    }

    /// Status documents served, in order, to the next submitted job
    pub fn script_next_job(&self, statuses: Vec<serde_json::Value>) {
        self.lock().next_scripts.push_back(statuses);
    }

    pub fn fail_uploads(&self, error: TransportError) {
        self.lock().upload_failure = Some(error);
    }

    pub fn fail_submits(&self, error: TransportError) {
        self.lock().submit_failure = Some(error);
    }

    pub fn counts(&self) -> CallCounts {
        self.lock().counts
    }

    /// File names and byte counts received by the upload endpoint
    pub fn uploaded(&self) -> Vec<(String, u64)> {
        self.lock().uploaded.clone()
    }

    /// Raw bodies received by the submit endpoint
    pub fn submitted(&self) -> Vec<Vec<u8>> {
        self.lock().submitted.clone()
    }

    /// A non-terminal status document
    pub fn status_json(status: &str) -> serde_json::Value {
        serde_json::json!({ "status": status })
    }

    /// A `succeeded` status document carrying `count` outputs
    pub fn success_json(job_id: &str, count: usize) -> serde_json::Value {
        let outputs: Vec<serde_json::Value> = (0..count)
            .map(|i| {
                serde_json::json!({
                    "image": { "url": format!("mock://outputs/{}/{}.png", job_id, i) },
                    "seed": i,
                })
            })
            .collect();
        serde_json::json!({
            "id": job_id,
            "status": "succeeded",
            "result": { "outputs": outputs },
        })
    }

    /// A `failed` status document with the server-reported reason
    pub fn failure_json(reason: &str) -> serde_json::Value {
        serde_json::json!({
            "status": "failed",
            "error": { "message": reason },
        })
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Transport for MockTransport {
    fn name(&self) -> &str {
        "mock"
    }

    fn upload(
        &self,
        _url: &str,
        _api_key: &str,
        mut body: UploadBody,
    ) -> Result<serde_json::Value, TransportError> {
        if !self.upload_delay.is_zero() {
            std::thread::sleep(self.upload_delay);
        }
        let mut sink = Vec::new();
        body.content
            .read_to_end(&mut sink)
            .map_err(|e| TransportError::Network(format!("upload stream failed: {}", e)))?;

        let mut state = self.lock();
        state.counts.uploads += 1;
        if let Some(err) = state.upload_failure.clone() {
            return Err(err);
        }
        state.uploaded.push((body.file_name, sink.len() as u64));
        let id = format!("space-{}", state.counts.uploads);
        Ok(serde_json::json!({ "id": id }))
    }

    fn post_json(
        &self,
        url: &str,
        _api_key: &str,
        body: &[u8],
    ) -> Result<serde_json::Value, TransportError> {
        let mut state = self.lock();
        state.counts.submits += 1;
        state.submitted.push(body.to_vec());
        if let Some(err) = state.submit_failure.clone() {
            return Err(err);
        }
        if serde_json::from_slice::<serde_json::Value>(body).is_err() {
            return Err(TransportError::from_status(
                400,
                Some(serde_json::json!({ "message": "Malformed JSON payload" })),
            ));
        }

        let job_id = format!("job-{}", state.counts.submits);
        let default_images = self.default_images;
        let script = state.next_scripts.pop_front().unwrap_or_else(|| {
            vec![
                MockTransport::status_json("running"),
                MockTransport::success_json(&job_id, default_images),
            ]
        });
        state.jobs.insert(job_id.clone(), script.into());

        let base = url.split("/v1beta/").next().unwrap_or(url);
        Ok(serde_json::json!({
            "id": job_id,
            "status": "not_started",
            "url": format!("{}/v1beta/jobs/{}", base, job_id),
        }))
    }

    fn get_json(&self, url: &str, _api_key: &str) -> Result<serde_json::Value, TransportError> {
        let job_id = url.rsplit('/').next().unwrap_or_default().to_string();
        let mut state = self.lock();
        state.counts.polls += 1;
        let script = state.jobs.get_mut(&job_id).ok_or_else(|| {
            TransportError::from_status(
                404,
                Some(serde_json::json!({ "message": format!("Job {} not found", job_id) })),
            )
        })?;
        let next = if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().cloned()
        };
        let mut doc = next.unwrap_or_else(|| MockTransport::status_json("running"));
        if let Some(obj) = doc.as_object_mut() {
            obj.entry("id").or_insert_with(|| serde_json::json!(job_id));
        }
        Ok(doc)
    }

    fn download(&self, _url: &str) -> Result<Downloaded, TransportError> {
        self.lock().counts.downloads += 1;
        let mut bytes = Cursor::new(Vec::new());
        image::RgbaImage::from_pixel(2, 2, image::Rgba([200, 120, 40, 255]))
            .write_to(&mut bytes, image::ImageFormat::Png)
            .map_err(|e| TransportError::Decode(format!("failed to encode PNG: {}", e)))?;
        Ok(Downloaded {
            bytes: bytes.into_inner(),
            content_type: Some("image/png".to_string()),
        })
    }
}
