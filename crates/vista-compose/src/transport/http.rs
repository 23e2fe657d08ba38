//! HTTP transport over `ureq`
//!
//! Uploads stream the file as a multipart body without buffering it.
//! GET requests (status polls, image downloads) are retried with exponential
//! backoff on transient failures; POSTs are sent exactly once so a flaky
//! network never creates duplicate jobs or spaces.

use super::{Downloaded, Transport, TransportError, UploadBody};
use crate::config::ApiConfig;
use std::io::{Cursor, Read};
use std::time::Duration;

const RETRY_BASE_DELAY_MS: u64 = 500;

/// Production transport for the remote compositing API
pub struct HttpTransport {
    agent: ureq::Agent,
    max_retries: usize,
}

impl HttpTransport {
    pub fn new(api: &ApiConfig) -> Self {
        Self {
            agent: build_agent(Duration::from_secs(api.request_timeout_secs)),
            max_retries: api.max_retries.max(1),
        }
    }

    fn get_with_retry(
        &self,
        url: &str,
        api_key: Option<&str>,
    ) -> Result<ureq::http::Response<ureq::Body>, TransportError> {
        let mut attempt = 0;
        loop {
            let mut request = self.agent.get(url);
            if let Some(key) = api_key {
                request = request.header("Authorization", &bearer(key));
            }
            let outcome = request
                .header("Accept", "application/json")
                .call()
                .map_err(map_ureq_error)
                .and_then(check_status);

            match outcome {
                Ok(response) => return Ok(response),
                Err(e) => {
                    attempt += 1;
                    if attempt < self.max_retries && is_retryable(&e) {
                        log::debug!("GET {} failed ({}), retrying", url, e);
                        sleep_backoff(attempt - 1);
                        continue;
                    }
                    return Err(e);
                }
            }
        }
    }
}

impl Transport for HttpTransport {
    fn name(&self) -> &str {
        "http"
    }

    fn upload(
        &self,
        url: &str,
        api_key: &str,
        body: UploadBody,
    ) -> Result<serde_json::Value, TransportError> {
        let boundary = format!("vista-{}", uuid::Uuid::new_v4().simple());
        let (preamble, epilogue) = multipart_frame(&boundary, &body.file_name);
        let total_length = body
            .content_length
            .map(|len| len + preamble.len() as u64 + epilogue.len() as u64);
        let stream = Cursor::new(preamble)
            .chain(body.content)
            .chain(Cursor::new(epilogue));

        let mut request = self.agent.post(url);
        if let Some(len) = total_length {
            request = request.header("Content-Length", &len.to_string());
        }
        let response = request
            .header("Authorization", &bearer(api_key))
            .header("Accept", "application/json")
            .header(
                "Content-Type",
                &format!("multipart/form-data; boundary={}", boundary),
            )
            .send(ureq::SendBody::from_owned_reader(stream))
            .map_err(map_ureq_error)
            .and_then(check_status)?;
        read_json(response)
    }

    fn post_json(
        &self,
        url: &str,
        api_key: &str,
        body: &[u8],
    ) -> Result<serde_json::Value, TransportError> {
        let response = self
            .agent
            .post(url)
            .header("Authorization", &bearer(api_key))
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .send(body)
            .map_err(map_ureq_error)
            .and_then(check_status)?;
        read_json(response)
    }

    fn get_json(&self, url: &str, api_key: &str) -> Result<serde_json::Value, TransportError> {
        let response = self.get_with_retry(url, Some(api_key))?;
        read_json(response)
    }

    fn download(&self, url: &str) -> Result<Downloaded, TransportError> {
        let response = self.get_with_retry(url, None)?;
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let mut reader = response.into_body().into_reader();
        let mut bytes = Vec::new();
        reader
            .read_to_end(&mut bytes)
            .map_err(|e| TransportError::Network(format!("failed to read body: {}", e)))?;
        Ok(Downloaded {
            bytes,
            content_type,
        })
    }
}

/// Multipart text surrounding the file bytes: a `name` field followed by
/// the `filename` file part.
fn multipart_frame(boundary: &str, file_name: &str) -> (Vec<u8>, Vec<u8>) {
    let safe_name = file_name.replace('"', "_");
    let preamble = format!(
        "--{b}\r\n\
         Content-Disposition: form-data; name=\"name\"\r\n\r\n\
         {n}\r\n\
         --{b}\r\n\
         Content-Disposition: form-data; name=\"filename\"; filename=\"{n}\"\r\n\
         Content-Type: application/octet-stream\r\n\r\n",
        b = boundary,
        n = safe_name
    );
    let epilogue = format!("\r\n--{}--\r\n", boundary);
    (preamble.into_bytes(), epilogue.into_bytes())
}

fn bearer(api_key: &str) -> String {
    format!("Bearer {}", api_key)
}

fn build_agent(timeout: Duration) -> ureq::Agent {
    let config = ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .http_status_as_error(false)
        .build();
    config.into()
}

fn check_status(
    mut response: ureq::http::Response<ureq::Body>,
) -> Result<ureq::http::Response<ureq::Body>, TransportError> {
    let code = response.status().as_u16();
    if (200..300).contains(&code) {
        return Ok(response);
    }
    let body = response
        .body_mut()
        .read_to_string()
        .ok()
        .and_then(|text| serde_json::from_str::<serde_json::Value>(&text).ok());
    Err(TransportError::from_status(code, body))
}

fn read_json(
    mut response: ureq::http::Response<ureq::Body>,
) -> Result<serde_json::Value, TransportError> {
    response
        .body_mut()
        .read_json::<serde_json::Value>()
        .map_err(|e| TransportError::Decode(e.to_string()))
}

fn map_ureq_error(e: ureq::Error) -> TransportError {
    match e {
        ureq::Error::StatusCode(code) => TransportError::from_status(code, None),
        other => TransportError::Network(other.to_string()),
    }
}

fn is_retryable(e: &TransportError) -> bool {
    match e {
        TransportError::Network(_) => true,
        TransportError::Status { code, .. } => matches!(code, 429 | 500 | 502 | 503 | 504),
        TransportError::Decode(_) => false,
    }
}

fn sleep_backoff(attempt: usize) {
    let delay_ms = RETRY_BASE_DELAY_MS.saturating_mul(1u64 << attempt.min(16));
    std::thread::sleep(Duration::from_millis(delay_ms));
}
