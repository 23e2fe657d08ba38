//! Session log of every request that left the process
//!
//! Records are numbered and timestamped when the request is sent, then
//! completed with the response (or error) once it arrives. Concurrent callers
//! therefore see records in send order even if answers come back shuffled.
//! Entries are never removed for the lifetime of the log.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Which endpoint an exchange hit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeKind {
    Upload,
    Submit,
    Poll,
    Download,
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExchangeKind::Upload => write!(f, "upload"),
            ExchangeKind::Submit => write!(f, "submit"),
            ExchangeKind::Poll => write!(f, "poll"),
            ExchangeKind::Download => write!(f, "download"),
        }
    }
}

/// The outgoing half of an exchange. Never carries the API key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExchangeRequest {
    pub kind: ExchangeKind,
    pub method: &'static str,
    pub url: String,
    pub body: serde_json::Value,
}

impl ExchangeRequest {
    pub fn new(kind: ExchangeKind, method: &'static str, url: &str, body: serde_json::Value) -> Self {
        Self {
            kind,
            method,
            url: url.to_string(),
            body,
        }
    }
}

/// What came back for a request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "body", rename_all = "lowercase")]
pub enum ExchangeOutcome {
    /// Sent, answer not yet received
    Pending,
    Response(serde_json::Value),
    Error(serde_json::Value),
}

/// One request/response pair
#[derive(Debug, Clone, Serialize)]
pub struct ExchangeRecord {
    /// Position in send order, starting at 0
    pub seq: u64,
    pub request: ExchangeRequest,
    pub outcome: ExchangeOutcome,
    pub sent_at: DateTime<Utc>,
    pub received_at: Option<DateTime<Utc>>,
}

/// Handle to a record opened with [`ExchangeLog::begin`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExchangeTicket(u64);

/// Append-only, thread-safe exchange log
#[derive(Debug, Default)]
pub struct ExchangeLog {
    records: Mutex<Vec<ExchangeRecord>>,
}

impl ExchangeLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a record at send time
    pub fn begin(&self, request: ExchangeRequest) -> ExchangeTicket {
        let mut records = self.lock();
        let seq = records.len() as u64;
        log::debug!("-> #{} {} {} {}", seq, request.kind, request.method, request.url);
        records.push(ExchangeRecord {
            seq,
            request,
            outcome: ExchangeOutcome::Pending,
            sent_at: Utc::now(),
            received_at: None,
        });
        ExchangeTicket(seq)
    }

    /// Complete a record opened with [`begin`](Self::begin)
    pub fn finish(&self, ticket: ExchangeTicket, outcome: ExchangeOutcome) {
        let mut records = self.lock();
        if let Some(record) = records.get_mut(ticket.0 as usize) {
            log::debug!("<- #{} {}", ticket.0, outcome_label(&outcome));
            record.outcome = outcome;
            record.received_at = Some(Utc::now());
        }
    }

    /// Append an already-complete exchange
    pub fn record(&self, request: ExchangeRequest, outcome: ExchangeOutcome) {
        let ticket = self.begin(request);
        self.finish(ticket, outcome);
    }

    /// Snapshot of every record, in send order
    pub fn all(&self) -> Vec<ExchangeRecord> {
        self.lock().clone()
    }

    /// Records of one kind, in send order
    pub fn of_kind(&self, kind: ExchangeKind) -> Vec<ExchangeRecord> {
        self.lock()
            .iter()
            .filter(|r| r.request.kind == kind)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Pretty JSON rendering for the dev view
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(&*self.lock()).unwrap_or_else(|_| "[]".to_string())
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ExchangeRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn outcome_label(outcome: &ExchangeOutcome) -> &'static str {
    match outcome {
        ExchangeOutcome::Pending => "pending",
        ExchangeOutcome::Response(_) => "ok",
        ExchangeOutcome::Error(_) => "error",
    }
}
