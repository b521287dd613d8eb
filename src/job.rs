//! Job (request) entity.
//!
//! Immutable once dequeued: deserialized from the queue payload and passed,
//! unchanged, down through `ScriptResolver` and `ChildProcess`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Advisory execution priority. The engine never branches on this value —
/// it is carried through only because the queue payload carries it. A
/// `Queue` implementation is free to use it for scheduling order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    High,
    Urgent,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Low
    }
}

/// Wire shape of a queue payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPayload {
    pub script: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub files: BTreeMap<String, String>,
    #[serde(default)]
    pub callback_url: Option<String>,
    #[serde(default)]
    pub priority: Priority,
}

/// Error returned when a queue payload cannot be turned into a [`Job`].
///
/// Matched by the Worker to decide whether to ack and skip rather than
/// dispatch.
#[derive(Debug)]
pub struct PayloadInvalid(pub String);

impl std::fmt::Display for PayloadInvalid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid job payload: {}", self.0)
    }
}

impl std::error::Error for PayloadInvalid {}

/// An immutable job request.
#[derive(Debug, Clone)]
pub struct Job {
    pub job_id: String,
    pub script_name: String,
    pub args: Vec<String>,
    pub extra_files: BTreeMap<String, String>,
    pub callback_url: Option<String>,
    pub priority: Priority,
}

impl Job {
    /// Build a `Job` from a raw queue payload and the job id assigned by the
    /// queue. Rejects only payloads with an empty `script` name — a bad
    /// `extra_files` key is a start-time failure, not a decode-time one, so
    /// it's left for `ChildProcess::setup_and_spawn` to reject when the
    /// child is actually spawned.
    pub fn from_payload(job_id: impl Into<String>, payload: JobPayload) -> Result<Self, PayloadInvalid> {
        if payload.script.trim().is_empty() {
            return Err(PayloadInvalid("missing script_name".to_string()));
        }
        Ok(Job {
            job_id: job_id.into(),
            script_name: payload.script,
            args: payload.args,
            extra_files: payload.files,
            callback_url: payload.callback_url,
            priority: payload.priority,
        })
    }

    /// Decode a raw JSON queue payload directly into a `Job`.
    pub fn decode(job_id: impl Into<String>, raw: &[u8]) -> Result<Self, PayloadInvalid> {
        let payload: JobPayload =
            serde_json::from_slice(raw).map_err(|e| PayloadInvalid(e.to_string()))?;
        Self::from_payload(job_id, payload)
    }
}
