//! Collaborator contracts.
//!
//! The core depends on these abstract collaborators only; concrete queue
//! brokers, result stores and whitelist loaders live outside this crate's
//! core, aside from the minimal default implementations in `queue_mem`,
//! `store_fs` and `resolver_fs`.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::job::Job;
use crate::response::Response;

/// One message pulled off the queue: either a decodable job payload, or a
/// payload that failed to decode (still carries an opaque id so the worker
/// can Ack it).
pub enum Dequeued {
    Job(Job),
    Undecodable { queue_id: String, raw: Vec<u8> },
}

/// A message broker able to hand out jobs and track their delivery state.
#[async_trait]
pub trait Queue: Send + Sync {
    /// Pull one job, or return `Ok(None)` when the queue is shutting down
    /// and no more jobs will be delivered.
    async fn dequeue(&self) -> anyhow::Result<Option<Dequeued>>;

    /// Acknowledge a job as consumed — it will not be redelivered.
    async fn ack(&self, queue_id: &str) -> anyhow::Result<()>;

    /// Negatively acknowledge a job — it may be redelivered (at-least-once).
    async fn nack(&self, queue_id: &str) -> anyhow::Result<()>;
}

/// Durable storage for a finished job's response. Failure is logged by the
/// caller but does not block acknowledging the job (best-effort record).
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn save_response(&self, response: &Response) -> anyhow::Result<()>;
}

/// Resolves a script name against a whitelist, returning an absolute path
/// to the script on disk or `None` if the name isn't allowed.
#[async_trait]
pub trait ScriptResolver: Send + Sync {
    /// Returns the absolute path to the script if `script_name` is
    /// whitelisted, or `None` if it is unknown/not whitelisted. An `Err` is
    /// reserved for failures to read the whitelist itself.
    async fn resolve(&self, script_name: &str) -> anyhow::Result<Option<PathBuf>>;
}
