//! `InMemoryQueue` — a default, dev/test-only `Queue` implementation.
//!
//! A real deployment would plug in a message broker driver instead; this
//! exists so the crate has something to run against without one, keeping
//! its job table behind a plain `std::sync::Mutex`.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::Notify;
use ulid::Ulid;

use crate::contracts::{Dequeued, Queue};
use crate::job::{Job, JobPayload};

enum Entry {
    Decoded(Job),
    Undecodable { queue_id: String, raw: Vec<u8> },
}

pub struct InMemoryQueue {
    entries: Mutex<VecDeque<Entry>>,
    notify: Notify,
    closed: Mutex<bool>,
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryQueue {
    pub fn new() -> Self {
        InMemoryQueue {
            entries: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            closed: Mutex::new(false),
        }
    }

    /// Enqueue a raw JSON payload under a caller-assigned job id. Decode
    /// failures are still enqueued (as `Undecodable`) so the worker's
    /// ack-and-skip path can be exercised.
    pub fn enqueue_raw(&self, job_id: impl Into<String>, raw: Vec<u8>) {
        let job_id = job_id.into();
        let entry = match Job::decode(job_id.clone(), &raw) {
            Ok(job) => Entry::Decoded(job),
            Err(_) => Entry::Undecodable { queue_id: job_id, raw },
        };
        self.entries.lock().unwrap().push_back(entry);
        self.notify.notify_one();
    }

    pub fn enqueue_job(&self, job: Job) {
        self.entries.lock().unwrap().push_back(Entry::Decoded(job));
        self.notify.notify_one();
    }

    /// Enqueue a payload under a freshly minted job id, the same way the
    /// original submission path assigns one id per accepted request.
    pub fn enqueue_payload(&self, payload: JobPayload) -> anyhow::Result<String> {
        let job_id = Ulid::new().to_string();
        let job = Job::from_payload(job_id.clone(), payload)?;
        self.enqueue_job(job);
        Ok(job_id)
    }

    /// Stop delivering new jobs; in-flight `dequeue` callers still waiting
    /// observe `Ok(None)`.
    pub fn close(&self) {
        *self.closed.lock().unwrap() = true;
        self.notify.notify_waiters();
    }
}

#[async_trait]
impl Queue for InMemoryQueue {
    async fn dequeue(&self) -> anyhow::Result<Option<Dequeued>> {
        loop {
            {
                let mut entries = self.entries.lock().unwrap();
                if let Some(entry) = entries.pop_front() {
                    return Ok(Some(match entry {
                        Entry::Decoded(job) => Dequeued::Job(job),
                        Entry::Undecodable { queue_id, raw } => {
                            Dequeued::Undecodable { queue_id, raw }
                        }
                    }));
                }
                if *self.closed.lock().unwrap() {
                    return Ok(None);
                }
            }
            self.notify.notified().await;
        }
    }

    async fn ack(&self, _queue_id: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn nack(&self, queue_id: &str) -> anyhow::Result<()> {
        tracing::debug!(queue_id, "in-memory queue: nack is a no-op, job not redelivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dequeue_returns_none_once_closed_and_drained() {
        let q = InMemoryQueue::new();
        q.close();
        assert!(q.dequeue().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn enqueued_job_round_trips() {
        let q = InMemoryQueue::new();
        q.enqueue_job(Job {
            job_id: "j1".into(),
            script_name: "echo".into(),
            args: vec!["hi".into()],
            extra_files: Default::default(),
            callback_url: None,
            priority: Default::default(),
        });
        match q.dequeue().await.unwrap() {
            Some(Dequeued::Job(job)) => assert_eq!(job.script_name, "echo"),
            _ => panic!("expected a decoded job"),
        }
    }

    #[tokio::test]
    async fn undecodable_payload_is_surfaced_for_ack_and_skip() {
        let q = InMemoryQueue::new();
        q.enqueue_raw("bad-1", b"not json".to_vec());
        match q.dequeue().await.unwrap() {
            Some(Dequeued::Undecodable { queue_id, .. }) => assert_eq!(queue_id, "bad-1"),
            _ => panic!("expected an undecodable payload"),
        }
    }

    #[tokio::test]
    async fn enqueue_payload_mints_a_fresh_job_id() {
        let q = InMemoryQueue::new();
        let job_id = q
            .enqueue_payload(JobPayload {
                script: "echo".into(),
                args: vec![],
                files: Default::default(),
                callback_url: None,
                priority: Default::default(),
            })
            .expect("enqueue");
        match q.dequeue().await.unwrap() {
            Some(Dequeued::Job(job)) => assert_eq!(job.job_id, job_id),
            _ => panic!("expected a decoded job"),
        }
    }
}
