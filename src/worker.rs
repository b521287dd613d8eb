//! Worker — owns one job at a time: announce readiness, wait for a
//! dispatched job or shutdown, resolve, run, supervise, report.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::child::ChildProcess;
use crate::contracts::{Dequeued, Queue, ResultStore, ScriptResolver};
use crate::deadline::{self, Outcome};
use crate::job::Job;
use crate::response::Response;
use crate::shutdown::OneShotSignal;

pub struct Worker {
    pub id: usize,
    pub queue: Arc<dyn Queue>,
    pub result_store: Arc<dyn ResultStore>,
    pub resolver: Arc<dyn ScriptResolver>,
    pub work_root: std::path::PathBuf,
    pub store_dir: std::path::PathBuf,
    pub max_exec: Duration,
    pub shutdown: Arc<OneShotSignal>,
}

/// One job handed from the Pool's dispatcher to a specific idle Worker.
pub struct Dispatch {
    pub job: Job,
    pub queue_id: String,
}

impl Worker {
    /// Run the Worker's cycle until shutdown. `ready_tx` is this worker's
    /// half of the pool's readiness rendezvous; `inbox` receives at most
    /// one `Dispatch` per readiness announcement.
    pub async fn run(
        self,
        ready_tx: mpsc::Sender<usize>,
        mut inbox: mpsc::Receiver<Dispatch>,
    ) {
        loop {
            if ready_tx.send(self.id).await.is_err() {
                // Pool dropped the readiness channel: shutting down.
                return;
            }

            let dispatch = tokio::select! {
                biased;
                _ = self.shutdown.wait() => None,
                d = inbox.recv() => d,
            };

            let Some(Dispatch { job, queue_id }) = dispatch else {
                tracing::debug!(worker = self.id, "worker exiting on shutdown");
                return;
            };

            self.handle_dispatch(job, &queue_id).await;
        }
    }

    async fn handle_dispatch(&self, job: Job, queue_id: &str) {
        let script_path = match self.resolver.resolve(&job.script_name).await {
            Ok(Some(path)) => path,
            Ok(None) => {
                tracing::info!(job_id = %job.job_id, script = %job.script_name, "script not whitelisted, acking");
                self.ack_or_warn(queue_id).await;
                return;
            }
            Err(e) => {
                tracing::error!(job_id = %job.job_id, error = %e, "resolver failure, acking");
                self.ack_or_warn(queue_id).await;
                return;
            }
        };

        let child = Arc::new(ChildProcess::new(
            job.job_id.clone(),
            script_path,
            job.args.clone(),
            &self.work_root,
            self.store_dir.clone(),
            job.extra_files.clone(),
        ));

        let run_handle = {
            let child = child.clone();
            tokio::spawn(async move {
                let _ = child.start().await;
                let _ = child.wait().await;
            })
        };

        child.started.wait().await;

        let outcome = deadline::supervise(&child, self.max_exec, &self.shutdown).await;
        run_handle.abort();

        if outcome == Outcome::ShutdownRequested {
            tracing::info!(job_id = %job.job_id, "shutdown won race, nacking without saving a result");
            if let Err(e) = self.queue.nack(queue_id).await {
                tracing::warn!(job_id = %job.job_id, error = %e, "nack failed");
            }
            return;
        }

        let response = self.build_response(&job, &child).await;
        if let Err(e) = self.result_store.save_response(&response).await {
            tracing::error!(job_id = %job.job_id, error = %e, "failed to save response");
        }
        self.ack_or_warn(queue_id).await;
    }

    async fn build_response(&self, job: &Job, child: &ChildProcess) -> Response {
        let exec_log = String::from_utf8_lossy(&child.combined_output().await).into_owned();
        Response::from_job(job).finish(
            child.status_code(),
            child.start_time(),
            child.end_time(),
            child.duration_seconds(),
            child.qmd_out().await,
            exec_log,
            child.err(),
        )
    }

    async fn ack_or_warn(&self, queue_id: &str) {
        if let Err(e) = self.queue.ack(queue_id).await {
            tracing::warn!(queue_id, error = %e, "ack failed");
        }
    }
}

/// Helper for the dispatcher: turn one `Dequeued` item into either a
/// `Dispatch` to hand to a worker, or an immediate decode-failure ack for
/// a payload that never becomes a `Job` at all.
pub async fn decode_or_ack(queue: &dyn Queue, item: Dequeued) -> Option<Dispatch> {
    match item {
        Dequeued::Job(job) => Some(Dispatch {
            queue_id: job.job_id.clone(),
            job,
        }),
        Dequeued::Undecodable { queue_id, raw } => {
            tracing::warn!(queue_id, bytes = raw.len(), "undecodable payload, acking");
            if let Err(e) = queue.ack(&queue_id).await {
                tracing::warn!(queue_id, error = %e, "ack of undecodable payload failed");
            }
            None
        }
    }
}
