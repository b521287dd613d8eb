//! Pool — a fixed-size worker pool with a readiness-gated dispatcher.
//!
//! Fixed size N. A single readiness channel implements the "no Job is
//! pulled from the queue until a Worker is idle" backpressure rule: the
//! dispatcher only calls `Queue::dequeue` after it has a ready worker in
//! hand.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::contracts::{Queue, ResultStore, ScriptResolver};
use crate::shutdown::OneShotSignal;
use crate::worker::{self, Dispatch, Worker};

pub struct Pool {
    pub workers: usize,
    pub queue: Arc<dyn Queue>,
    pub result_store: Arc<dyn ResultStore>,
    pub resolver: Arc<dyn ScriptResolver>,
    pub work_root: std::path::PathBuf,
    pub store_dir: std::path::PathBuf,
    pub max_exec: Duration,
}

impl Pool {
    /// Run the pool until `shutdown` fires, then drain and return.
    pub async fn run(self, shutdown: Arc<OneShotSignal>) {
        let (ready_tx, mut ready_rx) = mpsc::channel::<usize>(self.workers);
        let mut inboxes: Vec<mpsc::Sender<Dispatch>> = Vec::with_capacity(self.workers);
        let mut joins = JoinSet::new();

        for id in 0..self.workers {
            let (tx, rx) = mpsc::channel::<Dispatch>(1);
            inboxes.push(tx);
            let worker = Worker {
                id,
                queue: self.queue.clone(),
                result_store: self.result_store.clone(),
                resolver: self.resolver.clone(),
                work_root: self.work_root.clone(),
                store_dir: self.store_dir.clone(),
                max_exec: self.max_exec,
                shutdown: shutdown.clone(),
            };
            let ready_tx = ready_tx.clone();
            joins.spawn(worker.run(ready_tx, rx));
        }
        // Drop our own clone so the channel closes once every worker has
        // dropped theirs (used as the drain signal below).
        drop(ready_tx);

        tracing::info!(workers = self.workers, "pool started");

        loop {
            let ready_id = tokio::select! {
                biased;
                _ = shutdown.wait() => break,
                id = ready_rx.recv() => match id {
                    Some(id) => id,
                    None => break,
                },
            };

            let dequeued = tokio::select! {
                biased;
                _ = shutdown.wait() => break,
                result = self.queue.dequeue() => result,
            };

            let item = match dequeued {
                Ok(Some(item)) => item,
                Ok(None) => {
                    tracing::info!("queue reports shutdown, draining pool");
                    break;
                }
                Err(e) => {
                    tracing::error!(error = %e, "dequeue failed, retrying");
                    continue;
                }
            };

            let Some(dispatch) = worker::decode_or_ack(&*self.queue, item).await else {
                continue;
            };

            if inboxes[ready_id].send(dispatch).await.is_err() {
                tracing::warn!(worker = ready_id, "worker inbox closed, job lost to drain race");
            }
        }

        tracing::info!("pool draining, waiting for workers to exit");
        drop(inboxes);
        while joins.join_next().await.is_some() {}
        tracing::info!("pool drained");
    }
}
