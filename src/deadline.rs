//! Deadline supervisor.
//!
//! Races the job's `finished` signal, a wall-clock timeout, and the global
//! shutdown signal. Exactly one branch wins; `kill`/`wait` being idempotent
//! is what makes the other two branches safe no-ops.

use std::sync::Arc;
use std::time::Duration;

use crate::child::ChildProcess;
use crate::shutdown::OneShotSignal;

/// Which of the three races decided the job's fate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    DeadlineExceeded,
    ShutdownRequested,
}

/// Run the supervisor for one job. Assumes `start` has already returned
/// (the caller awaited the `started` signal first).
pub async fn supervise(
    child: &Arc<ChildProcess>,
    max_exec: Duration,
    shutdown: &OneShotSignal,
) -> Outcome {
    tokio::select! {
        biased;

        _ = child.finished.wait() => {
            // Still call wait: it's a no-op once finished has already
            // fired, and guarantees every caller observes the same `err`.
            let _ = child.wait().await;
            Outcome::Completed
        }

        _ = tokio::time::sleep(max_exec) => {
            tracing::warn!(job_id = %child.job_id(), "job exceeded max_exec_seconds, killing");
            child.kill().await;
            let _ = child.wait().await;
            child.cleanup().await;
            Outcome::DeadlineExceeded
        }

        _ = shutdown.wait() => {
            tracing::info!(job_id = %child.job_id(), "shutdown requested mid-job, killing");
            child.kill().await;
            let _ = child.wait().await;
            child.cleanup().await;
            Outcome::ShutdownRequested
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn script(dir: &std::path::Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        path
    }

    #[tokio::test]
    async fn normal_completion_wins_when_faster_than_deadline() {
        let tmp = tempfile::tempdir().unwrap();
        let script = script(tmp.path(), "quick.sh", "#!/bin/sh\nexit 0\n");
        let child = Arc::new(ChildProcess::new(
            "job-1",
            script,
            vec![],
            tmp.path(),
            tmp.path().to_path_buf(),
            BTreeMap::new(),
        ));
        child.start().await.expect("start");

        let shutdown = OneShotSignal::new();
        let outcome = supervise(&child, Duration::from_secs(5), &shutdown).await;

        assert_eq!(outcome, Outcome::Completed);
        assert_eq!(child.status_code(), 0);
    }

    #[tokio::test]
    async fn deadline_kills_long_running_job() {
        let tmp = tempfile::tempdir().unwrap();
        let script = script(tmp.path(), "slow.sh", "#!/bin/sh\nsleep 5\nexit 0\n");
        let child = Arc::new(ChildProcess::new(
            "job-2",
            script,
            vec![],
            tmp.path(),
            tmp.path().to_path_buf(),
            BTreeMap::new(),
        ));
        child.start().await.expect("start");

        let shutdown = OneShotSignal::new();
        let outcome = supervise(&child, Duration::from_millis(50), &shutdown).await;

        assert_eq!(outcome, Outcome::DeadlineExceeded);
        assert!(!tmp.path().join("job-2").exists());
    }

    #[tokio::test]
    async fn shutdown_kills_running_job_before_deadline() {
        let tmp = tempfile::tempdir().unwrap();
        let script = script(tmp.path(), "slow.sh", "#!/bin/sh\nsleep 5\nexit 0\n");
        let child = Arc::new(ChildProcess::new(
            "job-3",
            script,
            vec![],
            tmp.path(),
            tmp.path().to_path_buf(),
            BTreeMap::new(),
        ));
        child.start().await.expect("start");

        let shutdown = OneShotSignal::new();
        shutdown.fire();
        let outcome = supervise(&child, Duration::from_secs(5), &shutdown).await;

        assert_eq!(outcome, Outcome::ShutdownRequested);
    }
}
