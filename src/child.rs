//! ChildProcess — the per-job child process lifecycle state machine.
//!
//! `start`, `wait` and `kill` may be invoked from distinct tasks in any
//! order, yet must settle into exactly one legal terminal state. Two
//! once-guards (`start_guard`, `wait_guard`) plus two one-shot broadcast
//! signals (`started`, `finished`) arbitrate the races between them.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::Mutex as AsyncMutex;

use crate::shutdown::{OnceGuard, OneShotSignal};
use crate::timefmt::now_rfc3339;

/// Legal states. No back-edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Initialized,
    Running,
    Finished,
    Terminated,
    Invalidated,
    Failed,
}

impl State {
    pub fn as_str(&self) -> &'static str {
        match self {
            State::Initialized => "initialized",
            State::Running => "running",
            State::Finished => "finished",
            State::Terminated => "terminated",
            State::Invalidated => "invalidated",
            State::Failed => "failed",
        }
    }
}

/// A single job's child process and its full lifecycle.
pub struct ChildProcess {
    job_id: String,
    script_path: PathBuf,
    args: Vec<String>,
    work_dir: PathBuf,
    store_dir: PathBuf,
    qmd_out_file: PathBuf,
    extra_files: BTreeMap<String, String>,

    state: Mutex<State>,
    status_code: Mutex<i32>,
    start_time: Mutex<Option<String>>,
    end_time: Mutex<Option<String>>,
    duration_seconds: Mutex<f64>,
    err: Mutex<Option<String>>,

    combined_output: Arc<AsyncMutex<Vec<u8>>>,
    qmd_out: AsyncMutex<String>,
    child: AsyncMutex<Option<tokio::process::Child>>,
    pid: Mutex<Option<u32>>,
    output_readers: AsyncMutex<Option<(tokio::task::JoinHandle<()>, tokio::task::JoinHandle<()>)>>,

    start_guard: OnceGuard,
    wait_guard: OnceGuard,

    pub started: OneShotSignal,
    pub finished: OneShotSignal,
}

impl ChildProcess {
    pub fn new(
        job_id: impl Into<String>,
        script_path: PathBuf,
        args: Vec<String>,
        work_root: &std::path::Path,
        store_dir: PathBuf,
        extra_files: BTreeMap<String, String>,
    ) -> Self {
        let job_id = job_id.into();
        let work_dir = work_root.join(&job_id);
        let qmd_out_file = work_dir.join("QMD_OUT");
        ChildProcess {
            job_id,
            script_path,
            args,
            work_dir,
            store_dir,
            qmd_out_file,
            extra_files,
            state: Mutex::new(State::Initialized),
            status_code: Mutex::new(0),
            start_time: Mutex::new(None),
            end_time: Mutex::new(None),
            duration_seconds: Mutex::new(0.0),
            err: Mutex::new(None),
            combined_output: Arc::new(AsyncMutex::new(Vec::new())),
            qmd_out: AsyncMutex::new(String::new()),
            child: AsyncMutex::new(None),
            pid: Mutex::new(None),
            output_readers: AsyncMutex::new(None),
            start_guard: OnceGuard::new(),
            wait_guard: OnceGuard::new(),
            started: OneShotSignal::new(),
            finished: OneShotSignal::new(),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn work_dir(&self) -> &std::path::Path {
        &self.work_dir
    }

    pub fn state(&self) -> State {
        *self.state.lock().unwrap()
    }

    pub fn status_code(&self) -> i32 {
        *self.status_code.lock().unwrap()
    }

    pub fn start_time(&self) -> Option<String> {
        self.start_time.lock().unwrap().clone()
    }

    pub fn end_time(&self) -> Option<String> {
        self.end_time.lock().unwrap().clone()
    }

    pub fn duration_seconds(&self) -> f64 {
        *self.duration_seconds.lock().unwrap()
    }

    pub fn err(&self) -> Option<String> {
        self.err.lock().unwrap().clone()
    }

    pub async fn combined_output(&self) -> Vec<u8> {
        self.combined_output.lock().await.clone()
    }

    pub async fn qmd_out(&self) -> String {
        self.qmd_out.lock().await.clone()
    }

    /// At-most-once spawn; blocks every caller until `started` is raised.
    pub async fn start(&self) -> Result<(), String> {
        if self.start_guard.try_claim() {
            self.start_once().await;
        }
        self.started.wait().await;
        self.err().map_or(Ok(()), Err)
    }

    async fn start_once(&self) {
        tracing::debug!(job_id = %self.job_id, "starting child process");
        match self.setup_and_spawn().await {
            Ok(child) => {
                *self.pid.lock().unwrap() = child.id();
                *self.child.lock().await = Some(child);
                *self.start_time.lock().unwrap() = Some(now_rfc3339());
                *self.state.lock().unwrap() = State::Running;
                self.started.fire();
                tracing::info!(job_id = %self.job_id, "child process running");
            }
            Err(e) => {
                *self.err.lock().unwrap() = Some(e.to_string());
                *self.status_code.lock().unwrap() = -1;
                *self.state.lock().unwrap() = State::Failed;
                self.started.fire();
                // Failed-to-start also raises `finished`; route through
                // wait_guard so a concurrent wait()/kill() never double-fires
                // it.
                if self.wait_guard.try_claim() {
                    self.finished.fire();
                }
                tracing::info!(job_id = %self.job_id, error = %self.err().unwrap_or_default(), "child process failed to start");
            }
        }
    }

    async fn setup_and_spawn(&self) -> anyhow::Result<tokio::process::Child> {
        tokio::fs::create_dir_all(&self.work_dir)
            .await
            .map_err(|e| anyhow::anyhow!("create work dir {}: {e}", self.work_dir.display()))?;
        tokio::fs::write(&self.qmd_out_file, b"")
            .await
            .map_err(|e| anyhow::anyhow!("create QMD_OUT file: {e}"))?;

        if !self.extra_files.is_empty() {
            let tmp_dir = self.work_dir.join("tmp");
            tokio::fs::create_dir_all(&tmp_dir)
                .await
                .map_err(|e| anyhow::anyhow!("create tmp dir: {e}"))?;
            for (name, contents) in &self.extra_files {
                // Job construction already rejected names containing a path
                // separator; this is a defensive re-check.
                if name.contains('/') || name.contains('\\') {
                    anyhow::bail!("extra_files key contains a path separator: {name:?}");
                }
                tokio::fs::write(tmp_dir.join(name), contents)
                    .await
                    .map_err(|e| anyhow::anyhow!("write extra file {name}: {e}"))?;
            }
        }

        let mut cmd = Command::new(&self.script_path);
        cmd.args(&self.args)
            .env("QMD_TMP", &self.work_dir)
            .env("QMD_STORE", &self.store_dir)
            .env("QMD_OUT", &self.qmd_out_file)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // New process group, leader pid == child pid, so the whole
            // tree can be signaled via `-pid`.
            cmd.process_group(0);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| anyhow::anyhow!("spawn {}: {e}", self.script_path.display()))?;

        let stdout = child.stdout.take().expect("stdout piped");
        let stderr = child.stderr.take().expect("stderr piped");
        self.spawn_output_readers(stdout, stderr).await;

        Ok(child)
    }

    /// Stream stdout and stderr into one combined buffer, preserving
    /// interleaving as observed by the OS on a best-effort basis. The
    /// buffer is reference-counted so these detached tasks can outlive
    /// this call without borrowing `self`. The join handles are kept so
    /// `wait_once` can await both readers draining to EOF before firing
    /// `finished` — `Child::wait` only waits for the process to be
    /// reaped, not for the pipes to be fully read.
    async fn spawn_output_readers(
        &self,
        mut stdout: tokio::process::ChildStdout,
        mut stderr: tokio::process::ChildStderr,
    ) {
        let combined_a = self.combined_output.clone();
        let combined_b = self.combined_output.clone();
        let stdout_handle = tokio::spawn(async move {
            let mut buf = [0u8; 8192];
            loop {
                match stdout.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => combined_a.lock().await.extend_from_slice(&buf[..n]),
                }
            }
        });
        let stderr_handle = tokio::spawn(async move {
            let mut buf = [0u8; 8192];
            loop {
                match stderr.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => combined_b.lock().await.extend_from_slice(&buf[..n]),
                }
            }
        });
        *self.output_readers.lock().await = Some((stdout_handle, stderr_handle));
    }

    /// Blocks on `started`, reaps at most once, then blocks on `finished`.
    pub async fn wait(&self) -> Result<(), String> {
        self.started.wait().await;
        if self.wait_guard.try_claim() {
            self.wait_once().await;
        }
        self.finished.wait().await;
        self.err().map_or(Ok(()), Err)
    }

    async fn wait_once(&self) {
        let start = Instant::now();
        let mut child_slot = self.child.lock().await;
        if let Some(mut child) = child_slot.take() {
            drop(child_slot);
            let status = child.wait().await;
            let duration = start.elapsed();
            *self.duration_seconds.lock().unwrap() = duration.as_secs_f64();
            *self.end_time.lock().unwrap() = Some(now_rfc3339());

            {
                let mut state = self.state.lock().unwrap();
                if *state != State::Terminated {
                    *state = State::Finished;
                }
            }

            match status {
                Ok(status) => {
                    #[cfg(unix)]
                    {
                        use std::os::unix::process::ExitStatusExt;
                        if let Some(code) = status.code() {
                            *self.status_code.lock().unwrap() = code;
                        } else if let Some(sig) = status.signal() {
                            *self.status_code.lock().unwrap() = 128 + sig;
                        }
                    }
                    #[cfg(not(unix))]
                    {
                        *self.status_code.lock().unwrap() = status.code().unwrap_or(-1);
                    }
                }
                Err(e) => {
                    *self.err.lock().unwrap() = Some(e.to_string());
                }
            }

            // Kill the whole process group once more so no grandchildren
            // survive the reap.
            self.signal_group_best_effort();

            // Process reap only guarantees the process exited, not that the
            // stdout/stderr readers have drained to EOF. Wait for both
            // before anyone downstream reads `combined_output`.
            if let Some((stdout_handle, stderr_handle)) = self.output_readers.lock().await.take() {
                let _ = stdout_handle.await;
                let _ = stderr_handle.await;
            }

            if let Ok(bytes) = tokio::fs::read(&self.qmd_out_file).await {
                *self.qmd_out.lock().await = String::from_utf8_lossy(&bytes).into_owned();
            }
        } else {
            drop(child_slot);
        }
        self.finished.fire();
        tracing::info!(job_id = %self.job_id, status_code = self.status_code(), "child process finished");
    }

    /// Idempotent, callable from any state, at any time, from any task.
    pub async fn kill(&self) {
        loop {
            let state = self.state();
            match state {
                State::Running => {
                    *self.state.lock().unwrap() = State::Terminated;
                    tracing::info!(job_id = %self.job_id, "killing running child");
                    self.signal_group_best_effort();
                    return;
                }
                State::Finished => {
                    tracing::debug!(job_id = %self.job_id, "best-effort group cleanup after finish");
                    self.signal_group_best_effort();
                    return;
                }
                State::Initialized => {
                    if self.start_guard.try_claim() {
                        if self.wait_guard.try_claim() {
                            tracing::info!(job_id = %self.job_id, "invalidating before start");
                            *self.state.lock().unwrap() = State::Invalidated;
                            *self.status_code.lock().unwrap() = -2;
                            *self.err.lock().unwrap() = Some("invalidated".to_string());
                            self.finished.fire();
                        }
                        self.started.fire();
                        return;
                    }
                    // A concurrent start() already claimed start_guard.
                    // Wait for it to land, then re-evaluate from the top:
                    // state is now Running or Failed.
                    self.started.wait().await;
                    continue;
                }
                State::Terminated | State::Invalidated | State::Failed => {
                    return;
                }
            }
        }
    }

    fn signal_group_best_effort(&self) {
        #[cfg(unix)]
        {
            let Some(pid) = *self.pid.lock().unwrap() else {
                return;
            };
            let pid = pid as libc::pid_t;
            let pgid = unsafe { libc::getpgid(pid) };
            // On pgid lookup failure, fall back to signaling the child pid
            // directly rather than guessing at a process group.
            let target = if pgid > 0 { -pgid } else { pid };
            let ret = unsafe { libc::kill(target, libc::SIGTERM) };
            if ret != 0 {
                let err = std::io::Error::last_os_error();
                if err.raw_os_error() != Some(libc::ESRCH) {
                    tracing::warn!(job_id = %self.job_id, %err, "signal process group failed");
                }
            }
        }
    }

    /// Remove the job's working directory. Called by the deadline
    /// supervisor once the job has reached a terminal state.
    pub async fn cleanup(&self) {
        if let Err(e) = tokio::fs::remove_dir_all(&self.work_dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(job_id = %self.job_id, error = %e, "cleanup: failed to remove work dir");
            }
        }
    }

    /// Convenience for callers that don't need to observe `started`
    /// separately from `finished` (e.g. tests).
    pub async fn run(&self) -> Result<(), String> {
        self.start().await?;
        self.wait().await
    }
}
