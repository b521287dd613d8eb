//! End-to-end scenarios against real child processes.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use qmd::child::{ChildProcess, State};
use qmd::job::Job;
use qmd::pool::Pool;
use qmd::queue_mem::InMemoryQueue;
use qmd::resolver_fs::WhitelistResolver;
use qmd::shutdown::OneShotSignal;
use qmd::store_fs::FsResultStore;

struct Harness {
    _tmp: tempfile::TempDir,
    script_dir: PathBuf,
    work_root: PathBuf,
    result_root: PathBuf,
}

impl Harness {
    fn new() -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let script_dir = tmp.path().join("scripts");
        let work_root = tmp.path().join("work");
        let result_root = tmp.path().join("results");
        std::fs::create_dir_all(&script_dir).unwrap();
        std::fs::create_dir_all(&work_root).unwrap();
        std::fs::create_dir_all(&result_root).unwrap();
        Harness {
            _tmp: tmp,
            script_dir,
            work_root,
            result_root,
        }
    }

    fn write_script(&self, name: &str, body: &str) -> PathBuf {
        let path = self.script_dir.join(name);
        std::fs::write(&path, body).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        path
    }

    fn whitelist(&self, names: &[&str]) -> PathBuf {
        let path = self._tmp.path().join("whitelist.txt");
        std::fs::write(&path, names.join("\n")).unwrap();
        path
    }
}

async fn run_single_job(
    h: &Harness,
    job: Job,
    max_exec: Duration,
    whitelist_names: &[&str],
) -> qmd::response::Response {
    let queue = Arc::new(InMemoryQueue::new());
    let job_id = job.job_id.clone();
    let script_name = job.script_name.clone();
    queue.enqueue_job(job);
    run_queued_job(h, queue, &script_name, &job_id, max_exec, whitelist_names).await
}

/// Enqueue a raw JSON queue payload and run it through the real decode path
/// (`InMemoryQueue::enqueue_raw` -> `Job::decode`), rather than constructing
/// a `Job` struct literal directly.
async fn run_single_raw_payload(
    h: &Harness,
    job_id: &str,
    raw: &[u8],
    script_name: &str,
    max_exec: Duration,
    whitelist_names: &[&str],
) -> qmd::response::Response {
    let queue = Arc::new(InMemoryQueue::new());
    queue.enqueue_raw(job_id, raw.to_vec());
    run_queued_job(h, queue, script_name, job_id, max_exec, whitelist_names).await
}

async fn run_queued_job(
    h: &Harness,
    queue: Arc<InMemoryQueue>,
    script_name: &str,
    job_id: &str,
    max_exec: Duration,
    whitelist_names: &[&str],
) -> qmd::response::Response {
    let whitelist_path = h.whitelist(whitelist_names);
    let resolver = Arc::new(
        WhitelistResolver::load(whitelist_path, h.script_dir.clone())
            .await
            .unwrap(),
    );
    let result_store = Arc::new(FsResultStore::new(h.result_root.clone()));
    queue.close();

    let pool = Pool {
        workers: 1,
        queue: queue.clone(),
        result_store: result_store.clone(),
        resolver,
        work_root: h.work_root.clone(),
        store_dir: h.work_root.clone(),
        max_exec,
    };

    let shutdown = Arc::new(OneShotSignal::new());
    pool.run(shutdown).await;

    result_store.load(script_name, job_id).await.expect("saved response")
}

fn job(job_id: &str, script: &str, args: Vec<&str>, files: BTreeMap<String, String>) -> Job {
    Job {
        job_id: job_id.into(),
        script_name: script.into(),
        args: args.into_iter().map(String::from).collect(),
        extra_files: files,
        callback_url: None,
        priority: Default::default(),
    }
}

#[tokio::test]
async fn scenario_1_happy_path() {
    let h = Harness::new();
    h.write_script("echo", "#!/bin/sh\necho \"$@\"\nexit 0\n");

    let response = run_single_job(
        &h,
        job("j1", "echo", vec!["hello"], BTreeMap::new()),
        Duration::from_secs(10),
        &["echo"],
    )
    .await;

    assert!(matches!(response.status, qmd::response::Status::Ok));
    assert!(response.exec_log.contains("hello"));
}

#[tokio::test]
async fn scenario_2_deadline_exceeded() {
    let h = Harness::new();
    h.write_script("sleep30", "#!/bin/sh\nsleep 30\nexit 0\n");

    let start = std::time::Instant::now();
    let response = run_single_job(
        &h,
        job("j2", "sleep30", vec![], BTreeMap::new()),
        Duration::from_secs(1),
        &["sleep30"],
    )
    .await;
    let elapsed = start.elapsed();

    assert!(matches!(response.status, qmd::response::Status::Err));
    assert!(elapsed < Duration::from_millis(2500), "elapsed={elapsed:?}");
}

#[tokio::test]
async fn scenario_3_bad_filename_never_spawns() {
    let h = Harness::new();
    h.write_script("noop", "#!/bin/sh\nexit 0\n");

    // Goes through the real wire-decode path: `Job::decode` accepts this
    // payload (a path-separator key is not a decode error), so the job
    // reaches `ChildProcess`, which fails to spawn it.
    let raw = br#"{"script":"noop","args":[],"files":{"a/b":"x"}}"#;
    let response = run_single_raw_payload(
        &h,
        "j3",
        raw,
        "noop",
        Duration::from_secs(5),
        &["noop"],
    )
    .await;

    assert!(matches!(response.status, qmd::response::Status::Err));
    assert!(response.err.is_some());
}

#[tokio::test]
async fn scenario_4_pre_start_kill_invalidates() {
    let h = Harness::new();
    let script = h.write_script("noop", "#!/bin/sh\nexit 0\n");
    let child = ChildProcess::new(
        "j4",
        script,
        vec![],
        &h.work_root,
        h.result_root.clone(),
        BTreeMap::new(),
    );

    child.kill().await;

    assert_eq!(child.state(), State::Invalidated);
    assert_eq!(child.status_code(), -2);
    assert!(child.started.is_fired());
    assert!(child.finished.is_fired());
}

#[tokio::test]
async fn scenario_5_concurrent_start_and_kill_race() {
    let h = Harness::new();
    let script = h.write_script("sleep5", "#!/bin/sh\nsleep 5\nexit 0\n");
    let child = Arc::new(ChildProcess::new(
        "j5",
        script,
        vec![],
        &h.work_root,
        h.result_root.clone(),
        BTreeMap::new(),
    ));

    let starter = {
        let child = child.clone();
        tokio::spawn(async move { child.start().await })
    };
    let killer = {
        let child = child.clone();
        tokio::spawn(async move { child.kill().await })
    };
    let _ = starter.await;
    killer.await.unwrap();
    let _ = child.wait().await;

    assert!(
        matches!(child.state(), State::Terminated | State::Invalidated),
        "unexpected state: {:?}",
        child.state()
    );
    assert!(child.started.is_fired());
    assert!(child.finished.is_fired());
}

#[tokio::test]
async fn scenario_6_shutdown_mid_run_nacks_without_saving() {
    let h = Harness::new();
    h.write_script("sleep10", "#!/bin/sh\nsleep 10\nexit 0\n");
    let whitelist_path = h.whitelist(&["sleep10"]);
    let resolver = Arc::new(
        WhitelistResolver::load(whitelist_path, h.script_dir.clone())
            .await
            .unwrap(),
    );
    let result_store = Arc::new(FsResultStore::new(h.result_root.clone()));
    let queue = Arc::new(InMemoryQueue::new());
    queue.enqueue_job(job("j6", "sleep10", vec![], BTreeMap::new()));

    let pool = Pool {
        workers: 1,
        queue: queue.clone(),
        result_store: result_store.clone(),
        resolver,
        work_root: h.work_root.clone(),
        store_dir: h.work_root.clone(),
        max_exec: Duration::from_secs(60),
    };

    let shutdown = Arc::new(OneShotSignal::new());
    let shutdown_clone = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        shutdown_clone.fire();
    });

    pool.run(shutdown).await;

    assert!(result_store.load("sleep10", "j6").await.is_err());
    assert!(!h.work_root.join("j6").exists());
}
