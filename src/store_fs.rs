//! `FsResultStore` — a default, dev-grade `ResultStore` implementation.
//!
//! Writes one JSON file per job under `<result_root>/<script_name>/<job_id>.json`.
//! A production deployment would likely swap this for a database-backed
//! store instead.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::contracts::ResultStore;
use crate::response::Response;

pub struct FsResultStore {
    root: PathBuf,
}

impl FsResultStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FsResultStore { root: root.into() }
    }

    fn path_for(&self, script_name: &str, job_id: &str) -> PathBuf {
        self.root.join(script_name).join(format!("{job_id}.json"))
    }

    /// Read back a previously saved response. Not part of the `ResultStore`
    /// contract; used by tests and by a future query surface.
    pub async fn load(&self, script_name: &str, job_id: &str) -> anyhow::Result<Response> {
        let path = self.path_for(script_name, job_id);
        let raw = tokio::fs::read(&path).await?;
        Ok(serde_json::from_slice(&raw)?)
    }
}

#[async_trait]
impl ResultStore for FsResultStore {
    async fn save_response(&self, response: &Response) -> anyhow::Result<()> {
        let path = self.path_for(&response.script_name, &response.job_id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let body = serde_json::to_vec_pretty(response)?;
        write_atomically(&path, &body).await
    }
}

/// Write-to-temp-then-rename so a reader never observes a partially written
/// file.
async fn write_atomically(path: &Path, body: &[u8]) -> anyhow::Result<()> {
    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, body).await?;
    tokio::fs::rename(&tmp_path, path).await?;
    Ok(())
}
