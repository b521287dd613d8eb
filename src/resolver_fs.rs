//! `WhitelistResolver` — a default, dev-grade `ScriptResolver` implementation.
//!
//! Reads a line-delimited whitelist file and resolves names against
//! `script_dir`. A more capable loader (reload-on-SIGHUP, remote sources,
//! per-script metadata) could implement the same trait.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::contracts::ScriptResolver;

pub struct WhitelistResolver {
    whitelist_path: PathBuf,
    script_dir: PathBuf,
    cache: RwLock<HashSet<String>>,
}

impl WhitelistResolver {
    pub async fn load(whitelist_path: PathBuf, script_dir: PathBuf) -> anyhow::Result<Self> {
        let cache = read_whitelist(&whitelist_path).await?;
        Ok(WhitelistResolver {
            whitelist_path,
            script_dir,
            cache: RwLock::new(cache),
        })
    }

    /// Re-read the whitelist file from disk, replacing the cached set.
    pub async fn reload(&self) -> anyhow::Result<()> {
        let fresh = read_whitelist(&self.whitelist_path).await?;
        *self.cache.write().await = fresh;
        Ok(())
    }
}

async fn read_whitelist(path: &Path) -> anyhow::Result<HashSet<String>> {
    let raw = tokio::fs::read_to_string(path).await?;
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

#[async_trait]
impl ScriptResolver for WhitelistResolver {
    async fn resolve(&self, script_name: &str) -> anyhow::Result<Option<PathBuf>> {
        if script_name.contains('/') || script_name.contains('\\') || script_name.contains("..") {
            return Ok(None);
        }
        if !self.cache.read().await.contains(script_name) {
            return Ok(None);
        }
        Ok(Some(self.script_dir.join(script_name)))
    }
}
