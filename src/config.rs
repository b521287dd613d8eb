//! Engine configuration, loaded and validated from a TOML file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Runtime configuration for the worker pool and its default collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Pool size.
    pub workers: usize,
    /// Per-job wall-clock deadline, in seconds.
    pub max_exec_seconds: u64,
    /// Parent directory of per-job working directories.
    pub work_root: PathBuf,
    /// Value exposed to children as `QMD_STORE`.
    pub store_dir: PathBuf,
    /// Line-delimited list of allowed script names.
    pub whitelist_path: PathBuf,
    /// Directory the whitelisted script names are resolved against.
    pub script_dir: PathBuf,
    /// Root directory the default filesystem `ResultStore` writes under.
    #[serde(default = "default_result_root")]
    pub result_root: PathBuf,
}

fn default_result_root() -> PathBuf {
    PathBuf::from("qmd-results")
}

impl Config {
    /// Load and validate a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config file {}", path.display()))?;
        let cfg: Config = toml::from_str(&raw)
            .with_context(|| format!("parse config file {}", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            anyhow::bail!("config: workers must be >= 1");
        }
        if self.max_exec_seconds == 0 {
            anyhow::bail!("config: max_exec_seconds must be > 0");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_workers() {
        let cfg = Config {
            workers: 0,
            max_exec_seconds: 10,
            work_root: "/tmp/work".into(),
            store_dir: "/tmp/store".into(),
            whitelist_path: "/tmp/whitelist".into(),
            script_dir: "/tmp/scripts".into(),
            result_root: "/tmp/results".into(),
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn loads_minimal_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
            workers = 4
            max_exec_seconds = 30
            work_root = "/tmp/qmd/work"
            store_dir = "/tmp/qmd/store"
            whitelist_path = "/tmp/qmd/whitelist.txt"
            script_dir = "/tmp/qmd/scripts"
            "#,
        )
        .unwrap();
        let cfg = Config::load(&path).expect("load config");
        assert_eq!(cfg.workers, 4);
        assert_eq!(cfg.max_exec_seconds, 30);
        assert_eq!(cfg.result_root, PathBuf::from("qmd-results"));
    }
}
