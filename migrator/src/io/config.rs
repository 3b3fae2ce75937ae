//! Migration run configuration stored in `migrator.toml`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Default config file name, resolved against the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "migrator.toml";

/// Migration run configuration (TOML).
///
/// Edited by operators; missing fields default to a sequential, verifying run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MigratorConfig {
    /// Worker threads migrating entries in parallel. `1` runs sequentially.
    pub workers: usize,

    /// Entries read per fan-out round.
    pub batch_size: usize,

    /// Commit after this many writes. `0` commits once at the end of the run.
    pub commit_interval: usize,

    /// Compare the resource census of every entry before and after migration.
    pub verify_linearity: bool,

    /// Compute the report without writing anything back.
    pub dry_run: bool,
}

impl Default for MigratorConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            batch_size: 256,
            commit_interval: 0,
            verify_linearity: true,
            dry_run: false,
        }
    }
}

impl MigratorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(anyhow!("workers must be > 0"));
        }
        if self.batch_size == 0 {
            return Err(anyhow!("batch_size must be > 0"));
        }
        if self.workers > self.batch_size {
            return Err(anyhow!(
                "workers ({}) must not exceed batch_size ({})",
                self.workers,
                self.batch_size
            ));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `MigratorConfig::default()`.
pub fn load_config(path: &Path) -> Result<MigratorConfig> {
    if !path.exists() {
        let cfg = MigratorConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: MigratorConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &MigratorConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
