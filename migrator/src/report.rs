//! Run summary: aggregation, JSON persistence and text rendering.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::error::{ErrorKind, MigrationError};
use crate::io::storage::StorageKey;

/// Why a run stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RunStop {
    /// Every entry was visited.
    Completed,
    /// Cancellation was observed at an entry boundary.
    Cancelled,
    /// A fatal error ended the run early.
    Aborted { error: String },
}

impl RunStop {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Aborted { .. } => "aborted",
        }
    }
}

/// Per-entry failure recorded against the entry key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryFailure {
    pub key: String,
    /// Failing migration, or `None` when the post-migration census check failed.
    pub migration: Option<String>,
    pub kind: ErrorKind,
    pub message: String,
}

/// How one migration affected the run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationStats {
    pub changed: usize,
    pub failed: usize,
}

/// Summary of a migration run.
///
/// `entries_processed` counts entries migrated without error (changed or
/// unchanged); failed entries are listed in `failures`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub dry_run: bool,
    pub entries_total: usize,
    pub entries_processed: usize,
    pub entries_changed: usize,
    pub entries_unchanged: usize,
    pub writes: usize,
    pub commits: usize,
    pub migrations: BTreeMap<String, MigrationStats>,
    pub failures: Vec<EntryFailure>,
    pub stop: Option<RunStop>,
}

impl RunReport {
    pub fn new<'a>(dry_run: bool, migrations: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: None,
            dry_run,
            entries_total: 0,
            entries_processed: 0,
            entries_changed: 0,
            entries_unchanged: 0,
            writes: 0,
            commits: 0,
            migrations: migrations
                .into_iter()
                .map(|name| (name.to_string(), MigrationStats::default()))
                .collect(),
            failures: Vec::new(),
            stop: None,
        }
    }

    pub fn record_unchanged(&mut self) {
        self.entries_processed += 1;
        self.entries_unchanged += 1;
    }

    /// Record a changed entry and credit every migration that changed it.
    pub fn record_changed<'a>(&mut self, changed_by: impl IntoIterator<Item = &'a str>) {
        self.entries_processed += 1;
        self.entries_changed += 1;
        for name in changed_by {
            self.migrations.entry(name.to_string()).or_default().changed += 1;
        }
    }

    pub fn record_failure(
        &mut self,
        key: &StorageKey,
        migration: Option<&str>,
        error: &MigrationError,
    ) {
        if let Some(name) = migration {
            self.migrations.entry(name.to_string()).or_default().failed += 1;
        }
        self.failures.push(EntryFailure {
            key: key.to_string(),
            migration: migration.map(str::to_string),
            kind: error.kind(),
            message: error.to_string(),
        });
    }

    pub fn finish(&mut self, stop: RunStop) {
        self.finished_at = Some(Utc::now());
        self.stop = Some(stop);
    }

    /// Entries visited so far, successful or not.
    pub fn entries_visited(&self) -> usize {
        self.entries_processed + self.failures.len()
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Stable `report: ...` lines for terminal output.
pub fn render_summary(report: &RunReport) -> Vec<String> {
    let stop = report.stop.as_ref().map_or("running", RunStop::label);
    let mut lines = vec![format!(
        "report: stop={stop} total={} processed={} changed={} unchanged={} failed={} writes={} commits={}{}",
        report.entries_total,
        report.entries_processed,
        report.entries_changed,
        report.entries_unchanged,
        report.failures.len(),
        report.writes,
        report.commits,
        if report.dry_run { " dry_run" } else { "" },
    )];
    if let Some(RunStop::Aborted { error }) = &report.stop {
        lines.push(format!(
            "report: aborted after {} entries: {error}",
            report.entries_visited()
        ));
    }
    for (name, stats) in &report.migrations {
        lines.push(format!(
            "report: migration {name} changed={} failed={}",
            stats.changed, stats.failed
        ));
    }
    for failure in &report.failures {
        let migration = failure.migration.as_deref().unwrap_or("census");
        lines.push(format!(
            "report: failure {} [{migration}] {}: {}",
            failure.key,
            failure.kind.as_str(),
            failure.message
        ));
    }
    lines
}

/// Atomically write the report as pretty JSON (temp file + rename).
pub fn write_report(path: &Path, report: &RunReport) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let mut buf = serde_json::to_string_pretty(report).context("serialize report")?;
    buf.push('\n');
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, buf)
        .with_context(|| format!("write temp report {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace report {}", path.display()))?;
    Ok(())
}

/// Load a report written by [`write_report`].
pub fn load_report(path: &Path) -> Result<RunReport> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse report {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::storage_key;

    fn sample() -> RunReport {
        let mut report = RunReport::new(false, ["EntitlementsMigration"]);
        report.entries_total = 3;
        report.record_changed(["EntitlementsMigration"]);
        report.record_unchanged();
        report.record_failure(
            &storage_key(1, "broken"),
            Some("EntitlementsMigration"),
            &MigrationError::ValueShapeMismatch {
                path: "$.r".to_string(),
                expected: "reference".to_string(),
                found: "leaf".to_string(),
            },
        );
        report.finish(RunStop::Completed);
        report
    }

    #[test]
    fn counts_and_migration_stats_accumulate() {
        let report = sample();
        assert_eq!(report.entries_processed, 2);
        assert_eq!(report.entries_visited(), 3);
        assert_eq!(
            report.migrations.get("EntitlementsMigration"),
            Some(&MigrationStats {
                changed: 1,
                failed: 1
            })
        );
        assert!(report.has_failures());
    }

    #[test]
    fn summary_lines_are_stable() {
        let lines = render_summary(&sample());
        assert_eq!(
            lines[0],
            "report: stop=completed total=3 processed=2 changed=1 unchanged=1 failed=1 writes=0 commits=0"
        );
        assert_eq!(
            lines[1],
            "report: migration EntitlementsMigration changed=1 failed=1"
        );
        assert!(lines[2].starts_with(
            "report: failure 0x0000000000000001/storage/broken [EntitlementsMigration] value_shape_mismatch:"
        ));
    }

    #[test]
    fn aborted_summary_reports_entries_before_abort() {
        let mut report = RunReport::new(false, ["m"]);
        report.record_unchanged();
        report.finish(RunStop::Aborted {
            error: "storage unavailable: down".to_string(),
        });
        let lines = render_summary(&report);
        assert!(lines.contains(
            &"report: aborted after 1 entries: storage unavailable: down".to_string()
        ));
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("reports/run.json");
        let report = sample();
        write_report(&path, &report).expect("write");
        assert_eq!(load_report(&path).expect("load"), report);
    }
}
