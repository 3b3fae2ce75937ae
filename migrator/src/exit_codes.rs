//! Stable exit codes for migrator CLI commands.

use crate::report::{RunReport, RunStop};

/// Run completed and every entry migrated cleanly.
pub const OK: i32 = 0;
/// Invalid config/snapshot, or the run aborted on a fatal error.
pub const INVALID: i32 = 1;
/// Run completed but at least one entry failed to migrate.
pub const FAILURES: i32 = 2;
/// Run was cancelled before visiting every entry.
pub const CANCELLED: i32 = 3;

/// Exit code for a finished run.
pub fn for_report(report: &RunReport) -> i32 {
    match report.stop {
        Some(RunStop::Cancelled) => CANCELLED,
        Some(RunStop::Aborted { .. }) | None => INVALID,
        Some(RunStop::Completed) if report.has_failures() => FAILURES,
        Some(RunStop::Completed) => OK,
    }
}
