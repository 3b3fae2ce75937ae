//! Development-time tracing for debugging migration runs.
//!
//! Tracing output is diagnostics only. The run summary printed by the CLI and
//! the JSON report written with `--report` are unaffected by `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when `RUST_LOG` is unset or does not parse.
pub const DEFAULT_FILTER: &str = "warn";

/// Install the stderr subscriber for a CLI process.
///
/// Per-entry outcomes log at `debug`, entry failures at `warn`, run start
/// and finish at `info`.
///
/// # Example
/// ```bash
/// RUST_LOG=migrator=debug migrator check snapshot.json
/// ```
pub fn init() {
    let directives = std::env::var(EnvFilter::DEFAULT_ENV).ok();

    tracing_subscriber::registry()
        .with(filter_from(directives.as_deref()))
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}

fn filter_from(directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_directives_fall_back_to_default() {
        assert_eq!(filter_from(None).to_string(), DEFAULT_FILTER);
    }

    #[test]
    fn crate_directive_is_kept() {
        assert_eq!(
            filter_from(Some("migrator=debug")).to_string(),
            "migrator=debug"
        );
    }
}
