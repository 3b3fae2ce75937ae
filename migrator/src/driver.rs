//! Run the migration registry over every entry in storage.
//!
//! Entries are independent: each is read, threaded through the registry in
//! order, optionally census-checked, and written back only when its value
//! changed. Per-entry failures are recorded and the run moves on; fatal
//! failures roll back uncommitted writes and abort with the partial report.
//!
//! With more than one worker, each batch of entries is migrated on a scoped
//! thread pool and the results are written back sequentially in key order.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::core::error::MigrationError;
use crate::core::linearity::{compare_census, resource_census};
use crate::core::value::Value;
use crate::core::value_migrator::ROOT_PATH;
use crate::io::config::MigratorConfig;
use crate::io::storage::{Storage, StorageError, StorageKey};
use crate::migrations::{MigrationRegistry, RegistryError};
use crate::report::{RunReport, RunStop};

/// Cooperative cancellation flag shared between the caller and a run.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Failure that ends a whole run.
#[derive(Debug, Error)]
pub enum FatalError {
    #[error("invalid driver config: {0}")]
    InvalidConfig(String),
    #[error("migration registry is empty")]
    EmptyRegistry,
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("migration {migration} failed fatally on {key}")]
    Migration {
        key: StorageKey,
        migration: String,
        #[source]
        source: MigrationError,
    },
    #[error("migration worker panicked")]
    WorkerPanicked,
}

/// A run that stopped on a [`FatalError`], with what it did before stopping.
#[derive(Debug, Error)]
#[error("migration run aborted after {} entries", .report.entries_visited())]
pub struct RunAborted {
    #[source]
    pub error: FatalError,
    pub report: Box<RunReport>,
}

/// Result of migrating one entry, before write-back.
#[derive(Debug)]
enum EntryResult {
    /// Cancellation was observed before the entry started.
    Skipped,
    Unchanged,
    Changed {
        value: Value,
        /// Registry indices of the migrations that changed the value.
        changed_by: Vec<usize>,
    },
    Failed {
        /// Registry index of the failing migration; `None` for the census check.
        migration: Option<usize>,
        error: MigrationError,
    },
}

/// Migrate every entry of `storage` with `registry`.
///
/// Returns the report of a completed or cancelled run. Writes are staged in
/// `storage` and committed every `commit_interval` writes and at the end of
/// the run. A cancelled run commits what it wrote.
#[instrument(skip_all, fields(workers = config.workers, dry_run = config.dry_run))]
pub fn run_migrations<S: Storage>(
    storage: &mut S,
    registry: &MigrationRegistry,
    config: &MigratorConfig,
    cancel: &CancellationToken,
) -> Result<RunReport, RunAborted> {
    let names = registry.names();
    let mut report = RunReport::new(config.dry_run, names.iter().map(String::as_str));

    if let Err(error) = preflight(registry, config) {
        return Err(abort(storage, report, error));
    }
    let keys = match storage.keys() {
        Ok(keys) => keys,
        Err(err) => return Err(abort(storage, report, err.into())),
    };
    report.entries_total = keys.len();
    info!(
        entries = keys.len(),
        migrations = ?names,
        "migration run started"
    );

    let mut pending_writes = 0usize;
    let mut stop = RunStop::Completed;
    for batch_keys in keys.chunks(config.batch_size) {
        let batch = match read_batch(storage, batch_keys, cancel) {
            Ok(batch) => batch,
            Err(err) => return Err(abort(storage, report, err)),
        };
        let results = match migrate_batch(&batch, registry, config, cancel) {
            Ok(results) => results,
            Err(err) => return Err(abort(storage, report, err)),
        };

        let mut skipped = batch_keys.len() - batch.len();
        for (key, result) in results {
            if matches!(result, EntryResult::Skipped) {
                skipped += 1;
                continue;
            }
            if let Err(err) =
                write_back(storage, &names, config, &key, result, &mut report, &mut pending_writes)
            {
                return Err(abort(storage, report, err));
            }
        }
        if skipped > 0 {
            stop = RunStop::Cancelled;
            break;
        }
    }

    if pending_writes > 0 {
        if let Err(err) = storage.commit() {
            return Err(abort(storage, report, err.into()));
        }
        report.commits += 1;
    }
    if stop == RunStop::Cancelled {
        warn!(
            visited = report.entries_visited(),
            total = report.entries_total,
            "migration run cancelled"
        );
    }
    report.finish(stop);
    info!(
        processed = report.entries_processed,
        changed = report.entries_changed,
        failed = report.failures.len(),
        "migration run finished"
    );
    Ok(report)
}

fn preflight(registry: &MigrationRegistry, config: &MigratorConfig) -> Result<(), FatalError> {
    config
        .validate()
        .map_err(|err| FatalError::InvalidConfig(format!("{err:#}")))?;
    if registry.is_empty() {
        return Err(FatalError::EmptyRegistry);
    }
    registry.validate()?;
    Ok(())
}

/// Read the values of `keys`, stopping early at the first observed cancellation.
fn read_batch<S: Storage>(
    storage: &S,
    keys: &[StorageKey],
    cancel: &CancellationToken,
) -> Result<Vec<(StorageKey, Arc<Value>)>, FatalError> {
    let mut batch = Vec::with_capacity(keys.len());
    for key in keys {
        if cancel.is_cancelled() {
            break;
        }
        let value = storage.get(key)?.ok_or_else(|| StorageError::Read {
            key: key.clone(),
            reason: "entry disappeared during the run".to_string(),
        })?;
        batch.push((key.clone(), value));
    }
    Ok(batch)
}

fn migrate_batch(
    batch: &[(StorageKey, Arc<Value>)],
    registry: &MigrationRegistry,
    config: &MigratorConfig,
    cancel: &CancellationToken,
) -> Result<Vec<(StorageKey, EntryResult)>, FatalError> {
    if config.workers <= 1 || batch.len() <= 1 {
        return Ok(migrate_slice(batch, registry, config, cancel));
    }

    let chunk_len = batch.len().div_ceil(config.workers);
    let joined: Vec<thread::Result<Vec<(StorageKey, EntryResult)>>> = thread::scope(|scope| {
        let handles: Vec<_> = batch
            .chunks(chunk_len)
            .map(|chunk| scope.spawn(move || migrate_slice(chunk, registry, config, cancel)))
            .collect();
        handles.into_iter().map(|handle| handle.join()).collect()
    });

    let mut results = Vec::with_capacity(batch.len());
    for worker in joined {
        results.extend(worker.map_err(|_| FatalError::WorkerPanicked)?);
    }
    Ok(results)
}

fn migrate_slice(
    slice: &[(StorageKey, Arc<Value>)],
    registry: &MigrationRegistry,
    config: &MigratorConfig,
    cancel: &CancellationToken,
) -> Vec<(StorageKey, EntryResult)> {
    slice
        .iter()
        .map(|(key, value)| {
            let result = if cancel.is_cancelled() {
                EntryResult::Skipped
            } else {
                migrate_entry(registry, value, config.verify_linearity)
            };
            (key.clone(), result)
        })
        .collect()
}

/// Thread `original` through every migration in order.
fn migrate_entry(registry: &MigrationRegistry, original: &Value, verify: bool) -> EntryResult {
    let mut current: Option<Value> = None;
    let mut changed_by = Vec::new();
    for (index, migration) in registry.iter().enumerate() {
        let input = current.as_ref().unwrap_or(original);
        match migration.migrate(input) {
            Ok(next) => {
                if next != *input {
                    changed_by.push(index);
                    current = Some(next);
                }
            }
            Err(error) => {
                return EntryResult::Failed {
                    migration: Some(index),
                    error,
                };
            }
        }
    }

    let Some(value) = current else {
        return EntryResult::Unchanged;
    };
    if verify {
        let errors = compare_census(&resource_census(original), &resource_census(&value));
        if !errors.is_empty() {
            return EntryResult::Failed {
                migration: None,
                error: MigrationError::linearity(ROOT_PATH, None, errors.join("; ")),
            };
        }
    }
    EntryResult::Changed { value, changed_by }
}

fn write_back<S: Storage>(
    storage: &mut S,
    names: &[String],
    config: &MigratorConfig,
    key: &StorageKey,
    result: EntryResult,
    report: &mut RunReport,
    pending_writes: &mut usize,
) -> Result<(), FatalError> {
    match result {
        EntryResult::Skipped => {
            debug!(key = %key, "entry skipped after cancellation");
        }
        EntryResult::Unchanged => {
            debug!(key = %key, "entry unchanged");
            report.record_unchanged();
        }
        EntryResult::Changed { value, changed_by } => {
            debug!(key = %key, migrations = changed_by.len(), "entry changed");
            if !config.dry_run {
                storage.set(key, value)?;
                report.writes += 1;
                *pending_writes += 1;
                if config.commit_interval > 0 && *pending_writes >= config.commit_interval {
                    storage.commit()?;
                    report.commits += 1;
                    *pending_writes = 0;
                }
            }
            report.record_changed(changed_by.iter().map(|&index| names[index].as_str()));
        }
        EntryResult::Failed { migration, error } => {
            let name = migration.map(|index| names[index].as_str());
            if error.is_fatal() {
                return Err(FatalError::Migration {
                    key: key.clone(),
                    migration: name.unwrap_or("census").to_string(),
                    source: error,
                });
            }
            warn!(key = %key, migration = ?name, error = %error, "entry failed");
            report.record_failure(key, name, &error);
        }
    }
    Ok(())
}

/// Roll back uncommitted writes and package the partial report.
fn abort<S: Storage>(storage: &mut S, mut report: RunReport, error: FatalError) -> RunAborted {
    if let Err(rollback) = storage.rollback() {
        warn!(error = %rollback, "rollback after fatal error failed");
    }
    warn!(
        error = %error,
        visited = report.entries_visited(),
        "migration run aborted"
    );
    report.finish(RunStop::Aborted {
        error: error_chain(&error),
    });
    RunAborted {
        error,
        report: Box::new(report),
    }
}

/// `error` followed by its sources, joined with `: `.
fn error_chain(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
