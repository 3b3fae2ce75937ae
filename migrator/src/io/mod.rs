//! I/O collaborators: configuration, storage and snapshots.

pub mod config;
pub mod snapshot;
pub mod storage;
