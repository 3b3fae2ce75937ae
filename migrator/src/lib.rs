//! Entitlements migration engine for persisted contract storage.
//!
//! Rewrites every unauthorized reference type and value found in storage into
//! its entitled form, preserving value identity and resource linearity.
//!
//! - **[`core`]**: Pure, deterministic logic (type and value migration,
//!   resource census). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting collaborators (config file, storage, snapshots).
//!
//! [`migrations`] holds the plugin contract and registry; [`driver`] runs a
//! registry over storage and produces a [`report::RunReport`].

pub mod core;
pub mod driver;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod migrations;
pub mod report;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
