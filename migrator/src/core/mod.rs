//! Deterministic, pure logic shared by the migration engine.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! type and value trees and return deterministic outputs suitable for tests.

pub mod entitled_type;
pub mod error;
pub mod linearity;
pub mod types;
pub mod value;
pub mod value_migrator;
