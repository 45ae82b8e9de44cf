//! Migration framework
//!
//! Provides:
//! - Migration runner with checksums of applied SQL
//! - Idempotent application
//! - Embedded SQL migrations

mod checksums;
mod embedded;
mod runner;

pub use checksums::compute_checksum;
pub use runner::{applied_migrations, apply_migrations};
