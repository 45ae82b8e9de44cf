//! docweave store - SQLite-backed documents
//!
//! Provides:
//! - SQLite schema with a checksummed migrations framework
//! - `SqliteDocument`, a `DocumentStore` over one rusqlite connection
//! - Save/load of Previous-Structure snapshots with a digest check

pub mod db;
pub mod document;
pub mod errors;
pub mod migrations;
pub mod structure;

// Re-export key types
pub use document::SqliteDocument;
pub use errors::Result;
pub use structure::{delete_structure, load_structure, save_structure, StoredStructure};
