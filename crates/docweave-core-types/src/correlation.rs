//! Correlation types for evaluation-cycle tracking
//!
//! A recomputation pass of the dataflow graph is one *cycle*; every
//! transaction opened during that cycle carries its own identifier so log
//! events from reconciliation, resolution, and commit can be joined.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for one evaluation cycle of a node
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CycleId(String);

impl CycleId {
    /// Generate a new CycleId using UUIDv7
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Create from an existing string (for deserialization)
    pub fn from_string(s: String) -> Self {
        Self(s)
    }
}

impl Default for CycleId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CycleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a single transaction instance
///
/// Transactions are created fresh per cycle and per document, so two
/// transactions against the same document never share an id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId(String);

impl TransactionId {
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn from_string(s: String) -> Self {
        Self(s)
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Context carried through one evaluation for correlation
#[derive(Debug, Clone)]
pub struct CycleContext {
    pub cycle_id: CycleId,
    /// Name given to the transactions opened during the cycle
    pub name: String,
}

impl CycleContext {
    /// Create a new context with a fresh CycleId
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            cycle_id: CycleId::new(),
            name: name.into(),
        }
    }

    /// Create a context reusing an existing CycleId
    pub fn with_cycle_id(cycle_id: CycleId, name: impl Into<String>) -> Self {
        Self {
            cycle_id,
            name: name.into(),
        }
    }
}
