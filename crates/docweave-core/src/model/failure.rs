use super::entity::EntityId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Well-known failure kinds
pub mod kinds {
    /// Posted when an evaluation runs as a dry run; never shown to the user
    pub const SIMULATED_TRANSACTION: &str = "transaction.simulated";
    /// Two entities of the same kind share a name
    pub const NAME_NOT_UNIQUE: &str = "entity.name-not-unique";
}

/// Ordered failure severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
    DocumentCorruption,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => f.write_str("Warning"),
            Severity::Error => f.write_str("Error"),
            Severity::DocumentCorruption => f.write_str("DocumentCorruption"),
        }
    }
}

/// Identifier of a failure kind, e.g. `entity.name-not-unique`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FailureKind(String);

impl FailureKind {
    pub fn new(kind: impl Into<String>) -> Self {
        Self(kind.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_simulated_transaction(&self) -> bool {
        self.0 == kinds::SIMULATED_TRANSACTION
    }
}

impl From<&str> for FailureKind {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Store-assigned handle of a failure within one validation pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FailureId(pub u32);

/// An issue raised by the store's pre-commit validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub id: FailureId,
    pub kind: FailureKind,
    pub severity: Severity,
    pub description: Option<String>,
    pub failing: Vec<EntityId>,
    /// Set once the store has been asked to resolve this failure during the
    /// current commit attempt.
    pub resolution_attempted: bool,
    /// Whether the store permits an automatic resolution
    pub resolvable: bool,
}

impl FailureRecord {
    /// Description shown to the user, falling back to "{severity} {kind}"
    pub fn display_description(&self) -> String {
        match &self.description {
            Some(d) if !d.trim().is_empty() => d.clone(),
            _ => format!("{} {}", self.severity, self.kind),
        }
    }

    /// Identity of a failure across re-validation passes
    pub fn signature(&self) -> (FailureKind, Vec<EntityId>) {
        (self.kind.clone(), self.failing.clone())
    }
}

/// A failure posted to a store by the reconcile loop itself
#[derive(Debug, Clone, PartialEq)]
pub struct FailureDraft {
    pub kind: FailureKind,
    pub severity: Severity,
    pub description: Option<String>,
    pub failing: Vec<EntityId>,
    pub resolvable: bool,
}

impl FailureDraft {
    pub fn new(kind: impl Into<FailureKind>, severity: Severity) -> Self {
        Self {
            kind: kind.into(),
            severity,
            description: None,
            failing: Vec::new(),
            resolvable: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_failing(mut self, failing: Vec<EntityId>) -> Self {
        self.failing = failing;
        self
    }

    /// The failure that turns a commit into a dry run
    pub fn simulated_transaction() -> Self {
        Self::new(kinds::SIMULATED_TRANSACTION, Severity::Error)
            .with_description("Transaction was simulated. All changes it did are not effective.")
    }
}
