//! Failure-processing, tracking, and property-copy policies
//!
//! These are the knobs a node exposes to the user. They never touch the
//! store themselves except for [`resolve_name_conflict`], which applies the
//! failure-processing mode to a name collision.

use crate::diagnostics::Diagnostic;
use crate::errors::{DocweaveError, Result};
use crate::model::{kinds, Entity, EntityId, FailureDraft, Severity};
use crate::store::DocumentStore;
use serde::{Deserialize, Serialize};

/// What to do with failures the store raises during commit
///
/// Variants are ordered from most to least permissive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureProcessingMode {
    /// Fix what can be fixed, report the rest, and let the store decide
    #[default]
    #[serde(alias = "skip")]
    Continue,
    /// Fix what can be fixed and commit
    ProceedWithCommit,
    /// Never fix; any error rolls the batch back
    #[serde(alias = "cancel")]
    ProceedWithRollback,
    /// Keep failures for the user to decide on
    #[serde(alias = "pause")]
    WaitForUserInput,
}

impl FailureProcessingMode {
    /// Whether the resolver may apply the store's automatic fixes
    pub fn allows_auto_fix(self) -> bool {
        self <= FailureProcessingMode::ProceedWithCommit
    }

    /// Whether domain-validation errors during reconstruction are downgraded
    /// to diagnostics instead of aborting the batch
    pub fn continues_on_continuable_error(self) -> bool {
        self <= FailureProcessingMode::ProceedWithCommit
    }
}

/// How previous entities are carried across cycles
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingMode {
    /// Previous entities are neither reused nor swept
    Disabled,
    /// Always create a new entity and retire the previous one
    Supersede,
    /// Reuse the previous entity when it is still valid
    #[default]
    Reconstruct,
}

/// Which properties survive when an entity is recreated
///
/// An empty allow-list means every property is allowed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PropertyMask {
    pub allow: Vec<String>,
    pub exclude: Vec<String>,
}

impl PropertyMask {
    pub fn permits(&self, key: &str) -> bool {
        let allowed = self.allow.is_empty() || self.allow.iter().any(|k| k == key);
        allowed && !self.exclude.iter().any(|k| k == key)
    }

    /// Copy the permitted properties of `from` onto `to`, overwriting.
    /// Returns whether `to` changed.
    pub fn copy_onto(&self, from: &Entity, to: &mut Entity) -> bool {
        let mut changed = false;
        for (key, value) in &from.properties {
            if !self.permits(key) {
                continue;
            }
            if to.properties.get(key) != Some(value) {
                to.properties.insert(key.clone(), value.clone());
                changed = true;
            }
        }
        changed
    }
}

/// Outcome of a name collision
#[derive(Debug, Clone, PartialEq)]
pub struct NameConflictResolution {
    /// Entity the reconstruction should use, if any
    pub entity: Option<EntityId>,
    pub diagnostic: Option<Diagnostic>,
}

/// Decide what a reconstruction does when an entity it does not track
/// already owns the requested name.
///
/// # Errors
///
/// `Cancelled` in `ProceedWithRollback` mode; store errors from posting the
/// failure in `WaitForUserInput` mode.
pub fn resolve_name_conflict(
    mode: FailureProcessingMode,
    store: &mut dyn DocumentStore,
    existing: &Entity,
) -> Result<NameConflictResolution> {
    let name = existing.name.clone().unwrap_or_default();
    let in_use = format!("{} '{}' is already in use.", existing.kind, name);
    let document = store.document_id().clone();

    match mode {
        FailureProcessingMode::Continue => Ok(NameConflictResolution {
            entity: None,
            diagnostic: Some(
                Diagnostic::remark(in_use).with_entities(document, vec![existing.id]),
            ),
        }),
        FailureProcessingMode::ProceedWithCommit => Ok(NameConflictResolution {
            entity: Some(existing.id),
            diagnostic: Some(
                Diagnostic::warning(format!("{} Using existing.", in_use))
                    .with_entities(document, vec![existing.id]),
            ),
        }),
        FailureProcessingMode::ProceedWithRollback => {
            Err(DocweaveError::Cancelled { reason: in_use })
        }
        FailureProcessingMode::WaitForUserInput => {
            store.post_failure(
                FailureDraft::new(kinds::NAME_NOT_UNIQUE, Severity::Error)
                    .with_description(in_use)
                    .with_failing(vec![existing.id]),
            )?;
            Ok(NameConflictResolution {
                entity: None,
                diagnostic: None,
            })
        }
    }
}
