//! The host document store seen from the reconcile loop
//!
//! A store owns validation and decides whether a commit is accepted; the
//! loop only proposes resolutions. All mutations happen inside an open
//! transaction, and sub-transactions nest inside it.

pub mod ledger;
pub mod memory;
pub mod rules;

pub use ledger::{FailureLedger, FailureSource};
pub use memory::MemoryDocument;
pub use rules::{UniqueNameRule, ValidationRule};

use crate::errors::Result;
use crate::model::{
    DocumentId, Entity, EntityDraft, EntityId, FailureDraft, FailureId, FailureRecord, ScopeId,
};
use std::collections::BTreeMap;

pub trait DocumentStore {
    fn document_id(&self) -> &DocumentId;

    /// Begin a transaction named `name`.
    ///
    /// # Errors
    ///
    /// `TransactionRefused` when the document is locked for editing elsewhere
    /// or already has a transaction open.
    fn start_transaction(&mut self, name: &str) -> Result<()>;

    fn has_open_transaction(&self) -> bool;

    /// Open a savepoint inside the current transaction.
    fn begin_sub_transaction(&mut self) -> Result<()>;

    /// Keep the changes made since the innermost savepoint.
    fn commit_sub_transaction(&mut self) -> Result<()>;

    /// Undo the changes made since the innermost savepoint.
    fn rollback_sub_transaction(&mut self) -> Result<()>;

    /// Run pre-commit validation and return the pending failures, in the
    /// order they were raised.
    ///
    /// A failure the store was already asked to resolve during this
    /// transaction comes back with `resolution_attempted` set.
    fn failures(&mut self) -> Result<Vec<FailureRecord>>;

    /// Apply the store's own fix for one failure. Returns whether the fix
    /// was applied.
    fn resolve_failure(&mut self, id: FailureId) -> Result<bool>;

    /// Drop Warning-level failures from the pending list for the rest of the
    /// transaction.
    fn dismiss_warnings(&mut self) -> Result<()>;

    /// Raise a failure from outside the store's own validation.
    fn post_failure(&mut self, failure: FailureDraft) -> Result<FailureId>;

    /// Persist the transaction. Warning-level failures still pending are
    /// kept as document warnings.
    fn commit_transaction(&mut self) -> Result<()>;

    /// Discard the transaction. Succeeds when none is open.
    fn rollback_transaction(&mut self) -> Result<()>;

    fn entity(&self, id: EntityId) -> Result<Option<Entity>>;

    fn create_entity(&mut self, draft: EntityDraft) -> Result<EntityId>;

    /// Write name and properties of `entity`. Returns false and performs no
    /// write when nothing changed.
    fn update_entity(&mut self, entity: &Entity) -> Result<bool>;

    /// Returns false when the entity did not exist.
    fn delete_entity(&mut self, id: EntityId) -> Result<bool>;

    fn set_pinned(&mut self, id: EntityId, pinned: bool) -> Result<()>;

    /// Scope new entities are placed in
    fn active_scope(&self) -> Option<ScopeId>;

    fn entity_count(&self) -> Result<usize>;

    fn find_by_name(&self, kind: &str, name: &str) -> Result<Option<Entity>>;

    /// Warnings that survived earlier commits
    fn warnings(&self) -> Result<Vec<FailureRecord>>;
}

/// The documents touched by one evaluation, keyed by identity
pub type DocumentSet = BTreeMap<DocumentId, Box<dyn DocumentStore>>;

/// Insert a store keyed by its own document id
pub fn insert_document(set: &mut DocumentSet, store: Box<dyn DocumentStore>) {
    set.insert(store.document_id().clone(), store);
}
