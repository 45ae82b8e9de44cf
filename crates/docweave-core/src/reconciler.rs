//! Entity reconciler
//!
//! Maps each output slot of a node onto at most one live entity across
//! evaluation cycles. The entities of the last successful cycle are kept in
//! a [`PreviousStructure`] indexed by slot. During a cycle each slot looks up
//! its previous entity (the candidate), lets the node reuse or replace it,
//! and records the result in the next structure. Slots the cycle never
//! visits are stale and get deleted right before commit.
//!
//! Per slot:
//!
//! ```text
//! NoEntity -> Candidate -> Reused | Replaced | ConfirmedAbsent
//!                       -> Ignored  (candidate was unpinned by the user)
//!                       -> Failed   (reconstruction raised an error)
//! ```

use crate::diagnostics::{Diagnostic, DiagnosticLevel};
use crate::errors::{DocweaveError, ExErrorKind, Result};
use crate::model::{DocumentId, Entity, EntityId, EntityRef};
use crate::policy::{resolve_name_conflict, FailureProcessingMode, PropertyMask, TrackingMode};
use crate::store::DocumentStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Entity references produced by the last successful cycle, one per slot
///
/// Never edited in place: a cycle builds the next structure and the owner
/// swaps it in once the commit went through.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviousStructure {
    slots: Vec<Option<EntityRef>>,
    /// Entities a rolled-back document kept alive after their slot moved
    /// to another document; the next cycle sweeps them.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pending: Vec<EntityRef>,
}

impl PreviousStructure {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_slots(mut slots: Vec<Option<EntityRef>>) -> Self {
        while matches!(slots.last(), Some(None)) {
            slots.pop();
        }
        Self {
            slots,
            pending: Vec::new(),
        }
    }

    fn with_pending(mut self, pending: Vec<EntityRef>) -> Self {
        self.pending = pending;
        self
    }

    pub fn slots(&self) -> &[Option<EntityRef>] {
        &self.slots
    }

    pub fn get(&self, slot: usize) -> Option<&EntityRef> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none) && self.pending.is_empty()
    }

    /// The entities currently held by a slot
    pub fn entities(&self) -> impl Iterator<Item = &EntityRef> {
        self.slots.iter().flatten()
    }

    pub fn pending(&self) -> &[EntityRef] {
        &self.pending
    }

    /// Every entity the owner is responsible for: slot entities plus those
    /// waiting for a sweep.
    pub fn tracked(&self) -> impl Iterator<Item = &EntityRef> {
        self.entities().chain(&self.pending)
    }

    pub fn documents(&self) -> BTreeSet<DocumentId> {
        self.tracked().map(|r| r.document.clone()).collect()
    }

    /// The same structure with every entity of `document` dropped
    pub fn without_document(&self, document: &DocumentId) -> Self {
        let slots = self
            .slots
            .iter()
            .map(|slot| slot.clone().filter(|r| &r.document != document))
            .collect();
        let pending = self
            .pending
            .iter()
            .filter(|r| &r.document != document)
            .cloned()
            .collect();
        Self::from_slots(slots).with_pending(pending)
    }
}

/// What a node sees while reconstructing one slot
pub struct SlotContext<'a> {
    store: &'a mut dyn DocumentStore,
    candidate: Option<Entity>,
    mode: FailureProcessingMode,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> SlotContext<'a> {
    pub fn store(&mut self) -> &mut dyn DocumentStore {
        &mut *self.store
    }

    pub fn document(&self) -> &DocumentId {
        self.store.document_id()
    }

    /// The previous entity of this slot, still valid for reuse
    pub fn candidate(&self) -> Option<&Entity> {
        self.candidate.as_ref()
    }

    pub fn failure_mode(&self) -> FailureProcessingMode {
        self.mode
    }

    pub fn report(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    /// Apply the failure mode to a name already taken by `existing`.
    /// Returns the entity to use, if any.
    ///
    /// # Errors
    ///
    /// `Cancelled` in `ProceedWithRollback` mode.
    pub fn resolve_name_conflict(&mut self, existing: &Entity) -> Result<Option<EntityId>> {
        let resolution = resolve_name_conflict(self.mode, &mut *self.store, existing)?;
        self.diagnostics.extend(resolution.diagnostic);
        Ok(resolution.entity)
    }
}

/// A node's reconstruction logic
pub trait Reconstruct {
    type Input;

    /// Produce this slot's entity.
    ///
    /// Return the candidate's id to reuse it (after updating it in place),
    /// the id of a freshly created entity to replace it, or `None` when the
    /// slot produces nothing this cycle.
    fn reconstruct(
        &mut self,
        ctx: &mut SlotContext<'_>,
        input: &Self::Input,
    ) -> Result<Option<EntityId>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SlotState {
    /// Nothing before, nothing now
    NoEntity,
    /// New entity, no candidate existed
    Created,
    Reused,
    Replaced,
    /// A candidate existed but the slot produced nothing; it was deleted
    ConfirmedAbsent,
    /// The candidate was unpinned by the user and left untouched
    Ignored,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SlotOutcome {
    pub slot: usize,
    pub state: SlotState,
    pub entity: Option<EntityRef>,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileOptions {
    pub tracking: TrackingMode,
    pub failure_mode: FailureProcessingMode,
    pub property_mask: PropertyMask,
    /// Error kinds that abort the whole batch instead of failing one slot
    pub abort_on: Vec<ExErrorKind>,
}

/// How a reconstruction error surfaces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDisposition {
    /// Output cleared, nothing reported
    Silent,
    /// Output cleared, reported at this level
    Report(DiagnosticLevel),
    /// Abort the batch
    Abort,
}

/// Decide how a reconstruction error surfaces.
pub fn classify_error(err: &DocweaveError, options: &ReconcileOptions) -> ErrorDisposition {
    if options.abort_on.contains(&err.kind()) {
        return ErrorDisposition::Abort;
    }
    let continues = options.failure_mode.continues_on_continuable_error();
    match err {
        DocweaveError::MissingInput { .. } => ErrorDisposition::Silent,
        DocweaveError::InvalidInput { .. } | DocweaveError::NameInUse { .. } => {
            if continues {
                ErrorDisposition::Report(DiagnosticLevel::Warning)
            } else {
                ErrorDisposition::Abort
            }
        }
        DocweaveError::Warning { .. } => ErrorDisposition::Report(DiagnosticLevel::Warning),
        DocweaveError::Cancelled { .. }
        | DocweaveError::DocumentNotFound { .. }
        | DocweaveError::EntityNotFound { .. }
        | DocweaveError::TransactionRefused { .. }
        | DocweaveError::TransactionNotStarted { .. }
        | DocweaveError::InvalidTransactionState { .. }
        | DocweaveError::NoSubTransaction { .. }
        | DocweaveError::Persistence { .. }
        | DocweaveError::Serialization { .. } => ErrorDisposition::Report(DiagnosticLevel::Error),
        DocweaveError::InvalidConfig { .. } | DocweaveError::Internal { .. } => {
            ErrorDisposition::Abort
        }
    }
}

struct SlotStep {
    state: SlotState,
    entity: Option<EntityId>,
    diagnostics: Vec<Diagnostic>,
}

/// Reconciliation state of one evaluation cycle
#[derive(Debug, Clone)]
pub struct ReconcileCycle {
    previous: Vec<Option<EntityRef>>,
    claimed: Vec<bool>,
    /// Pending entities carried over from earlier cycles, always stale
    carried: Vec<EntityRef>,
    next: Vec<Option<EntityRef>>,
    options: ReconcileOptions,
    ignored: Vec<EntityRef>,
    swept: BTreeSet<DocumentId>,
}

impl ReconcileCycle {
    pub fn begin(previous: &PreviousStructure, options: ReconcileOptions) -> Self {
        let (carried, previous) = match options.tracking {
            TrackingMode::Disabled => (Vec::new(), Vec::new()),
            TrackingMode::Supersede | TrackingMode::Reconstruct => {
                (previous.pending.clone(), previous.slots.clone())
            }
        };
        Self {
            claimed: vec![false; previous.len()],
            previous,
            carried,
            next: Vec::new(),
            options,
            ignored: Vec::new(),
            swept: BTreeSet::new(),
        }
    }

    pub fn options(&self) -> &ReconcileOptions {
        &self.options
    }

    /// Reconcile one slot against `store`.
    ///
    /// The slot runs inside a sub-transaction: on failure its partial
    /// mutations are undone, its previous entity is deleted, and its output
    /// is cleared. Sibling slots are unaffected.
    ///
    /// # Errors
    ///
    /// Errors classified as [`ErrorDisposition::Abort`], and store errors
    /// from opening or closing the sub-transaction.
    pub fn reconcile_slot<R: Reconstruct + ?Sized>(
        &mut self,
        slot: usize,
        store: &mut dyn DocumentStore,
        node: &mut R,
        input: &R::Input,
    ) -> Result<SlotOutcome> {
        let document = store.document_id().clone();
        if self.next.len() <= slot {
            self.next.resize(slot + 1, None);
        }

        // A previous entity in another document stays unclaimed and is swept
        // there.
        let previous = self
            .previous
            .get(slot)
            .cloned()
            .flatten()
            .filter(|r| r.document == document);
        if previous.is_some() {
            self.claimed[slot] = true;
        }

        store.begin_sub_transaction()?;
        match self.run_slot(store, previous.as_ref().map(|r| r.id), node, input) {
            Ok(step) => {
                store.commit_sub_transaction()?;
                let entity = step.entity.map(|id| EntityRef::new(document.clone(), id));
                if step.state == SlotState::Ignored {
                    if let Some(r) = &entity {
                        self.ignored.push(r.clone());
                    }
                }
                tracing::debug!(
                    document_id = %document,
                    slot,
                    state = ?step.state,
                    entity_id = ?step.entity,
                    "slot reconciled"
                );
                self.next[slot] = entity.clone();
                Ok(SlotOutcome {
                    slot,
                    state: step.state,
                    entity,
                    diagnostics: step.diagnostics,
                })
            }
            Err(err) => {
                if let Err(e) = store.rollback_sub_transaction() {
                    tracing::warn!(
                        document_id = %document,
                        slot,
                        error = %e,
                        "sub-transaction rollback failed"
                    );
                }
                let disposition = classify_error(&err, &self.options);
                tracing::debug!(
                    document_id = %document,
                    slot,
                    err_kind = ?err.kind(),
                    disposition = ?disposition,
                    "slot reconstruction failed"
                );
                let level = match disposition {
                    ErrorDisposition::Abort => return Err(err),
                    ErrorDisposition::Silent => None,
                    ErrorDisposition::Report(level) => Some(level),
                };

                let mut failing = Vec::new();
                if let Some(prev) = &previous {
                    if delete_if_owned(store, prev.id) {
                        failing.push(prev.id);
                    }
                }
                self.next[slot] = None;

                let diagnostics = level
                    .map(|level| {
                        let d = Diagnostic::new(level, err.to_string());
                        if failing.is_empty() {
                            d
                        } else {
                            d.with_entities(document.clone(), failing)
                        }
                    })
                    .into_iter()
                    .collect();
                Ok(SlotOutcome {
                    slot,
                    state: SlotState::Failed,
                    entity: None,
                    diagnostics,
                })
            }
        }
    }

    fn run_slot<R: Reconstruct + ?Sized>(
        &self,
        store: &mut dyn DocumentStore,
        previous: Option<EntityId>,
        node: &mut R,
        input: &R::Input,
    ) -> Result<SlotStep> {
        let mut old: Option<Entity> = None;
        if let Some(id) = previous {
            match store.entity(id)? {
                // deleted outside the loop
                None => {}
                Some(entity) if !entity.pinned => {
                    return Ok(SlotStep {
                        state: SlotState::Ignored,
                        entity: Some(entity.id),
                        diagnostics: Vec::new(),
                    });
                }
                Some(entity) if entity.scope != store.active_scope() => {
                    store.delete_entity(entity.id)?;
                }
                Some(entity) => old = Some(entity),
            }
        }

        let candidate = match self.options.tracking {
            TrackingMode::Reconstruct => old.clone(),
            TrackingMode::Supersede | TrackingMode::Disabled => None,
        };
        let mut ctx = SlotContext {
            store: &mut *store,
            candidate,
            mode: self.options.failure_mode,
            diagnostics: Vec::new(),
        };
        let produced = node.reconstruct(&mut ctx, input)?;
        let diagnostics = ctx.diagnostics;

        let state = match (produced, &old) {
            (Some(id), Some(old)) if id == old.id => SlotState::Reused,
            (Some(id), Some(old)) => {
                let mut replacement =
                    store.entity(id)?.ok_or_else(|| DocweaveError::EntityNotFound {
                        document: store.document_id().to_string(),
                        entity: id.0,
                    })?;
                if self.options.property_mask.copy_onto(old, &mut replacement) {
                    store.update_entity(&replacement)?;
                }
                store.delete_entity(old.id)?;
                SlotState::Replaced
            }
            (Some(_), None) => SlotState::Created,
            (None, Some(old)) => {
                store.delete_entity(old.id)?;
                SlotState::ConfirmedAbsent
            }
            (None, None) => SlotState::NoEntity,
        };

        if let Some(id) = produced {
            if let Err(e) = store.set_pinned(id, true) {
                tracing::warn!(entity_id = %id, error = %e, "pinning failed");
            }
        }

        Ok(SlotStep {
            state,
            entity: produced,
            diagnostics,
        })
    }

    /// Previous entities no slot claimed this cycle, plus carried ones
    pub fn stale(&self) -> Vec<EntityRef> {
        self.previous
            .iter()
            .zip(&self.claimed)
            .filter(|(_, claimed)| !**claimed)
            .filter_map(|(r, _)| r.clone())
            .chain(self.carried.iter().cloned())
            .collect()
    }

    /// Documents holding stale entities; each needs a transaction so the
    /// sweep can run there.
    pub fn stale_documents(&self) -> BTreeSet<DocumentId> {
        self.stale().into_iter().map(|r| r.document).collect()
    }

    /// Delete this document's stale entities. Runs once per document; meant
    /// to be called from `on_before_commit`. Entities the user unpinned are
    /// left alone.
    ///
    /// # Errors
    ///
    /// Store errors while deleting.
    pub fn sweep_stale(&mut self, store: &mut dyn DocumentStore) -> Result<usize> {
        let document = store.document_id().clone();
        if !self.swept.insert(document.clone()) {
            return Ok(0);
        }

        let mut deleted = 0;
        for stale in self.stale().into_iter().filter(|r| r.document == document) {
            match store.entity(stale.id)? {
                Some(entity) if entity.pinned => {
                    if store.delete_entity(entity.id)? {
                        deleted += 1;
                    }
                }
                Some(_) | None => {}
            }
        }
        if deleted > 0 {
            tracing::debug!(document_id = %document, deleted, "stale entities swept");
        }
        Ok(deleted)
    }

    /// One Remark per document listing the unpinned entities that were left
    /// untouched.
    pub fn ignored_remarks(&self) -> Vec<Diagnostic> {
        let documents: BTreeSet<&DocumentId> =
            self.ignored.iter().map(|r| &r.document).collect();
        documents
            .into_iter()
            .map(|document| {
                let ids = self
                    .ignored
                    .iter()
                    .filter(|r| &r.document == document)
                    .map(|r| r.id)
                    .collect();
                Diagnostic::remark("Some entities were ignored because they are unpinned.")
                    .with_entities(document.clone(), ids)
            })
            .collect()
    }

    /// Build the structure for the next cycle.
    ///
    /// Slots in `committed` documents take this cycle's result; slots whose
    /// document rolled back keep their previous entity, which the rollback
    /// restored. When such a slot took a committed entity elsewhere, the
    /// restored one becomes pending so the next cycle sweeps it.
    pub fn finish(self, committed: &BTreeSet<DocumentId>) -> PreviousStructure {
        let ReconcileCycle {
            previous,
            carried,
            next,
            options,
            ..
        } = self;
        if options.tracking == TrackingMode::Disabled {
            return PreviousStructure::default();
        }

        let mut pending: Vec<EntityRef> = carried
            .into_iter()
            .filter(|r| !committed.contains(&r.document))
            .collect();
        let len = next.len().max(previous.len());
        let slots = (0..len)
            .map(|i| {
                let restored = previous
                    .get(i)
                    .cloned()
                    .flatten()
                    .filter(|p| !committed.contains(&p.document));
                match next.get(i).cloned().flatten() {
                    Some(r) if committed.contains(&r.document) => {
                        pending.extend(restored);
                        Some(r)
                    }
                    _ => restored,
                }
            })
            .collect();
        PreviousStructure::from_slots(slots).with_pending(pending)
    }
}

/// Delete `id` when it still exists and is pinned. Returns whether it was
/// deleted; errors are logged.
fn delete_if_owned(store: &mut dyn DocumentStore, id: EntityId) -> bool {
    match store.entity(id) {
        Ok(Some(entity)) if entity.pinned => match store.delete_entity(id) {
            Ok(deleted) => deleted,
            Err(e) => {
                tracing::warn!(entity_id = %id, error = %e, "could not delete previous entity");
                false
            }
        },
        Ok(_) => false,
        Err(e) => {
            tracing::warn!(entity_id = %id, error = %e, "could not read previous entity");
            false
        }
    }
}

/// Unpin every entity of `store`'s document tracked by `structure` so they
/// survive future cycles, and return the structure without them.
///
/// Needs an open transaction on `store`.
///
/// # Errors
///
/// Store errors while unpinning.
pub fn release_document(
    structure: &PreviousStructure,
    store: &mut dyn DocumentStore,
) -> Result<(PreviousStructure, usize)> {
    let document = store.document_id().clone();
    let mut released = 0;
    for r in structure.tracked().filter(|r| r.document == document) {
        if store.entity(r.id)?.is_some() {
            store.set_pinned(r.id, false)?;
            released += 1;
        }
    }
    Ok((structure.without_document(&document), released))
}
