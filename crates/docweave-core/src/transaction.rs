//! Transaction manager
//!
//! Opens, commits, and rolls back one atomic unit of work against one
//! document, routing the store's pre-commit failures through the
//! [`FailureResolver`].
//!
//! ## Commit pipeline (in order):
//! 1. `on_before_commit` hook (the node finalizes, e.g. sweeps stale entities)
//! 2. Validate: ask the store for pending failures
//! 3. Resolve: apply the planned fixes, report, dismiss warnings
//! 4. Repeat 2-3 while a fix was applied, up to `max_resolution_passes`
//! 5. Persist, or roll back when an Error remains
//! 6. `on_committed` / `on_rolled_back` hook
//!
//! ## Atomicity Contract
//!
//! - **All-or-nothing**: a commit either persists every buffered mutation or
//!   none of them
//! - **Single use**: `commit` consumes the [`Transaction`]; a rolled-back
//!   transaction is refused by `commit`
//! - **Best-effort rollback**: `rollback` never fails on store errors and can
//!   be called again on the same transaction

use crate::diagnostics::Diagnostic;
use crate::errors::{DocweaveError, Result};
use crate::model::{DocumentId, FailureRecord, Severity};
use crate::resolver::{failure_diagnostic, FailureResolver, ResolutionDecision};
use crate::store::DocumentStore;
use crate::{log_op_end, log_op_error, log_op_start};
use docweave_core_types::TransactionId;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionStatus {
    Uninitialized,
    Started,
    Pending,
    Committed,
    RolledBack,
    Error,
}

impl TransactionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransactionStatus::Committed | TransactionStatus::RolledBack | TransactionStatus::Error
        )
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One unit of work against one document
#[derive(Debug)]
pub struct Transaction {
    id: TransactionId,
    name: String,
    document: DocumentId,
    status: TransactionStatus,
}

impl Transaction {
    pub fn id(&self) -> &TransactionId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn document(&self) -> &DocumentId {
        &self.document
    }

    pub fn status(&self) -> TransactionStatus {
        self.status
    }
}

/// Callbacks around a transaction's life.
///
/// `on_start`, `on_started`, `on_prepare` and `on_done` are driven by
/// [`TransactionChain`](crate::chain::TransactionChain); the manager drives
/// the rest.
pub trait TransactionHooks {
    /// Return false to refuse starting a transaction on `document`
    fn on_start(&mut self, _document: &DocumentId) -> bool {
        true
    }

    fn on_started(&mut self, _document: &DocumentId) {}

    /// Called once before the chain commits its documents
    fn on_prepare(&mut self, _documents: &[DocumentId]) {}

    /// Last chance to mutate the document inside the transaction
    ///
    /// # Errors
    ///
    /// Any error rolls the transaction back and is returned from `commit`.
    fn on_before_commit(
        &mut self,
        _store: &mut dyn DocumentStore,
        _transaction: &str,
    ) -> Result<()> {
        Ok(())
    }

    fn on_committed(&mut self, _document: &DocumentId, _transaction: &str) {}

    fn on_rolled_back(&mut self, _document: &DocumentId, _transaction: &str) {}

    fn on_done(&mut self, _status: TransactionStatus) {}
}

/// Hooks that do nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl TransactionHooks for NoHooks {}

/// Result of a commit attempt
#[derive(Debug, Clone, PartialEq)]
pub struct CommitReport {
    pub document: DocumentId,
    pub status: TransactionStatus,
    pub diagnostics: Vec<Diagnostic>,
    /// Failures left for the caller: warnings kept in `WaitForUserInput`
    /// mode, or the failures behind a rollback when those are kept
    pub unresolved: Vec<FailureRecord>,
    /// Validation passes run
    pub passes: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionOptions {
    pub max_resolution_passes: u32,
    pub keep_failures_after_rollback: bool,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            max_resolution_passes: 8,
            keep_failures_after_rollback: false,
        }
    }
}

enum Settled {
    Commit,
    Rollback,
}

#[derive(Debug, Clone, Default)]
pub struct TransactionManager {
    resolver: FailureResolver,
    options: TransactionOptions,
}

impl TransactionManager {
    pub fn new(resolver: FailureResolver, options: TransactionOptions) -> Self {
        Self { resolver, options }
    }

    pub fn resolver(&self) -> &FailureResolver {
        &self.resolver
    }

    pub fn options(&self) -> TransactionOptions {
        self.options
    }

    /// Begin a transaction named `name` on `store`.
    ///
    /// May block for as long as the store's own locking does.
    ///
    /// # Errors
    ///
    /// `TransactionRefused` if the store will not start one.
    pub fn open(&self, store: &mut dyn DocumentStore, name: &str) -> Result<Transaction> {
        let document = store.document_id().clone();
        log_op_start!("transaction_open", document_id = %document, tx_name = name);
        let start = std::time::Instant::now();

        store.start_transaction(name).map_err(|e| {
            log_op_error!(
                "transaction_open",
                e.clone(),
                duration_ms = start.elapsed().as_millis() as u64,
                document_id = %document
            );
            e
        })?;

        let transaction = Transaction {
            id: TransactionId::new(),
            name: name.to_string(),
            document,
            status: TransactionStatus::Started,
        };
        log_op_end!(
            "transaction_open",
            duration_ms = start.elapsed().as_millis() as u64,
            document_id = %transaction.document,
            transaction_id = %transaction.id
        );
        Ok(transaction)
    }

    /// Commit `transaction`, resolving store failures on the way.
    ///
    /// A rollback forced by unresolved failures is not an error: the report
    /// carries `RolledBack`. Errors are reserved for transaction-level
    /// failures, after which the store has been rolled back and the status
    /// is `Error`.
    ///
    /// `transaction` stays with the caller. When `store` is the wrong
    /// document it is left Started, so the caller can still roll it back
    /// against its own store.
    ///
    /// # Errors
    ///
    /// - `InvalidTransactionState` if `transaction` is not Started
    /// - `Internal` if `store` is not the transaction's document
    /// - `TransactionNotStarted` if the store has no open batch
    /// - anything raised by `on_before_commit` or by the store
    pub fn commit(
        &self,
        store: &mut dyn DocumentStore,
        transaction: &mut Transaction,
        hooks: &mut dyn TransactionHooks,
    ) -> Result<CommitReport> {
        log_op_start!(
            "transaction_commit",
            document_id = %transaction.document,
            transaction_id = %transaction.id
        );
        let start = std::time::Instant::now();

        let report = self.commit_impl(store, transaction, hooks).map_err(|e| {
            log_op_error!(
                "transaction_commit",
                e.clone(),
                duration_ms = start.elapsed().as_millis() as u64
            );
            e
        })?;

        log_op_end!(
            "transaction_commit",
            duration_ms = start.elapsed().as_millis() as u64,
            document_id = %report.document,
            status = %report.status,
            passes = report.passes
        );
        Ok(report)
    }

    fn commit_impl(
        &self,
        store: &mut dyn DocumentStore,
        transaction: &mut Transaction,
        hooks: &mut dyn TransactionHooks,
    ) -> Result<CommitReport> {
        check_document(store, transaction)?;
        if transaction.status != TransactionStatus::Started {
            return Err(DocweaveError::InvalidTransactionState {
                transaction: transaction.id.to_string(),
                status: transaction.status.to_string(),
            });
        }
        if !store.has_open_transaction() {
            transaction.status = TransactionStatus::Error;
            return Err(DocweaveError::TransactionNotStarted {
                document: transaction.document.to_string(),
            });
        }

        let mut report = CommitReport {
            document: transaction.document.clone(),
            status: transaction.status,
            diagnostics: Vec::new(),
            unresolved: Vec::new(),
            passes: 0,
        };

        let settled = match hooks.on_before_commit(store, &transaction.name) {
            Ok(()) => {
                transaction.status = TransactionStatus::Pending;
                self.settle(store, &mut report)
            }
            Err(e) => Err(e),
        };

        match settled {
            Ok(Settled::Commit) => {
                if let Err(e) = store.commit_transaction() {
                    discard(store, transaction, hooks, TransactionStatus::Error);
                    return Err(e);
                }
                transaction.status = TransactionStatus::Committed;
                hooks.on_committed(&transaction.document, &transaction.name);
            }
            Ok(Settled::Rollback) => {
                discard(store, transaction, hooks, TransactionStatus::RolledBack);
                if !self.options.keep_failures_after_rollback {
                    report.unresolved.clear();
                }
            }
            Err(e) => {
                discard(store, transaction, hooks, TransactionStatus::Error);
                return Err(e);
            }
        }

        report.status = transaction.status;
        Ok(report)
    }

    /// Validate and resolve until the store can commit or must roll back
    fn settle(&self, store: &mut dyn DocumentStore, report: &mut CommitReport) -> Result<Settled> {
        let document = store.document_id().clone();
        let max_passes = self.options.max_resolution_passes.max(1);

        for pass in 1..=max_passes {
            report.passes = pass;
            let failures = store.failures()?;
            let plan = self.resolver.resolve(&failures);

            for fix in &plan.fixes {
                let solved = store.resolve_failure(fix.id)?;
                tracing::debug!(
                    document_id = %document,
                    failure_kind = %fix.kind,
                    solved,
                    pass,
                    "failure resolution attempted"
                );
                report
                    .diagnostics
                    .extend(failure_diagnostic(&document, fix, Some(solved)));
            }
            report.diagnostics.extend(
                plan.report
                    .iter()
                    .filter_map(|f| failure_diagnostic(&document, f, None)),
            );
            if plan.dismiss_warnings {
                store.dismiss_warnings()?;
            }

            match plan.decision {
                ResolutionDecision::ProceedWithCommit => continue,
                ResolutionDecision::ProceedWithRollback => {
                    report.unresolved = without_simulated(failures);
                    return Ok(Settled::Rollback);
                }
                ResolutionDecision::Continue => {
                    // The store never persists a batch with a pending Error
                    if failures.iter().any(|f| f.severity >= Severity::Error) {
                        report.unresolved = without_simulated(failures);
                        return Ok(Settled::Rollback);
                    }
                    if !plan.dismiss_warnings {
                        report.unresolved = failures;
                    }
                    return Ok(Settled::Commit);
                }
            }
        }

        tracing::warn!(
            document_id = %document,
            max_passes,
            "failure resolution did not converge"
        );
        report.diagnostics.push(Diagnostic::error(format!(
            "Failures were still pending after {} resolution passes.",
            max_passes
        )));
        report.unresolved = without_simulated(store.failures()?);
        Ok(Settled::Rollback)
    }

    /// Discard `transaction`. Idempotent; store errors are logged, not
    /// returned.
    ///
    /// # Errors
    ///
    /// `InvalidTransactionState` if the transaction already committed.
    pub fn rollback(
        &self,
        store: &mut dyn DocumentStore,
        transaction: &mut Transaction,
        hooks: &mut dyn TransactionHooks,
    ) -> Result<TransactionStatus> {
        match transaction.status {
            TransactionStatus::RolledBack | TransactionStatus::Error => {
                return Ok(transaction.status)
            }
            TransactionStatus::Committed => {
                return Err(DocweaveError::InvalidTransactionState {
                    transaction: transaction.id.to_string(),
                    status: transaction.status.to_string(),
                })
            }
            TransactionStatus::Uninitialized
            | TransactionStatus::Started
            | TransactionStatus::Pending => {}
        }
        check_document(store, transaction)?;

        log_op_start!(
            "transaction_rollback",
            document_id = %transaction.document,
            transaction_id = %transaction.id
        );
        let start = std::time::Instant::now();
        discard(store, transaction, hooks, TransactionStatus::RolledBack);
        log_op_end!(
            "transaction_rollback",
            duration_ms = start.elapsed().as_millis() as u64
        );
        Ok(transaction.status)
    }
}

fn check_document(store: &dyn DocumentStore, transaction: &Transaction) -> Result<()> {
    if store.document_id() != &transaction.document {
        return Err(DocweaveError::Internal {
            message: format!(
                "transaction for document {} used against document {}",
                transaction.document,
                store.document_id()
            ),
        });
    }
    Ok(())
}

fn discard(
    store: &mut dyn DocumentStore,
    transaction: &mut Transaction,
    hooks: &mut dyn TransactionHooks,
    status: TransactionStatus,
) {
    if let Err(e) = store.rollback_transaction() {
        tracing::warn!(
            document_id = %transaction.document,
            error = %e,
            "store rollback failed"
        );
    }
    transaction.status = status;
    hooks.on_rolled_back(&transaction.document, &transaction.name);
}

fn without_simulated(failures: Vec<FailureRecord>) -> Vec<FailureRecord> {
    failures
        .into_iter()
        .filter(|f| !f.kind.is_simulated_transaction())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EntityDraft, FailureDraft, FailureKind};
    use crate::policy::FailureProcessingMode;
    use crate::store::MemoryDocument;

    #[derive(Default)]
    struct Recorder {
        committed: Vec<String>,
        rolled_back: Vec<String>,
        fail_before_commit: bool,
    }

    impl TransactionHooks for Recorder {
        fn on_before_commit(&mut self, _store: &mut dyn DocumentStore, _tx: &str) -> Result<()> {
            if self.fail_before_commit {
                return Err(DocweaveError::Internal {
                    message: "finalizer failed".to_string(),
                });
            }
            Ok(())
        }

        fn on_committed(&mut self, _document: &DocumentId, transaction: &str) {
            self.committed.push(transaction.to_string());
        }

        fn on_rolled_back(&mut self, _document: &DocumentId, transaction: &str) {
            self.rolled_back.push(transaction.to_string());
        }
    }

    fn manager(mode: FailureProcessingMode) -> TransactionManager {
        TransactionManager::new(
            FailureResolver::new(vec![FailureKind::new("fixable")], mode),
            TransactionOptions::default(),
        )
    }

    #[test]
    fn test_clean_commit() {
        let mut doc = MemoryDocument::new("doc");
        let m = manager(FailureProcessingMode::Continue);
        let mut tx = m.open(&mut doc, "Create").unwrap();
        assert_eq!(tx.status(), TransactionStatus::Started);
        doc.create_entity(EntityDraft::new("wall")).unwrap();

        let mut hooks = Recorder::default();
        let report = m.commit(&mut doc, &mut tx, &mut hooks).unwrap();
        assert_eq!(report.status, TransactionStatus::Committed);
        assert_eq!(report.passes, 1);
        assert_eq!(hooks.committed, vec!["Create".to_string()]);
        assert_eq!(doc.entity_count().unwrap(), 1);
    }

    #[test]
    fn test_refused_open_fails_fast() {
        let mut doc = MemoryDocument::new("doc");
        doc.lock_for_editing("locked");
        let err = manager(FailureProcessingMode::Continue)
            .open(&mut doc, "t")
            .unwrap_err();
        assert!(matches!(err, DocweaveError::TransactionRefused { .. }));
    }

    #[test]
    fn test_fix_then_commit() {
        let mut doc = MemoryDocument::new("doc");
        let m = manager(FailureProcessingMode::Continue);
        let mut tx = m.open(&mut doc, "t").unwrap();
        let mut draft = FailureDraft::new("fixable", Severity::Error);
        draft.resolvable = true;
        doc.post_failure(draft).unwrap();

        let report = m.commit(&mut doc, &mut tx, &mut NoHooks).unwrap();
        assert_eq!(report.status, TransactionStatus::Committed);
        assert_eq!(report.passes, 2);
        assert!(report.diagnostics[0].text.starts_with("✔ "));
    }

    #[test]
    fn test_unresolvable_error_rolls_back() {
        let mut doc = MemoryDocument::new("doc");
        let m = manager(FailureProcessingMode::Continue);
        let mut tx = m.open(&mut doc, "t").unwrap();
        doc.create_entity(EntityDraft::new("wall")).unwrap();
        doc.post_failure(FailureDraft::new("broken", Severity::Error))
            .unwrap();

        let mut hooks = Recorder::default();
        let report = m.commit(&mut doc, &mut tx, &mut hooks).unwrap();
        assert_eq!(report.status, TransactionStatus::RolledBack);
        assert_eq!(hooks.rolled_back.len(), 1);
        assert_eq!(doc.entity_count().unwrap(), 0);
        assert!(report.unresolved.is_empty());
    }

    #[test]
    fn test_keep_failures_after_rollback() {
        let mut doc = MemoryDocument::new("doc");
        let m = TransactionManager::new(
            FailureResolver::default(),
            TransactionOptions {
                keep_failures_after_rollback: true,
                ..TransactionOptions::default()
            },
        );
        let mut tx = m.open(&mut doc, "t").unwrap();
        doc.post_failure(FailureDraft::new("broken", Severity::Error))
            .unwrap();
        let report = m.commit(&mut doc, &mut tx, &mut NoHooks).unwrap();
        assert_eq!(report.status, TransactionStatus::RolledBack);
        assert_eq!(report.unresolved.len(), 1);
    }

    #[test]
    fn test_before_commit_error_rolls_back_and_propagates() {
        let mut doc = MemoryDocument::new("doc");
        let m = manager(FailureProcessingMode::Continue);
        let mut tx = m.open(&mut doc, "t").unwrap();
        doc.create_entity(EntityDraft::new("wall")).unwrap();

        let mut hooks = Recorder {
            fail_before_commit: true,
            ..Recorder::default()
        };
        let err = m.commit(&mut doc, &mut tx, &mut hooks).unwrap_err();
        assert!(matches!(err, DocweaveError::Internal { .. }));
        assert_eq!(doc.entity_count().unwrap(), 0);
        assert!(!doc.has_open_transaction());
        assert_eq!(hooks.rolled_back.len(), 1);
    }

    #[test]
    fn test_rollback_is_idempotent_and_blocks_commit() {
        let mut doc = MemoryDocument::new("doc");
        let m = manager(FailureProcessingMode::Continue);
        let mut tx = m.open(&mut doc, "t").unwrap();
        doc.create_entity(EntityDraft::new("wall")).unwrap();

        let mut hooks = Recorder::default();
        assert_eq!(
            m.rollback(&mut doc, &mut tx, &mut hooks).unwrap(),
            TransactionStatus::RolledBack
        );
        assert_eq!(
            m.rollback(&mut doc, &mut tx, &mut hooks).unwrap(),
            TransactionStatus::RolledBack
        );
        assert_eq!(hooks.rolled_back.len(), 1);
        assert_eq!(doc.entity_count().unwrap(), 0);

        let err = m.commit(&mut doc, &mut tx, &mut hooks).unwrap_err();
        assert!(matches!(err, DocweaveError::InvalidTransactionState { .. }));
    }

    #[test]
    fn test_wait_mode_keeps_warnings() {
        let mut doc = MemoryDocument::new("doc");
        let m = manager(FailureProcessingMode::WaitForUserInput);
        let mut tx = m.open(&mut doc, "t").unwrap();
        doc.post_failure(FailureDraft::new("w", Severity::Warning))
            .unwrap();

        let report = m.commit(&mut doc, &mut tx, &mut NoHooks).unwrap();
        assert_eq!(report.status, TransactionStatus::Committed);
        assert_eq!(report.unresolved.len(), 1);
        assert_eq!(doc.warnings().unwrap().len(), 1);
    }

    #[test]
    fn test_wait_mode_refuses_errors() {
        let mut doc = MemoryDocument::new("doc");
        let m = manager(FailureProcessingMode::WaitForUserInput);
        let mut tx = m.open(&mut doc, "t").unwrap();
        let mut draft = FailureDraft::new("fixable", Severity::Error);
        draft.resolvable = true;
        doc.post_failure(draft).unwrap();

        let report = m.commit(&mut doc, &mut tx, &mut NoHooks).unwrap();
        assert_eq!(report.status, TransactionStatus::RolledBack);
        assert_eq!(report.passes, 1);
    }

    #[test]
    fn test_wrong_document_is_rejected() {
        let mut a = MemoryDocument::new("a");
        let mut b = MemoryDocument::new("b");
        let m = manager(FailureProcessingMode::Continue);
        let mut tx = m.open(&mut a, "t").unwrap();
        b.start_transaction("t").unwrap();
        assert!(matches!(
            m.commit(&mut b, &mut tx, &mut NoHooks),
            Err(DocweaveError::Internal { .. })
        ));
        assert_eq!(tx.status(), TransactionStatus::Started);
    }

    #[test]
    fn test_wrong_document_commit_leaves_transaction_recoverable() {
        let mut a = MemoryDocument::new("a");
        let mut b = MemoryDocument::new("b");
        let m = manager(FailureProcessingMode::Continue);
        let mut tx = m.open(&mut a, "t").unwrap();
        a.create_entity(EntityDraft::new("wall")).unwrap();

        let err = m.commit(&mut b, &mut tx, &mut NoHooks).unwrap_err();
        assert!(matches!(err, DocweaveError::Internal { .. }));
        assert!(a.has_open_transaction());

        let mut hooks = Recorder::default();
        assert_eq!(
            m.rollback(&mut a, &mut tx, &mut hooks).unwrap(),
            TransactionStatus::RolledBack
        );
        assert!(!a.has_open_transaction());
        assert_eq!(a.entity_count().unwrap(), 0);
        assert_eq!(hooks.rolled_back, vec!["t".to_string()]);
        assert!(m.open(&mut a, "again").is_ok());
    }

    #[test]
    fn test_commit_without_open_batch_marks_error() {
        let mut doc = MemoryDocument::new("doc");
        let m = manager(FailureProcessingMode::Continue);
        let mut tx = m.open(&mut doc, "t").unwrap();
        doc.rollback_transaction().unwrap();

        let err = m.commit(&mut doc, &mut tx, &mut NoHooks).unwrap_err();
        assert!(matches!(err, DocweaveError::TransactionNotStarted { .. }));
        assert_eq!(tx.status(), TransactionStatus::Error);
        assert!(!doc.has_open_transaction());
    }
}
