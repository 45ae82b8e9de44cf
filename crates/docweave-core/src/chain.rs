//! Per-document transaction chain
//!
//! One evaluation may touch several documents. The chain keeps one
//! transaction per document, keyed by document identity in start order, and
//! commits them one by one: a rollback in one document never undoes the
//! commit of another.

use crate::diagnostics::Diagnostic;
use crate::errors::{DocweaveError, Result};
use crate::model::DocumentId;
use crate::store::{DocumentSet, DocumentStore};
use crate::transaction::{
    CommitReport, Transaction, TransactionHooks, TransactionManager, TransactionStatus,
};

/// Outcome of committing every link of a chain
#[derive(Debug, Clone, PartialEq)]
pub struct ChainReport {
    pub status: TransactionStatus,
    /// One report per document, in start order
    pub documents: Vec<CommitReport>,
}

impl ChainReport {
    pub fn committed(&self) -> impl Iterator<Item = &DocumentId> {
        self.documents
            .iter()
            .filter(|r| r.status == TransactionStatus::Committed)
            .map(|r| &r.document)
    }

    pub fn diagnostics(&self) -> impl Iterator<Item = &Diagnostic> {
        self.documents.iter().flat_map(|r| r.diagnostics.iter())
    }
}

pub struct TransactionChain {
    name: String,
    manager: TransactionManager,
    links: Vec<Transaction>,
}

impl TransactionChain {
    pub fn new(name: impl Into<String>, manager: TransactionManager) -> Self {
        Self {
            name: name.into(),
            manager,
            links: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn has_started(&self, document: &DocumentId) -> bool {
        self.links.iter().any(|t| t.document() == document)
    }

    pub fn documents(&self) -> Vec<DocumentId> {
        self.links.iter().map(|t| t.document().clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Start a transaction on `store` unless one is already part of the
    /// chain. Returns whether a new one was started.
    ///
    /// # Errors
    ///
    /// `TransactionRefused` when `on_start` refuses or the store does.
    pub fn start(
        &mut self,
        store: &mut dyn DocumentStore,
        hooks: &mut dyn TransactionHooks,
    ) -> Result<bool> {
        let document = store.document_id().clone();
        if self.has_started(&document) {
            return Ok(false);
        }
        if !hooks.on_start(&document) {
            return Err(DocweaveError::TransactionRefused {
                document: document.to_string(),
                reason: format!("'{}' was refused by its owner", self.name),
            });
        }

        let transaction = self.manager.open(store, &self.name)?;
        self.links.push(transaction);
        hooks.on_started(&document);
        Ok(true)
    }

    /// Commit every link in start order.
    ///
    /// A document whose commit fails with an error gets an `Error` report
    /// with the error as diagnostic; the remaining documents still commit.
    pub fn commit(
        self,
        documents: &mut DocumentSet,
        hooks: &mut dyn TransactionHooks,
    ) -> ChainReport {
        let TransactionChain { manager, links, .. } = self;
        let started: Vec<DocumentId> = links.iter().map(|t| t.document().clone()).collect();
        hooks.on_prepare(&started);

        let mut reports = Vec::with_capacity(links.len());
        for mut transaction in links {
            let document = transaction.document().clone();
            let result = match documents.get_mut(&document) {
                Some(store) => manager.commit(store.as_mut(), &mut transaction, hooks),
                None => Err(DocweaveError::DocumentNotFound {
                    document: document.to_string(),
                }),
            };
            reports.push(match result {
                Ok(report) => report,
                Err(e) => CommitReport {
                    document,
                    status: TransactionStatus::Error,
                    diagnostics: vec![Diagnostic::error(e.to_string())],
                    unresolved: Vec::new(),
                    passes: 0,
                },
            });
        }

        let status = overall_status(&reports);
        hooks.on_done(status);
        ChainReport {
            status,
            documents: reports,
        }
    }

    /// Roll back every link. Returns the overall status.
    pub fn rollback(
        self,
        documents: &mut DocumentSet,
        hooks: &mut dyn TransactionHooks,
    ) -> TransactionStatus {
        let TransactionChain { manager, links, .. } = self;
        let mut statuses = Vec::with_capacity(links.len());
        for mut transaction in links {
            let status = match documents.get_mut(transaction.document()) {
                Some(store) => manager
                    .rollback(store.as_mut(), &mut transaction, hooks)
                    .unwrap_or(TransactionStatus::Error),
                None => TransactionStatus::Error,
            };
            statuses.push(status);
        }
        let status = if statuses.is_empty() {
            TransactionStatus::Uninitialized
        } else if statuses.iter().all(|s| *s == TransactionStatus::RolledBack) {
            TransactionStatus::RolledBack
        } else {
            TransactionStatus::Error
        };
        hooks.on_done(status);
        status
    }
}

fn overall_status(reports: &[CommitReport]) -> TransactionStatus {
    if reports.is_empty() {
        TransactionStatus::Uninitialized
    } else if reports.iter().any(|r| r.status == TransactionStatus::Error) {
        TransactionStatus::Error
    } else if reports.iter().all(|r| r.status == TransactionStatus::Committed) {
        TransactionStatus::Committed
    } else {
        TransactionStatus::RolledBack
    }
}
