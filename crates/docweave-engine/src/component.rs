//! Per-node reconcile component
//!
//! One evaluation of a node:
//!
//! 1. Gate on the upstream signals. Frozen skips the node and defers its
//!    downstream to a later pass.
//! 2. Reconcile every iteration against its document, starting one
//!    transaction per touched document.
//! 3. Start transactions on documents that only hold stale entities.
//! 4. Post the simulated-transaction failure when running as a dry run.
//! 5. Commit the chain; the stale sweep runs in `on_before_commit`.
//! 6. Swap in the next Previous-Structure for the documents that committed.

use docweave_core::chain::{ChainReport, TransactionChain};
use docweave_core::errors::{DocweaveError, Result};
use docweave_core::model::FailureDraft;
use docweave_core::reconciler::{release_document, ReconcileCycle, ReconcileOptions};
use docweave_core::signal::{gate, GateDecision};
use docweave_core::transaction::{NoHooks, TransactionHooks};
use docweave_core::{
    log_op_end, log_op_error, log_op_start, ComponentConfig, Diagnostic, DocumentId, DocumentSet,
    DocumentStore, PreviousStructure, Reconstruct, Signal, SlotOutcome, TransactionManager,
    TransactionStatus,
};
use docweave_core_types::CycleContext;
use std::collections::BTreeSet;
use std::time::Instant;

use crate::runtime::{GraphRuntime, NodeId};

/// One unit of work for a node: the document it targets and its input
#[derive(Debug, Clone, PartialEq)]
pub struct Iteration<I> {
    pub document: DocumentId,
    pub input: I,
}

impl<I> Iteration<I> {
    pub fn new(document: impl Into<String>, input: I) -> Self {
        Self {
            document: DocumentId::new(document),
            input,
        }
    }
}

/// What one evaluation did
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationReport {
    pub signal: Signal,
    /// `Uninitialized` when the node was frozen or had nothing to do
    pub status: TransactionStatus,
    pub outcomes: Vec<SlotOutcome>,
    pub chain: Option<ChainReport>,
}

impl EvaluationReport {
    fn skipped(signal: Signal) -> Self {
        Self {
            signal,
            status: TransactionStatus::Uninitialized,
            outcomes: Vec::new(),
            chain: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReleaseReport {
    pub released: usize,
    pub status: TransactionStatus,
}

/// Sweeps stale entities before each document commits
struct CycleHooks<'a> {
    cycle: &'a mut ReconcileCycle,
}

impl TransactionHooks for CycleHooks<'_> {
    fn on_before_commit(
        &mut self,
        store: &mut dyn DocumentStore,
        _transaction: &str,
    ) -> Result<()> {
        self.cycle.sweep_stale(store).map(|_| ())
    }
}

pub struct ReconcileComponent<R: Reconstruct> {
    name: String,
    node: R,
    manager: TransactionManager,
    options: ReconcileOptions,
    previous: PreviousStructure,
    inputs: Vec<Iteration<R::Input>>,
    signal: Option<Signal>,
}

impl<R: Reconstruct> ReconcileComponent<R> {
    /// # Errors
    ///
    /// `InvalidConfig` when `config` does not validate.
    pub fn new(name: impl Into<String>, node: R, config: &ComponentConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            name: name.into(),
            node,
            manager: config.transaction_manager(),
            options: config.reconcile_options(),
            previous: PreviousStructure::new(),
            inputs: Vec::new(),
            signal: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn previous(&self) -> &PreviousStructure {
        &self.previous
    }

    /// Replace the Previous-Structure, e.g. with one loaded by the host
    pub fn restore_previous(&mut self, structure: PreviousStructure) {
        self.previous = structure;
    }

    /// Iterations the next evaluation runs
    pub fn set_inputs(&mut self, inputs: Vec<Iteration<R::Input>>) {
        self.inputs = inputs;
    }

    /// Signal resolved by the last gate
    pub fn signal(&self) -> Option<Signal> {
        self.signal
    }

    pub fn node(&self) -> &R {
        &self.node
    }

    /// The graph was invalidated; forget the signal of the last pass
    pub fn on_solution_expired(&mut self) {
        self.signal = None;
    }

    /// Resolve the gate for this pass and label the node with it
    pub fn on_collect_data(&mut self, id: NodeId, runtime: &mut dyn GraphRuntime) -> GateDecision {
        let decision = gate(runtime.upstream_signals(id));
        let signal = match decision {
            GateDecision::Skip => Signal::Frozen,
            GateDecision::Run(signal) => signal,
        };
        self.signal = Some(signal);
        runtime.set_label(id, signal.label());
        decision
    }

    /// Run one evaluation of the node against `documents`.
    ///
    /// Per-slot failures become diagnostics. A rollback (other than a dry
    /// run) marks the node's outputs failed.
    ///
    /// # Errors
    ///
    /// Errors that abort the batch: a refused transaction, an unknown
    /// document, or a reconstruction error configured to abort. The batch
    /// is rolled back and the outputs are marked failed first.
    pub fn on_evaluate(
        &mut self,
        id: NodeId,
        runtime: &mut dyn GraphRuntime,
        documents: &mut DocumentSet,
    ) -> Result<EvaluationReport> {
        let context = CycleContext::new(self.name.clone());
        log_op_start!(
            "component_evaluate",
            component_name = %self.name,
            cycle_id = %context.cycle_id,
            slot_count = self.inputs.len()
        );
        let start = Instant::now();

        let report = self.evaluate_impl(id, runtime, documents, &context).map_err(|e| {
            runtime.mark_output_failed(id);
            runtime.report_diagnostic(id, Diagnostic::error(e.to_string()));
            log_op_error!(
                "component_evaluate",
                e.clone(),
                duration_ms = start.elapsed().as_millis() as u64,
                cycle_id = %context.cycle_id
            );
            e
        })?;

        log_op_end!(
            "component_evaluate",
            duration_ms = start.elapsed().as_millis() as u64,
            cycle_id = %context.cycle_id,
            signal = %report.signal,
            status = %report.status
        );
        Ok(report)
    }

    fn evaluate_impl(
        &mut self,
        id: NodeId,
        runtime: &mut dyn GraphRuntime,
        documents: &mut DocumentSet,
        context: &CycleContext,
    ) -> Result<EvaluationReport> {
        let signal = match self.on_collect_data(id, runtime) {
            GateDecision::Skip => {
                tracing::debug!(component_name = %self.name, "frozen, deferring downstream");
                runtime.schedule_deferred_pass(id);
                return Ok(EvaluationReport::skipped(Signal::Frozen));
            }
            GateDecision::Run(signal) => signal,
        };

        let mut chain = TransactionChain::new(context.name.clone(), self.manager.clone());
        let mut cycle = ReconcileCycle::begin(&self.previous, self.options.clone());
        let mut outcomes = Vec::with_capacity(self.inputs.len());

        for (slot, iteration) in self.inputs.iter().enumerate() {
            let step = match documents.get_mut(&iteration.document) {
                Some(store) => chain.start(store.as_mut(), &mut NoHooks).and_then(|_| {
                    cycle.reconcile_slot(slot, store.as_mut(), &mut self.node, &iteration.input)
                }),
                None => Err(DocweaveError::DocumentNotFound {
                    document: iteration.document.to_string(),
                }),
            };
            match step {
                Ok(outcome) => {
                    for diagnostic in &outcome.diagnostics {
                        runtime.report_diagnostic(id, diagnostic.clone());
                    }
                    outcomes.push(outcome);
                }
                Err(e) => {
                    chain.rollback(documents, &mut NoHooks);
                    return Err(e);
                }
            }
        }

        // Documents that only lost entities still need a transaction for
        // the sweep.
        for document in cycle.stale_documents() {
            let Some(store) = documents.get_mut(&document) else {
                tracing::debug!(
                    document_id = %document,
                    "stale document is not open, keeping its entities"
                );
                continue;
            };
            if let Err(e) = chain.start(store.as_mut(), &mut NoHooks) {
                chain.rollback(documents, &mut NoHooks);
                return Err(e);
            }
        }

        if chain.is_empty() {
            self.previous = cycle.finish(&BTreeSet::new());
            return Ok(EvaluationReport {
                signal,
                status: TransactionStatus::Uninitialized,
                outcomes,
                chain: None,
            });
        }

        if signal == Signal::Simulated {
            for document in chain.documents() {
                let posted = match documents.get_mut(&document) {
                    Some(store) => store.post_failure(FailureDraft::simulated_transaction()),
                    None => continue,
                };
                if let Err(e) = posted {
                    chain.rollback(documents, &mut NoHooks);
                    return Err(e);
                }
            }
        }

        let remarks = cycle.ignored_remarks();
        let report = chain.commit(documents, &mut CycleHooks { cycle: &mut cycle });
        let committed: BTreeSet<DocumentId> = report.committed().cloned().collect();
        self.previous = cycle.finish(&committed);

        for diagnostic in report.diagnostics().chain(remarks.iter()) {
            runtime.report_diagnostic(id, diagnostic.clone());
        }
        if report.status != TransactionStatus::Committed && signal != Signal::Simulated {
            runtime.mark_output_failed(id);
            runtime.report_diagnostic(
                id,
                Diagnostic::error(format!("Transaction {} and aborted.", report.status)),
            );
        }

        Ok(EvaluationReport {
            signal,
            status: report.status,
            outcomes,
            chain: Some(report),
        })
    }

    /// Hand the tracked entities of `store`'s document over to the user:
    /// unpin them in their own transaction and stop tracking them, so
    /// future cycles neither reuse nor delete them.
    ///
    /// # Errors
    ///
    /// `TransactionRefused` if the transaction cannot start, and store
    /// errors while unpinning (the transaction is rolled back).
    pub fn release(&mut self, store: &mut dyn DocumentStore) -> Result<ReleaseReport> {
        let mut transaction = self.manager.open(store, &format!("Release {}", self.name))?;
        let (structure, released) = match release_document(&self.previous, store) {
            Ok(result) => result,
            Err(e) => {
                self.manager.rollback(store, &mut transaction, &mut NoHooks)?;
                return Err(e);
            }
        };

        let report = self.manager.commit(store, &mut transaction, &mut NoHooks)?;
        if report.status == TransactionStatus::Committed {
            self.previous = structure;
            tracing::info!(
                component_name = %self.name,
                document_id = %report.document,
                released,
                "entities released"
            );
            return Ok(ReleaseReport {
                released,
                status: report.status,
            });
        }
        Ok(ReleaseReport {
            released: 0,
            status: report.status,
        })
    }
}
