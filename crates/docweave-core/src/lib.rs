//! docweave core - reconciliation and transaction control loop
//!
//! Lets a dataflow graph drive entities inside an external transactional
//! document store:
//! - Transaction manager and per-document transaction chain
//! - Failure resolver deciding between continue, retry after fix, and rollback
//! - Entity reconciler mapping node output slots onto live entities
//! - Signal/freeze gate deciding whether a node runs at all
//! - Store abstraction with an in-memory reference document

pub mod chain;
pub mod config;
pub mod diagnostics;
pub mod errors;
pub mod logging_facility;
pub mod model;
pub mod policy;
pub mod reconciler;
pub mod resolver;
pub mod signal;
pub mod store;
pub mod transaction;

// Used by the logging macros
pub use docweave_core_types::schema;

// Re-export commonly used types
pub use chain::{ChainReport, TransactionChain};
pub use config::ComponentConfig;
pub use diagnostics::{Diagnostic, DiagnosticLevel, Region};
pub use errors::{DocweaveError, ExError, ExErrorKind, Result};
pub use model::{DocumentId, Entity, EntityDraft, EntityId, EntityRef, FailureRecord, Severity};
pub use policy::{FailureProcessingMode, PropertyMask, TrackingMode};
pub use reconciler::{
    PreviousStructure, ReconcileCycle, Reconstruct, SlotContext, SlotOutcome, SlotState,
};
pub use resolver::{FailureResolver, ResolutionDecision, ResolutionPlan};
pub use signal::{effective_signal, Signal};
pub use store::{DocumentSet, DocumentStore, MemoryDocument};
pub use transaction::{
    CommitReport, NoHooks, Transaction, TransactionHooks, TransactionManager, TransactionStatus,
};
