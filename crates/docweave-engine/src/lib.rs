//! docweave engine - dataflow-facing orchestration
//!
//! Drives the core control loop from a node graph:
//! - `GraphRuntime`, what a node needs from the graph it lives in
//! - `ReconcileComponent`, the per-node gate / reconcile / commit cycle
//! - `Solution`, a single-threaded graph runner with a deferred run queue

pub mod component;
pub mod runtime;
pub mod solution;

pub use component::{EvaluationReport, Iteration, ReconcileComponent, ReleaseReport};
pub use runtime::{GraphRuntime, NodeId};
pub use solution::{SignalSource, Solution, SolutionNode, SolutionOptions, SolutionReport};
