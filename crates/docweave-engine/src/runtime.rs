//! The graph runtime as seen from one node

use docweave_core::{Diagnostic, Signal};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Index of a node inside its graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

pub trait GraphRuntime {
    /// Signals emitted by the signal producers directly upstream of `node`
    fn upstream_signals(&self, node: NodeId) -> Vec<Signal>;

    /// Recompute everything downstream of `node` in a later, separate pass
    fn schedule_deferred_pass(&mut self, node: NodeId);

    /// Flag every output of `node` as failed for this pass
    fn mark_output_failed(&mut self, node: NodeId);

    fn report_diagnostic(&mut self, node: NodeId, diagnostic: Diagnostic);

    /// Visible label of `node`
    fn set_label(&mut self, node: NodeId, label: &str);
}
