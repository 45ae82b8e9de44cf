//! Single-threaded graph runner
//!
//! A pass walks the scheduled nodes depth-first, upstream before
//! downstream. A node that defers (a frozen reconcile node) pulls its whole
//! downstream out of the current pass and into a new pass at the back of
//! the run queue. Passes are bounded by [`SolutionOptions::max_passes`].

use docweave_core::errors::{DocweaveError, Result};
use docweave_core::{log_op_end, log_op_start, Diagnostic, DocumentSet, Reconstruct, Signal};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use std::time::Instant;

use crate::component::ReconcileComponent;
use crate::runtime::{GraphRuntime, NodeId};

/// A node the solution can evaluate
pub trait SolutionNode {
    fn name(&self) -> &str;

    /// The signal this node feeds downstream, if it produces one
    fn emitted_signal(&self) -> Option<Signal> {
        None
    }

    fn on_solution_expired(&mut self) {}

    /// # Errors
    ///
    /// Anything that aborted the node's evaluation.
    fn evaluate(
        &mut self,
        id: NodeId,
        runtime: &mut dyn GraphRuntime,
        documents: &mut DocumentSet,
    ) -> Result<()>;
}

impl<R: Reconstruct> SolutionNode for ReconcileComponent<R> {
    fn name(&self) -> &str {
        ReconcileComponent::name(self)
    }

    fn on_solution_expired(&mut self) {
        ReconcileComponent::on_solution_expired(self);
    }

    fn evaluate(
        &mut self,
        id: NodeId,
        runtime: &mut dyn GraphRuntime,
        documents: &mut DocumentSet,
    ) -> Result<()> {
        self.on_evaluate(id, runtime, documents).map(|_| ())
    }
}

/// A node that only emits a fixed signal
#[derive(Debug, Clone)]
pub struct SignalSource {
    name: String,
    signal: Signal,
}

impl SignalSource {
    pub fn new(name: impl Into<String>, signal: Signal) -> Self {
        Self {
            name: name.into(),
            signal,
        }
    }

    pub fn set_signal(&mut self, signal: Signal) {
        self.signal = signal;
    }
}

impl SolutionNode for SignalSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn emitted_signal(&self) -> Option<Signal> {
        Some(self.signal)
    }

    fn evaluate(
        &mut self,
        id: NodeId,
        runtime: &mut dyn GraphRuntime,
        _documents: &mut DocumentSet,
    ) -> Result<()> {
        runtime.set_label(id, self.signal.label());
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolutionOptions {
    /// Passes per run, the first one included
    pub max_passes: u32,
}

impl Default for SolutionOptions {
    fn default() -> Self {
        Self { max_passes: 16 }
    }
}

/// What one run did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SolutionReport {
    pub passes: u32,
    /// Nodes in evaluation order; a node appears once per pass it ran in
    pub evaluated: Vec<NodeId>,
    /// Nodes whose evaluation returned an error
    pub errors: Vec<NodeId>,
    /// Deferred passes left in the queue when the pass limit was hit
    pub dropped_passes: usize,
}

/// Per-node state the runtime writes during a pass
#[derive(Debug, Clone, Default)]
struct NodeState {
    label: Option<String>,
    failed: bool,
    diagnostics: Vec<Diagnostic>,
}

struct NodeEntry {
    node: Box<dyn SolutionNode>,
    upstream: Vec<NodeId>,
    state: NodeState,
}

/// The runtime one node sees while it evaluates
#[derive(Default)]
struct PassRuntime {
    upstream: Vec<Signal>,
    deferred: Vec<NodeId>,
    state: NodeState,
}

impl GraphRuntime for PassRuntime {
    fn upstream_signals(&self, _node: NodeId) -> Vec<Signal> {
        self.upstream.clone()
    }

    fn schedule_deferred_pass(&mut self, node: NodeId) {
        self.deferred.push(node);
    }

    fn mark_output_failed(&mut self, _node: NodeId) {
        self.state.failed = true;
    }

    fn report_diagnostic(&mut self, _node: NodeId, diagnostic: Diagnostic) {
        self.state.diagnostics.push(diagnostic);
    }

    fn set_label(&mut self, _node: NodeId, label: &str) {
        self.state.label = Some(label.to_string());
    }
}

#[derive(Default)]
pub struct Solution {
    nodes: Vec<NodeEntry>,
    options: SolutionOptions,
}

impl Solution {
    pub fn new(options: SolutionOptions) -> Self {
        Self {
            nodes: Vec::new(),
            options,
        }
    }

    pub fn add_node(&mut self, node: impl SolutionNode + 'static) -> NodeId {
        self.nodes.push(NodeEntry {
            node: Box::new(node),
            upstream: Vec::new(),
            state: NodeState::default(),
        });
        NodeId(self.nodes.len() - 1)
    }

    /// Feed `from` into `to`.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for unknown nodes and for connections that would
    /// close a cycle.
    pub fn connect(&mut self, from: NodeId, to: NodeId) -> Result<()> {
        for id in [from, to] {
            if id.0 >= self.nodes.len() {
                return Err(DocweaveError::InvalidInput {
                    param: "node".to_string(),
                    reason: format!("{} does not exist", id),
                });
            }
        }
        if from == to || self.downstream(to).contains(&from) {
            return Err(DocweaveError::InvalidInput {
                param: "to".to_string(),
                reason: format!("connecting {} to {} would create a cycle", from, to),
            });
        }
        let upstream = &mut self.nodes[to.0].upstream;
        if !upstream.contains(&from) {
            upstream.push(from);
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn label(&self, id: NodeId) -> Option<&str> {
        self.nodes.get(id.0).and_then(|e| e.state.label.as_deref())
    }

    pub fn is_failed(&self, id: NodeId) -> bool {
        self.nodes.get(id.0).is_some_and(|e| e.state.failed)
    }

    /// Diagnostics of the node's last evaluation
    pub fn diagnostics(&self, id: NodeId) -> &[Diagnostic] {
        self.nodes
            .get(id.0)
            .map(|e| e.state.diagnostics.as_slice())
            .unwrap_or_default()
    }

    /// Every node reachable downstream of `id`, `id` excluded
    pub fn downstream(&self, id: NodeId) -> BTreeSet<NodeId> {
        let mut found = BTreeSet::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            for (index, entry) in self.nodes.iter().enumerate() {
                let next = NodeId(index);
                if entry.upstream.contains(&current) && found.insert(next) {
                    stack.push(next);
                }
            }
        }
        found
    }

    /// Invalidate the whole graph
    pub fn expire(&mut self) {
        for entry in &mut self.nodes {
            entry.node.on_solution_expired();
            entry.state = NodeState::default();
        }
    }

    /// Evaluate every node, then drain the deferred passes.
    pub fn run(&mut self, documents: &mut DocumentSet) -> SolutionReport {
        log_op_start!("solution_run", node_count = self.nodes.len());
        let start = Instant::now();

        let order = self.order();
        let max_passes = self.options.max_passes.max(1);
        let mut report = SolutionReport::default();
        let mut queue: VecDeque<BTreeSet<NodeId>> = VecDeque::new();
        queue.push_back(order.iter().copied().collect());

        while let Some(scheduled) = queue.pop_front() {
            if report.passes >= max_passes {
                report.dropped_passes = queue.len() + 1;
                tracing::warn!(max_passes, dropped = report.dropped_passes, "pass limit reached");
                break;
            }
            report.passes += 1;

            let mut pulled: BTreeSet<NodeId> = BTreeSet::new();
            for id in order.iter().copied().filter(|id| scheduled.contains(id)) {
                if pulled.contains(&id) {
                    continue;
                }
                let deferred = self.evaluate_node(id, documents, &mut report);
                for node in deferred {
                    pulled.extend(self.downstream(node));
                }
            }
            if !pulled.is_empty() {
                tracing::debug!(
                    pass = report.passes,
                    deferred = pulled.len(),
                    "downstream deferred"
                );
                queue.push_back(pulled);
            }
        }

        log_op_end!(
            "solution_run",
            duration_ms = start.elapsed().as_millis() as u64,
            passes = report.passes,
            evaluated = report.evaluated.len()
        );
        report
    }

    /// Returns the nodes whose downstream must move to a later pass
    fn evaluate_node(
        &mut self,
        id: NodeId,
        documents: &mut DocumentSet,
        report: &mut SolutionReport,
    ) -> Vec<NodeId> {
        let mut runtime = PassRuntime {
            upstream: self.upstream_signals(id),
            ..PassRuntime::default()
        };

        let entry = &mut self.nodes[id.0];
        let result = entry.node.evaluate(id, &mut runtime, documents);
        report.evaluated.push(id);
        if let Err(e) = result {
            tracing::warn!(
                node = %id,
                name = entry.node.name(),
                error = %e,
                "node evaluation failed"
            );
            runtime.state.failed = true;
            if runtime.state.diagnostics.is_empty() {
                runtime.state.diagnostics.push(Diagnostic::error(e.to_string()));
            }
            report.errors.push(id);
        }
        if runtime.state.label.is_none() {
            runtime.state.label = entry.state.label.take();
        }
        entry.state = runtime.state;
        runtime.deferred
    }

    fn upstream_signals(&self, id: NodeId) -> Vec<Signal> {
        self.nodes[id.0]
            .upstream
            .iter()
            .filter_map(|up| self.nodes[up.0].node.emitted_signal())
            .collect()
    }

    /// Depth-first order, upstream first, ties broken by insertion order
    fn order(&self) -> Vec<NodeId> {
        fn visit(
            solution: &Solution,
            id: NodeId,
            seen: &mut BTreeSet<NodeId>,
            order: &mut Vec<NodeId>,
        ) {
            if !seen.insert(id) {
                return;
            }
            for up in &solution.nodes[id.0].upstream {
                visit(solution, *up, seen, order);
            }
            order.push(id);
        }

        let mut seen = BTreeSet::new();
        let mut order = Vec::with_capacity(self.nodes.len());
        for index in 0..self.nodes.len() {
            visit(self, NodeId(index), &mut seen, &mut order);
        }
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Records its evaluations; defers its downstream when told to
    struct Stage {
        name: String,
        defer: bool,
    }

    impl SolutionNode for Stage {
        fn name(&self) -> &str {
            &self.name
        }

        fn evaluate(
            &mut self,
            id: NodeId,
            runtime: &mut dyn GraphRuntime,
            _documents: &mut DocumentSet,
        ) -> Result<()> {
            if self.defer {
                runtime.schedule_deferred_pass(id);
            }
            Ok(())
        }
    }

    fn stage(name: &str, defer: bool) -> Stage {
        Stage {
            name: name.to_string(),
            defer,
        }
    }

    #[test]
    fn test_upstream_runs_first() {
        let mut solution = Solution::default();
        let c = solution.add_node(stage("c", false));
        let a = solution.add_node(stage("a", false));
        let b = solution.add_node(stage("b", false));
        solution.connect(a, b).unwrap();
        solution.connect(b, c).unwrap();

        let report = solution.run(&mut DocumentSet::new());
        assert_eq!(report.evaluated, vec![a, b, c]);
        assert_eq!(report.passes, 1);
    }

    #[test]
    fn test_cycles_are_rejected() {
        let mut solution = Solution::default();
        let a = solution.add_node(stage("a", false));
        let b = solution.add_node(stage("b", false));
        solution.connect(a, b).unwrap();
        assert!(solution.connect(b, a).is_err());
        assert!(solution.connect(a, a).is_err());
        assert!(solution.connect(a, NodeId(9)).is_err());
    }

    #[test]
    fn test_deferring_node_moves_downstream_to_next_pass() {
        let mut solution = Solution::default();
        let a = solution.add_node(stage("a", true));
        let b = solution.add_node(stage("b", false));
        let c = solution.add_node(stage("c", false));
        solution.connect(a, b).unwrap();
        solution.connect(b, c).unwrap();

        let report = solution.run(&mut DocumentSet::new());
        assert_eq!(report.passes, 2);
        assert_eq!(report.evaluated, vec![a, b, c]);
    }

    #[test]
    fn test_pass_limit_drops_remaining_passes() {
        let mut solution = Solution::new(SolutionOptions { max_passes: 1 });
        let a = solution.add_node(stage("a", true));
        let b = solution.add_node(stage("b", false));
        solution.connect(a, b).unwrap();

        let report = solution.run(&mut DocumentSet::new());
        assert_eq!(report.passes, 1);
        assert_eq!(report.evaluated, vec![a]);
        assert_eq!(report.dropped_passes, 1);
    }

    #[test]
    fn test_signal_source_labels_itself() {
        let mut solution = Solution::default();
        let s = solution.add_node(SignalSource::new("freeze", Signal::Frozen));
        solution.run(&mut DocumentSet::new());
        assert_eq!(solution.label(s), Some("Frozen"));

        solution.expire();
        assert_eq!(solution.label(s), None);
    }
}
