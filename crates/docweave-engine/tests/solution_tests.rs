#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{boxes, component, documents, entity_count};
use docweave_core::{ComponentConfig, DiagnosticLevel, FailureProcessingMode, Signal};
use docweave_engine::{SignalSource, Solution, SolutionOptions};

#[test]
fn test_active_graph_runs_in_one_pass() {
    let mut set = documents(&["a"]);
    let mut solution = Solution::default();
    let source = solution.add_node(SignalSource::new("signal", Signal::Effective));
    let mut node = component(&ComponentConfig::default());
    node.set_inputs(boxes("a", &["A", "B"]));
    let node = solution.add_node(node);
    solution.connect(source, node).unwrap();

    let report = solution.run(&mut set);

    assert_eq!(report.passes, 1);
    assert_eq!(report.evaluated, vec![source, node]);
    assert_eq!(solution.label(node), Some("Effective"));
    assert!(!solution.is_failed(node));
    assert_eq!(entity_count(&set, "a"), 2);
}

#[test]
fn test_frozen_node_pushes_downstream_to_a_later_pass() {
    // GIVEN freeze -> upper -> lower, each component in its own document
    let mut set = documents(&["upper", "lower"]);
    let mut solution = Solution::default();
    let freeze = solution.add_node(SignalSource::new("freeze", Signal::Frozen));

    let mut upper = component(&ComponentConfig::default());
    upper.set_inputs(boxes("upper", &["U"]));
    let upper = solution.add_node(upper);

    let mut lower = component(&ComponentConfig::default());
    lower.set_inputs(boxes("lower", &["L"]));
    let lower = solution.add_node(lower);

    solution.connect(freeze, upper).unwrap();
    solution.connect(upper, lower).unwrap();

    // WHEN the graph runs
    let report = solution.run(&mut set);

    // THEN the frozen node did nothing and its downstream ran in pass two
    assert_eq!(report.passes, 2);
    assert_eq!(report.evaluated, vec![freeze, upper, lower]);
    assert_eq!(solution.label(upper), Some("Frozen"));
    assert_eq!(entity_count(&set, "upper"), 0);
    assert_eq!(entity_count(&set, "lower"), 1);
}

#[test]
fn test_simulated_source_is_a_dry_run() {
    let mut set = documents(&["a"]);
    let mut solution = Solution::default();
    let source = solution.add_node(SignalSource::new("dry run", Signal::Simulated));
    let mut node = component(&ComponentConfig::default());
    node.set_inputs(boxes("a", &["A"]));
    let node = solution.add_node(node);
    solution.connect(source, node).unwrap();

    let report = solution.run(&mut set);

    assert!(report.errors.is_empty());
    assert_eq!(solution.label(node), Some("Simulated"));
    assert!(!solution.is_failed(node));
    assert_eq!(entity_count(&set, "a"), 0);
}

#[test]
fn test_rolled_back_node_is_failed_and_others_still_run() {
    let mut set = documents(&["a", "b"]);
    let mut solution = Solution::default();

    let mut broken = component(&ComponentConfig {
        failure_mode: FailureProcessingMode::ProceedWithRollback,
        ..ComponentConfig::default()
    });
    broken.set_inputs(boxes("a", &["Twin", "Twin"]));
    let broken = solution.add_node(broken);

    let mut healthy = component(&ComponentConfig::default());
    healthy.set_inputs(boxes("b", &["B"]));
    let healthy = solution.add_node(healthy);

    let report = solution.run(&mut set);

    assert_eq!(report.evaluated, vec![broken, healthy]);
    assert!(report.errors.is_empty());
    assert!(solution.is_failed(broken));
    assert!(solution
        .diagnostics(broken)
        .iter()
        .any(|d| d.text == "Transaction RolledBack and aborted."));
    assert!(!solution.is_failed(healthy));
    assert_eq!(entity_count(&set, "a"), 0);
    assert_eq!(entity_count(&set, "b"), 1);
}

#[test]
fn test_node_error_is_recorded_and_run_continues() {
    let mut set = documents(&["a"]);
    let mut solution = Solution::default();

    let mut lost = component(&ComponentConfig::default());
    lost.set_inputs(boxes("closed", &["X"]));
    let lost = solution.add_node(lost);

    let mut fine = component(&ComponentConfig::default());
    fine.set_inputs(boxes("a", &["A"]));
    let fine = solution.add_node(fine);

    let report = solution.run(&mut set);

    assert_eq!(report.errors, vec![lost]);
    assert!(solution.is_failed(lost));
    assert_eq!(solution.diagnostics(lost).len(), 1);
    assert_eq!(solution.diagnostics(lost)[0].level, DiagnosticLevel::Error);
    assert!(!solution.is_failed(fine));
    assert_eq!(entity_count(&set, "a"), 1);
}

#[test]
fn test_rerun_reuses_entities() {
    let mut set = documents(&["a"]);
    let mut solution = Solution::default();
    let mut node = component(&ComponentConfig::default());
    node.set_inputs(boxes("a", &["A", "B"]));
    solution.add_node(node);

    solution.run(&mut set);
    solution.run(&mut set);

    assert_eq!(entity_count(&set, "a"), 2);
}

#[test]
fn test_pass_limit_is_reported() {
    let mut set = documents(&["a"]);
    let mut solution = Solution::new(SolutionOptions { max_passes: 1 });
    let freeze = solution.add_node(SignalSource::new("freeze", Signal::Frozen));
    let mut upper = component(&ComponentConfig::default());
    upper.set_inputs(Vec::new());
    let upper = solution.add_node(upper);
    let mut lower = component(&ComponentConfig::default());
    lower.set_inputs(boxes("a", &["L"]));
    let lower = solution.add_node(lower);
    solution.connect(freeze, upper).unwrap();
    solution.connect(upper, lower).unwrap();

    let report = solution.run(&mut set);

    assert_eq!(report.passes, 1);
    assert_eq!(report.dropped_passes, 1);
    assert!(!report.evaluated.contains(&lower));
    assert_eq!(entity_count(&set, "a"), 0);
}
