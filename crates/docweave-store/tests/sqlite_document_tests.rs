#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{level, run_cycle};
use docweave_core::model::{FailureDraft, Severity};
use docweave_core::{DocumentStore, EntityDraft, PreviousStructure, TransactionStatus};
use docweave_store::{load_structure, save_structure, SqliteDocument};
use serde_json::json;
use tempfile::TempDir;

#[test]
fn test_structure_and_entities_survive_reopen() {
    // GIVEN a file-backed document reconciled once
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("model.db");
    let structure = {
        let mut doc = SqliteDocument::open("model", &path).unwrap();
        let (report, structure) = run_cycle(
            &mut doc,
            &PreviousStructure::new(),
            &[level("L0", 0.0), level("L1", 3.5)],
        );
        assert_eq!(report.status, TransactionStatus::Committed);
        save_structure(doc.connection(), "levels-node", &structure).unwrap();
        structure
    };

    // WHEN the document is reopened and the node reruns from the saved structure
    let mut doc = SqliteDocument::open("model", &path).unwrap();
    let loaded = load_structure(doc.connection(), "levels-node")
        .unwrap()
        .unwrap();
    assert_eq!(loaded.structure, structure);
    let (_, next) = run_cycle(&mut doc, &loaded.structure, &[level("L0", 0.0), level("L1", 4.0)]);

    // THEN both levels were reused and updated in place
    assert_eq!(next, structure);
    assert_eq!(doc.entity_count().unwrap(), 2);
    let l1 = doc.entity(next.get(1).unwrap().id).unwrap().unwrap();
    assert_eq!(l1.property("elevation"), Some(&json!(4.0)));
    assert!(l1.pinned);
}

#[test]
fn test_identical_rerun_writes_nothing() {
    // GIVEN a reconciled document
    let mut doc = SqliteDocument::open_in_memory("model").unwrap();
    let inputs = [level("L0", 0.0), level("L1", 3.5)];
    let (_, structure) = run_cycle(&mut doc, &PreviousStructure::new(), &inputs);

    // WHEN the same inputs run again
    let before = doc.mutation_count();
    let (report, again) = run_cycle(&mut doc, &structure, &inputs);

    // THEN no row was written
    assert_eq!(report.status, TransactionStatus::Committed);
    assert_eq!(doc.mutation_count(), before);
    assert_eq!(again, structure);
}

#[test]
fn test_shrinking_input_sweeps_stale_row() {
    // GIVEN three levels
    let mut doc = SqliteDocument::open_in_memory("model").unwrap();
    let (_, structure) = run_cycle(
        &mut doc,
        &PreviousStructure::new(),
        &[level("L0", 0.0), level("L1", 3.0), level("L2", 6.0)],
    );

    // WHEN only two remain
    let (_, next) = run_cycle(&mut doc, &structure, &[level("L0", 0.0), level("L1", 3.0)]);

    // THEN the third row is gone and the others kept their ids
    assert_eq!(doc.entity_count().unwrap(), 2);
    assert_eq!(next.get(0), structure.get(0));
    assert_eq!(next.get(1), structure.get(1));
    assert!(doc.entity(structure.get(2).unwrap().id).unwrap().is_none());
}

#[test]
fn test_rolled_back_batch_leaves_no_rows() {
    // GIVEN a document with one committed level
    let mut doc = SqliteDocument::open_in_memory("model").unwrap();
    run_cycle(&mut doc, &PreviousStructure::new(), &[level("L0", 0.0)]);

    // WHEN a batch creates rows and then hits an unresolvable error
    let manager = docweave_core::TransactionManager::default();
    let mut tx = manager.open(&mut doc, "broken").unwrap();
    doc.create_entity(EntityDraft::new("level").with_name("L9"))
        .unwrap();
    doc.post_failure(FailureDraft::new("level.invalid", Severity::Error))
        .unwrap();
    let report = manager
        .commit(&mut doc, &mut tx, &mut docweave_core::NoHooks)
        .unwrap();

    // THEN the row count is back where it was
    assert_eq!(report.status, TransactionStatus::RolledBack);
    assert_eq!(doc.entity_count().unwrap(), 1);
    assert!(!doc.has_open_transaction());
}

#[test]
fn test_locked_document_refuses_transaction() {
    let mut doc = SqliteDocument::open_in_memory("model").unwrap();
    doc.lock_for_editing("another session is editing");

    let err = docweave_core::TransactionManager::default()
        .open(&mut doc, "Levels")
        .unwrap_err();
    assert!(err.to_string().contains("another session is editing"));
}
