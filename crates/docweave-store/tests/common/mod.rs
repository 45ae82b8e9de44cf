use docweave_core::errors::{DocweaveError, Result};
use docweave_core::reconciler::{ReconcileCycle, ReconcileOptions};
use docweave_core::transaction::{CommitReport, TransactionHooks, TransactionManager};
use docweave_core::{
    DocumentId, DocumentStore, EntityDraft, EntityId, PreviousStructure, Reconstruct, SlotContext,
};
use docweave_store::SqliteDocument;
use serde_json::json;
use std::collections::BTreeSet;

/// Levels keep their entity while the name is unchanged and update the
/// elevation in place.
pub struct Levels;

impl Reconstruct for Levels {
    type Input = (String, f64);

    fn reconstruct(
        &mut self,
        ctx: &mut SlotContext<'_>,
        input: &(String, f64),
    ) -> Result<Option<EntityId>> {
        let (name, elevation) = input;
        if name.is_empty() {
            return Err(DocweaveError::MissingInput {
                param: "name".to_string(),
            });
        }
        if let Some(mut candidate) = ctx.candidate().cloned() {
            if candidate.name.as_deref() == Some(name.as_str()) {
                candidate.properties.insert("elevation".to_string(), json!(elevation));
                ctx.store().update_entity(&candidate)?;
                return Ok(Some(candidate.id));
            }
        }
        let id = ctx.store().create_entity(
            EntityDraft::new("level")
                .with_name(name.clone())
                .with_property("elevation", json!(elevation)),
        )?;
        Ok(Some(id))
    }
}

struct SweepHooks<'a> {
    cycle: &'a mut ReconcileCycle,
}

impl TransactionHooks for SweepHooks<'_> {
    fn on_before_commit(
        &mut self,
        store: &mut dyn DocumentStore,
        _transaction: &str,
    ) -> Result<()> {
        self.cycle.sweep_stale(store).map(|_| ())
    }
}

pub fn level(name: &str, elevation: f64) -> (String, f64) {
    (name.to_string(), elevation)
}

/// Open, reconcile every slot, sweep, commit, and swap the structure.
#[allow(dead_code)]
pub fn run_cycle(
    doc: &mut SqliteDocument,
    previous: &PreviousStructure,
    inputs: &[(String, f64)],
) -> (CommitReport, PreviousStructure) {
    let manager = TransactionManager::default();
    let mut tx = manager.open(doc, "Levels").expect("open transaction");
    let mut cycle = ReconcileCycle::begin(previous, ReconcileOptions::default());
    for (slot, input) in inputs.iter().enumerate() {
        cycle
            .reconcile_slot(slot, doc, &mut Levels, input)
            .expect("slot should not abort");
    }
    let report = manager
        .commit(doc, &mut tx, &mut SweepHooks { cycle: &mut cycle })
        .expect("commit");
    let committed: BTreeSet<DocumentId> =
        if report.status == docweave_core::TransactionStatus::Committed {
            [doc.document_id().clone()].into_iter().collect()
        } else {
            BTreeSet::new()
        };
    (report, cycle.finish(&committed))
}
