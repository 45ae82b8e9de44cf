use docweave_core::errors::{DocweaveError, Result};
use docweave_core::reconciler::{ReconcileCycle, ReconcileOptions};
use docweave_core::transaction::{CommitReport, TransactionHooks, TransactionManager};
use docweave_core::{
    DocumentId, DocumentStore, EntityDraft, EntityId, MemoryDocument, PreviousStructure,
    Reconstruct, SlotContext, SlotOutcome,
};
use serde_json::json;
use std::collections::BTreeSet;

/// Input of one material slot
#[derive(Debug, Clone, PartialEq)]
pub struct MaterialInput {
    pub name: String,
    pub color: String,
}

#[allow(dead_code)]
pub fn material(name: &str, color: &str) -> MaterialInput {
    MaterialInput {
        name: name.to_string(),
        color: color.to_string(),
    }
}

/// Materials are reused while the name is unchanged (color is updated in
/// place) and recreated when the name changes.
pub struct Materials;

impl Reconstruct for Materials {
    type Input = MaterialInput;

    fn reconstruct(
        &mut self,
        ctx: &mut SlotContext<'_>,
        input: &MaterialInput,
    ) -> Result<Option<EntityId>> {
        if input.name.is_empty() {
            return Err(DocweaveError::MissingInput {
                param: "name".to_string(),
            });
        }

        if let Some(candidate) = ctx.candidate().cloned() {
            if candidate.name.as_deref() == Some(input.name.as_str()) {
                let mut updated = candidate;
                updated.properties.insert("color".to_string(), json!(input.color));
                ctx.store().update_entity(&updated)?;
                return Ok(Some(updated.id));
            }
        }

        if let Some(existing) = ctx.store().find_by_name("material", &input.name)? {
            if !existing.pinned {
                return ctx.resolve_name_conflict(&existing);
            }
        }

        let id = ctx.store().create_entity(
            EntityDraft::new("material")
                .with_name(input.name.clone())
                .with_property("color", json!(input.color)),
        )?;
        Ok(Some(id))
    }
}

/// Sweeps stale entities right before commit
pub struct SweepHooks<'a> {
    pub cycle: &'a mut ReconcileCycle,
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

/// Result of one single-document reconcile cycle
#[allow(dead_code)]
pub struct CycleResult {
    pub outcomes: Vec<SlotOutcome>,
    pub report: CommitReport,
    pub structure: PreviousStructure,
}

/// Run one full cycle: open, reconcile every slot, sweep, commit, swap.
#[allow(dead_code)]
pub fn run_cycle(
    doc: &mut MemoryDocument,
    manager: &TransactionManager,
    options: &ReconcileOptions,
    previous: &PreviousStructure,
    inputs: &[MaterialInput],
) -> CycleResult {
    let mut tx = manager.open(doc, "Materials").expect("open transaction");
    let mut cycle = ReconcileCycle::begin(previous, options.clone());
    let outcomes: Vec<SlotOutcome> = inputs
        .iter()
        .enumerate()
        .map(|(slot, input)| {
            cycle
                .reconcile_slot(slot, doc, &mut Materials, input)
                .expect("slot should not abort")
        })
        .collect();

    let report = {
        let mut hooks = SweepHooks { cycle: &mut cycle };
        manager.commit(doc, &mut tx, &mut hooks).expect("commit")
    };
    let committed: BTreeSet<DocumentId> =
        if report.status == docweave_core::TransactionStatus::Committed {
            [doc.document_id().clone()].into_iter().collect()
        } else {
            BTreeSet::new()
        };
    CycleResult {
        outcomes,
        report,
        structure: cycle.finish(&committed),
    }
}

/// Number of live entities reachable from `structure`
#[allow(dead_code)]
pub fn live_entities(doc: &MemoryDocument, structure: &PreviousStructure) -> usize {
    structure
        .entities()
        .filter(|r| doc.entity(r.id).ok().flatten().is_some())
        .count()
}
