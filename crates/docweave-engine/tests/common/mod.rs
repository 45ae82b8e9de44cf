use docweave_core::errors::{DocweaveError, Result};
use docweave_core::store::{insert_document, UniqueNameRule};
use docweave_core::{
    ComponentConfig, Diagnostic, DocumentId, DocumentSet, DocumentStore, EntityDraft, EntityId,
    MemoryDocument, Reconstruct, Signal, SlotContext,
};
use docweave_engine::{GraphRuntime, Iteration, NodeId, ReconcileComponent};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};

/// Input of one box slot
#[derive(Debug, Clone, PartialEq)]
pub struct BoxSpec {
    pub name: String,
    pub size: f64,
}

/// Boxes are reused while the name is unchanged and recreated otherwise.
/// A negative size is rejected.
pub struct Boxes;

impl Reconstruct for Boxes {
    type Input = BoxSpec;

    fn reconstruct(
        &mut self,
        ctx: &mut SlotContext<'_>,
        input: &BoxSpec,
    ) -> Result<Option<EntityId>> {
        if input.size < 0.0 {
            return Err(DocweaveError::InvalidInput {
                param: "size".to_string(),
                reason: "must not be negative".to_string(),
            });
        }

        if let Some(candidate) = ctx.candidate().cloned() {
            if candidate.name.as_deref() == Some(input.name.as_str()) {
                let mut updated = candidate;
                updated.properties.insert("size".to_string(), json!(input.size));
                ctx.store().update_entity(&updated)?;
                return Ok(Some(updated.id));
            }
        }

        let id = ctx.store().create_entity(
            EntityDraft::new("box")
                .with_name(input.name.clone())
                .with_property("size", json!(input.size)),
        )?;
        Ok(Some(id))
    }
}

/// Iterations for `names` in `document`, size 1 each
#[allow(dead_code)]
pub fn boxes(document: &str, names: &[&str]) -> Vec<Iteration<BoxSpec>> {
    names
        .iter()
        .map(|name| {
            Iteration::new(
                document,
                BoxSpec {
                    name: name.to_string(),
                    size: 1.0,
                },
            )
        })
        .collect()
}

/// Memory documents, each enforcing unique names
#[allow(dead_code)]
pub fn documents(ids: &[&str]) -> DocumentSet {
    let mut set = DocumentSet::new();
    for id in ids {
        insert_document(&mut set, Box::new(MemoryDocument::new(*id).with_rule(UniqueNameRule)));
    }
    set
}

#[allow(dead_code)]
pub fn doc<'a>(set: &'a mut DocumentSet, id: &str) -> &'a mut dyn DocumentStore {
    set.get_mut(&DocumentId::new(id)).expect("document is open").as_mut()
}

#[allow(dead_code)]
pub fn entity_count(set: &DocumentSet, id: &str) -> usize {
    set.get(&DocumentId::new(id))
        .expect("document is open")
        .entity_count()
        .expect("count entities")
}

#[allow(dead_code)]
pub fn component(config: &ComponentConfig) -> ReconcileComponent<Boxes> {
    ReconcileComponent::new("Boxes", Boxes, config).expect("valid config")
}

/// Records what a node asked of the graph during one evaluation
#[allow(dead_code)]
#[derive(Debug, Default)]
pub struct RecordingRuntime {
    pub signals: Vec<Signal>,
    pub deferred: Vec<NodeId>,
    pub failed: BTreeSet<NodeId>,
    pub diagnostics: Vec<Diagnostic>,
    pub labels: BTreeMap<NodeId, String>,
}

impl RecordingRuntime {
    #[allow(dead_code)]
    pub fn with_signals(signals: &[Signal]) -> Self {
        Self {
            signals: signals.to_vec(),
            ..Self::default()
        }
    }

    #[allow(dead_code)]
    pub fn texts(&self) -> Vec<String> {
        self.diagnostics.iter().map(|d| d.text.clone()).collect()
    }
}

impl GraphRuntime for RecordingRuntime {
    fn upstream_signals(&self, _node: NodeId) -> Vec<Signal> {
        self.signals.clone()
    }

    fn schedule_deferred_pass(&mut self, node: NodeId) {
        self.deferred.push(node);
    }

    fn mark_output_failed(&mut self, node: NodeId) {
        self.failed.insert(node);
    }

    fn report_diagnostic(&mut self, _node: NodeId, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    fn set_label(&mut self, node: NodeId, label: &str) {
        self.labels.insert(node, label.to_string());
    }
}
