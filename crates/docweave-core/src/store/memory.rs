//! In-memory reference document
//!
//! Keeps a committed snapshot and, while a transaction is open, a working
//! copy. Savepoints are full snapshots of the working copy. Entity ids come
//! from a counter that survives rollback, so a token is never handed out
//! twice.

use super::ledger::{FailureLedger, FailureSource};
use super::rules::ValidationRule;
use super::DocumentStore;
use crate::errors::{DocweaveError, Result};
use crate::model::{
    DocumentId, Entity, EntityDraft, EntityId, FailureDraft, FailureId, FailureRecord, ScopeId,
    Severity,
};
use std::collections::BTreeMap;

#[derive(Debug)]
struct Working {
    name: String,
    entities: BTreeMap<EntityId, Entity>,
    savepoints: Vec<BTreeMap<EntityId, Entity>>,
    ledger: FailureLedger,
}

pub struct MemoryDocument {
    id: DocumentId,
    committed: BTreeMap<EntityId, Entity>,
    working: Option<Working>,
    next_entity: u64,
    lock: Option<String>,
    active_scope: Option<ScopeId>,
    rules: Vec<Box<dyn ValidationRule>>,
    warnings: Vec<FailureRecord>,
    mutations: u64,
}

impl MemoryDocument {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: DocumentId::new(id),
            committed: BTreeMap::new(),
            working: None,
            next_entity: 1,
            lock: None,
            active_scope: None,
            rules: Vec::new(),
            warnings: Vec::new(),
            mutations: 0,
        }
    }

    pub fn with_rule(mut self, rule: impl ValidationRule + 'static) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    /// Mark the document as being edited elsewhere; transactions are refused
    /// until [`unlock`](Self::unlock).
    pub fn lock_for_editing(&mut self, reason: impl Into<String>) {
        self.lock = Some(reason.into());
    }

    pub fn unlock(&mut self) {
        self.lock = None;
    }

    pub fn set_active_scope(&mut self, scope: Option<ScopeId>) {
        self.active_scope = scope;
    }

    /// Count of store writes (create, effective update, delete, pin change)
    /// since the document was created, including rolled-back ones.
    pub fn mutation_count(&self) -> u64 {
        self.mutations
    }

    /// Name of the open transaction, if any
    pub fn transaction_name(&self) -> Option<&str> {
        self.working.as_ref().map(|w| w.name.as_str())
    }

    /// Place an entity directly in committed state, as if authored earlier
    /// by the user in `scope`.
    pub fn seed_entity(
        &mut self,
        draft: EntityDraft,
        scope: Option<ScopeId>,
        pinned: bool,
    ) -> EntityId {
        let id = self.allocate_id();
        let entity = Entity {
            id,
            kind: draft.kind,
            name: draft.name,
            scope,
            pinned,
            properties: draft.properties,
        };
        self.committed.insert(id, entity.clone());
        if let Some(working) = self.working.as_mut() {
            working.entities.insert(id, entity);
        }
        id
    }

    fn allocate_id(&mut self) -> EntityId {
        let id = EntityId(self.next_entity);
        self.next_entity += 1;
        id
    }

    fn not_started(&self) -> DocweaveError {
        DocweaveError::TransactionNotStarted {
            document: self.id.to_string(),
        }
    }

    fn working_mut(&mut self) -> Result<&mut Working> {
        match self.working.as_mut() {
            Some(working) => Ok(working),
            None => Err(DocweaveError::TransactionNotStarted {
                document: self.id.to_string(),
            }),
        }
    }

    fn entities(&self) -> &BTreeMap<EntityId, Entity> {
        match &self.working {
            Some(working) => &working.entities,
            None => &self.committed,
        }
    }

    fn surviving_warnings(&mut self) -> Result<Vec<FailureRecord>> {
        Ok(self
            .failures()?
            .into_iter()
            .filter(|f| f.severity == Severity::Warning)
            .collect())
    }
}

impl DocumentStore for MemoryDocument {
    fn document_id(&self) -> &DocumentId {
        &self.id
    }

    fn start_transaction(&mut self, name: &str) -> Result<()> {
        if let Some(reason) = &self.lock {
            return Err(DocweaveError::TransactionRefused {
                document: self.id.to_string(),
                reason: reason.clone(),
            });
        }
        if let Some(open) = &self.working {
            return Err(DocweaveError::TransactionRefused {
                document: self.id.to_string(),
                reason: format!("transaction '{}' is already open", open.name),
            });
        }

        self.working = Some(Working {
            name: name.to_string(),
            entities: self.committed.clone(),
            savepoints: Vec::new(),
            ledger: FailureLedger::new(),
        });
        Ok(())
    }

    fn has_open_transaction(&self) -> bool {
        self.working.is_some()
    }

    fn begin_sub_transaction(&mut self) -> Result<()> {
        let working = self.working_mut()?;
        working.savepoints.push(working.entities.clone());
        working.ledger.mark();
        Ok(())
    }

    fn commit_sub_transaction(&mut self) -> Result<()> {
        let document = self.id.to_string();
        let working = self.working_mut()?;
        if working.savepoints.pop().is_none() {
            return Err(DocweaveError::NoSubTransaction { document });
        }
        working.ledger.release_mark();
        Ok(())
    }

    fn rollback_sub_transaction(&mut self) -> Result<()> {
        let document = self.id.to_string();
        let working = self.working_mut()?;
        let entities = working
            .savepoints
            .pop()
            .ok_or(DocweaveError::NoSubTransaction { document })?;
        working.entities = entities;
        working.ledger.restore_mark();
        Ok(())
    }

    fn failures(&mut self) -> Result<Vec<FailureRecord>> {
        let rules = &self.rules;
        match self.working.as_mut() {
            Some(working) => Ok(working.ledger.validate(rules, &working.entities)),
            None => Err(DocweaveError::TransactionNotStarted {
                document: self.id.to_string(),
            }),
        }
    }

    fn resolve_failure(&mut self, id: FailureId) -> Result<bool> {
        let rules = &self.rules;
        let working = match self.working.as_mut() {
            Some(working) => working,
            None => {
                return Err(DocweaveError::TransactionNotStarted {
                    document: self.id.to_string(),
                })
            }
        };
        let Some((source, record)) = working.ledger.begin_resolution(id) else {
            return Ok(false);
        };
        if !record.resolvable {
            return Ok(false);
        }

        match source {
            FailureSource::Rule(index) => {
                let Some(rule) = rules.get(index) else {
                    return Ok(false);
                };
                let updates = rule.resolve(&record.failing, &working.entities);
                if updates.is_empty() {
                    return Ok(false);
                }
                let count = updates.len() as u64;
                for entity in updates {
                    working.entities.insert(entity.id, entity);
                }
                self.mutations += count;
                Ok(true)
            }
            FailureSource::Posted => Ok(working.ledger.withdraw(&record)),
        }
    }

    fn dismiss_warnings(&mut self) -> Result<()> {
        self.working_mut()?.ledger.dismiss_warnings();
        Ok(())
    }

    fn post_failure(&mut self, failure: FailureDraft) -> Result<FailureId> {
        Ok(self.working_mut()?.ledger.post(failure))
    }

    fn commit_transaction(&mut self) -> Result<()> {
        let warnings = self.surviving_warnings()?;
        let working = self.working.take().ok_or_else(|| self.not_started())?;
        self.committed = working.entities;
        self.warnings = warnings;
        tracing::debug!(
            document_id = %self.id,
            transaction = %working.name,
            entity_count = self.committed.len(),
            warning_count = self.warnings.len(),
            "memory document committed"
        );
        Ok(())
    }

    fn rollback_transaction(&mut self) -> Result<()> {
        if let Some(working) = self.working.take() {
            tracing::debug!(
                document_id = %self.id,
                transaction = %working.name,
                "memory document rolled back"
            );
        }
        Ok(())
    }

    fn entity(&self, id: EntityId) -> Result<Option<Entity>> {
        Ok(self.entities().get(&id).cloned())
    }

    fn create_entity(&mut self, draft: EntityDraft) -> Result<EntityId> {
        if self.working.is_none() {
            return Err(self.not_started());
        }
        let id = self.allocate_id();
        let scope = self.active_scope.clone();
        let working = self.working_mut()?;
        working.entities.insert(
            id,
            Entity {
                id,
                kind: draft.kind,
                name: draft.name,
                scope,
                pinned: false,
                properties: draft.properties,
            },
        );
        self.mutations += 1;
        Ok(id)
    }

    fn update_entity(&mut self, entity: &Entity) -> Result<bool> {
        let document = self.id.to_string();
        let working = self.working_mut()?;
        let current = working
            .entities
            .get_mut(&entity.id)
            .ok_or(DocweaveError::EntityNotFound {
                document,
                entity: entity.id.0,
            })?;
        if current.name == entity.name && current.properties == entity.properties {
            return Ok(false);
        }
        current.name = entity.name.clone();
        current.properties = entity.properties.clone();
        self.mutations += 1;
        Ok(true)
    }

    fn delete_entity(&mut self, id: EntityId) -> Result<bool> {
        let working = self.working_mut()?;
        let removed = working.entities.remove(&id).is_some();
        if removed {
            self.mutations += 1;
        }
        Ok(removed)
    }

    fn set_pinned(&mut self, id: EntityId, pinned: bool) -> Result<()> {
        let document = self.id.to_string();
        let working = self.working_mut()?;
        let entity = working
            .entities
            .get_mut(&id)
            .ok_or(DocweaveError::EntityNotFound {
                document,
                entity: id.0,
            })?;
        if entity.pinned != pinned {
            entity.pinned = pinned;
            self.mutations += 1;
        }
        Ok(())
    }

    fn active_scope(&self) -> Option<ScopeId> {
        self.active_scope.clone()
    }

    fn entity_count(&self) -> Result<usize> {
        Ok(self.entities().len())
    }

    fn find_by_name(&self, kind: &str, name: &str) -> Result<Option<Entity>> {
        Ok(self
            .entities()
            .values()
            .find(|e| e.kind == kind && e.name.as_deref() == Some(name))
            .cloned())
    }

    fn warnings(&self) -> Result<Vec<FailureRecord>> {
        Ok(self.warnings.clone())
    }
}
