//! SQLite-backed document
//!
//! One connection per document. A docweave transaction maps onto a SQLite
//! transaction (`BEGIN IMMEDIATE`), sub-transactions onto named savepoints.
//! Validation runs over the rows visible inside the open transaction;
//! posted failures and fix bookkeeping live in memory next to it.

use crate::db;
use crate::errors::{from_rusqlite, invalid_json, Result};
use crate::migrations::apply_migrations;
use docweave_core::errors::DocweaveError;
use docweave_core::model::{
    DocumentId, Entity, EntityDraft, EntityId, FailureDraft, FailureId, FailureKind,
    FailureRecord, Properties, ScopeId, Severity,
};
use docweave_core::store::{DocumentStore, FailureLedger, FailureSource, ValidationRule};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;
use std::path::Path;

const ENTITY_COLUMNS: &str = "id, kind, name, scope, pinned, properties";

struct EntityRow {
    id: i64,
    kind: String,
    name: Option<String>,
    scope: Option<String>,
    pinned: bool,
    properties: String,
}

impl EntityRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            kind: row.get(1)?,
            name: row.get(2)?,
            scope: row.get(3)?,
            pinned: row.get(4)?,
            properties: row.get(5)?,
        })
    }

    fn into_entity(self) -> Result<Entity> {
        let properties: Properties = serde_json::from_str(&self.properties)
            .map_err(|e| invalid_json("entities.properties", e))?;
        Ok(Entity {
            id: EntityId(self.id as u64),
            kind: self.kind,
            name: self.name,
            scope: self.scope.map(ScopeId::new),
            pinned: self.pinned,
            properties,
        })
    }
}

struct OpenTransaction {
    name: String,
    savepoints: usize,
    ledger: FailureLedger,
}

pub struct SqliteDocument {
    id: DocumentId,
    conn: Connection,
    transaction: Option<OpenTransaction>,
    next_entity: u64,
    lock: Option<String>,
    active_scope: Option<ScopeId>,
    rules: Vec<Box<dyn ValidationRule>>,
    mutations: u64,
}

impl SqliteDocument {
    /// Open (or create) the document database at `path` and migrate it.
    ///
    /// # Errors
    ///
    /// `Persistence` if the file cannot be opened or a migration fails.
    pub fn open<P: AsRef<Path>>(id: impl Into<String>, path: P) -> Result<Self> {
        let mut conn = db::open(path)?;
        db::configure(&conn)?;
        apply_migrations(&mut conn)?;
        Self::from_connection(id, conn)
    }

    /// A migrated in-memory document
    ///
    /// # Errors
    ///
    /// `Persistence` if a migration fails.
    pub fn open_in_memory(id: impl Into<String>) -> Result<Self> {
        let mut conn = db::open_in_memory()?;
        apply_migrations(&mut conn)?;
        Self::from_connection(id, conn)
    }

    /// Wrap an already migrated connection.
    ///
    /// # Errors
    ///
    /// `Persistence` if the entity table cannot be read.
    pub fn from_connection(id: impl Into<String>, conn: Connection) -> Result<Self> {
        // Ids handed out by a rolled-back transaction never reach the table,
        // so the counter also starts past the AUTOINCREMENT high-water mark.
        let max_id: i64 = conn
            .query_row("SELECT COALESCE(MAX(id), 0) FROM entities", [], |row| row.get(0))
            .map_err(from_rusqlite)?;
        let sequence: i64 = conn
            .query_row(
                "SELECT COALESCE((SELECT seq FROM sqlite_sequence WHERE name = 'entities'), 0)",
                [],
                |row| row.get(0),
            )
            .map_err(from_rusqlite)?;

        Ok(Self {
            id: DocumentId::new(id),
            conn,
            transaction: None,
            next_entity: max_id.max(sequence) as u64 + 1,
            lock: None,
            active_scope: None,
            rules: Vec::new(),
            mutations: 0,
        })
    }

    pub fn with_rule(mut self, rule: impl ValidationRule + 'static) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    /// Refuse transactions until [`unlock`](Self::unlock)
    pub fn lock_for_editing(&mut self, reason: impl Into<String>) {
        self.lock = Some(reason.into());
    }

    pub fn unlock(&mut self) {
        self.lock = None;
    }

    pub fn set_active_scope(&mut self, scope: Option<ScopeId>) {
        self.active_scope = scope;
    }

    /// Count of effective row writes since the document was opened,
    /// including rolled-back ones.
    pub fn mutation_count(&self) -> u64 {
        self.mutations
    }

    pub fn transaction_name(&self) -> Option<&str> {
        self.transaction.as_ref().map(|t| t.name.as_str())
    }

    /// The underlying connection, e.g. for [`crate::save_structure`]
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn open_mut(&mut self) -> Result<&mut OpenTransaction> {
        match self.transaction.as_mut() {
            Some(open) => Ok(open),
            None => Err(DocweaveError::TransactionNotStarted {
                document: self.id.to_string(),
            }),
        }
    }

    fn require_open(&self) -> Result<()> {
        if self.transaction.is_none() {
            return Err(DocweaveError::TransactionNotStarted {
                document: self.id.to_string(),
            });
        }
        Ok(())
    }

    fn not_found(&self, id: EntityId) -> DocweaveError {
        DocweaveError::EntityNotFound {
            document: self.id.to_string(),
            entity: id.0,
        }
    }

    fn load_all(&self) -> Result<BTreeMap<EntityId, Entity>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {} FROM entities ORDER BY id", ENTITY_COLUMNS))
            .map_err(from_rusqlite)?;
        let rows = stmt
            .query_map([], EntityRow::read)
            .map_err(from_rusqlite)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(from_rusqlite)?;

        let mut entities = BTreeMap::new();
        for row in rows {
            let entity = row.into_entity()?;
            entities.insert(entity.id, entity);
        }
        Ok(entities)
    }

    fn write_entity(&mut self, entity: &Entity) -> Result<()> {
        let properties = serde_json::to_string(&entity.properties)?;
        self.conn
            .execute(
                "UPDATE entities SET name = ?1, properties = ?2 WHERE id = ?3",
                params![entity.name, properties, entity.id.0 as i64],
            )
            .map_err(from_rusqlite)?;
        self.mutations += 1;
        Ok(())
    }

    fn store_warnings(&self, warnings: &[FailureRecord]) -> Result<()> {
        self.conn
            .execute("DELETE FROM document_warnings", [])
            .map_err(from_rusqlite)?;
        for warning in warnings {
            let failing = serde_json::to_string(&warning.failing)?;
            self.conn
                .execute(
                    "INSERT INTO document_warnings (kind, description, failing)
                     VALUES (?1, ?2, ?3)",
                    params![warning.kind.as_str(), warning.description, failing],
                )
                .map_err(from_rusqlite)?;
        }
        Ok(())
    }
}

impl DocumentStore for SqliteDocument {
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
        if let Some(open) = &self.transaction {
            return Err(DocweaveError::TransactionRefused {
                document: self.id.to_string(),
                reason: format!("transaction '{}' is already open", open.name),
            });
        }

        self.conn
            .execute_batch("BEGIN IMMEDIATE")
            .map_err(|e| DocweaveError::TransactionRefused {
                document: self.id.to_string(),
                reason: e.to_string(),
            })?;
        self.transaction = Some(OpenTransaction {
            name: name.to_string(),
            savepoints: 0,
            ledger: FailureLedger::new(),
        });
        Ok(())
    }

    fn has_open_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    fn begin_sub_transaction(&mut self) -> Result<()> {
        let depth = self.open_mut()?.savepoints + 1;
        self.conn
            .execute_batch(&format!("SAVEPOINT sp_{}", depth))
            .map_err(from_rusqlite)?;
        let open = self.open_mut()?;
        open.savepoints = depth;
        open.ledger.mark();
        Ok(())
    }

    fn commit_sub_transaction(&mut self) -> Result<()> {
        let depth = self.open_mut()?.savepoints;
        if depth == 0 {
            return Err(DocweaveError::NoSubTransaction {
                document: self.id.to_string(),
            });
        }
        self.conn
            .execute_batch(&format!("RELEASE SAVEPOINT sp_{}", depth))
            .map_err(from_rusqlite)?;
        let open = self.open_mut()?;
        open.savepoints = depth - 1;
        open.ledger.release_mark();
        Ok(())
    }

    fn rollback_sub_transaction(&mut self) -> Result<()> {
        let depth = self.open_mut()?.savepoints;
        if depth == 0 {
            return Err(DocweaveError::NoSubTransaction {
                document: self.id.to_string(),
            });
        }
        self.conn
            .execute_batch(&format!(
                "ROLLBACK TO SAVEPOINT sp_{depth}; RELEASE SAVEPOINT sp_{depth}"
            ))
            .map_err(from_rusqlite)?;
        let open = self.open_mut()?;
        open.savepoints = depth - 1;
        open.ledger.restore_mark();
        Ok(())
    }

    fn failures(&mut self) -> Result<Vec<FailureRecord>> {
        self.require_open()?;
        let entities = self.load_all()?;
        let rules = &self.rules;
        let open = match self.transaction.as_mut() {
            Some(open) => open,
            None => {
                return Err(DocweaveError::TransactionNotStarted {
                    document: self.id.to_string(),
                })
            }
        };
        Ok(open.ledger.validate(rules, &entities))
    }

    fn resolve_failure(&mut self, id: FailureId) -> Result<bool> {
        let Some((source, record)) = self.open_mut()?.ledger.begin_resolution(id) else {
            return Ok(false);
        };
        if !record.resolvable {
            return Ok(false);
        }

        match source {
            FailureSource::Rule(index) => {
                let entities = self.load_all()?;
                let updates = match self.rules.get(index) {
                    Some(rule) => rule.resolve(&record.failing, &entities),
                    None => return Ok(false),
                };
                if updates.is_empty() {
                    return Ok(false);
                }
                for entity in &updates {
                    self.write_entity(entity)?;
                }
                Ok(true)
            }
            FailureSource::Posted => Ok(self.open_mut()?.ledger.withdraw(&record)),
        }
    }

    fn dismiss_warnings(&mut self) -> Result<()> {
        self.open_mut()?.ledger.dismiss_warnings();
        Ok(())
    }

    fn post_failure(&mut self, failure: FailureDraft) -> Result<FailureId> {
        Ok(self.open_mut()?.ledger.post(failure))
    }

    fn commit_transaction(&mut self) -> Result<()> {
        let warnings: Vec<FailureRecord> = self
            .failures()?
            .into_iter()
            .filter(|f| f.severity == Severity::Warning)
            .collect();
        self.store_warnings(&warnings)?;
        self.conn.execute_batch("COMMIT").map_err(from_rusqlite)?;

        if let Some(open) = self.transaction.take() {
            tracing::debug!(
                document_id = %self.id,
                transaction = %open.name,
                warning_count = warnings.len(),
                "sqlite document committed"
            );
        }
        Ok(())
    }

    fn rollback_transaction(&mut self) -> Result<()> {
        let Some(open) = self.transaction.take() else {
            return Ok(());
        };
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("ROLLBACK").map_err(from_rusqlite)?;
        }
        tracing::debug!(
            document_id = %self.id,
            transaction = %open.name,
            "sqlite document rolled back"
        );
        Ok(())
    }

    fn entity(&self, id: EntityId) -> Result<Option<Entity>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {} FROM entities WHERE id = ?1", ENTITY_COLUMNS),
                [id.0 as i64],
                EntityRow::read,
            )
            .optional()
            .map_err(from_rusqlite)?;
        row.map(EntityRow::into_entity).transpose()
    }

    fn create_entity(&mut self, draft: EntityDraft) -> Result<EntityId> {
        self.require_open()?;
        let id = EntityId(self.next_entity);
        let properties = serde_json::to_string(&draft.properties)?;
        self.conn
            .execute(
                "INSERT INTO entities (id, kind, name, scope, pinned, properties)
                 VALUES (?1, ?2, ?3, ?4, 0, ?5)",
                params![
                    id.0 as i64,
                    draft.kind,
                    draft.name,
                    self.active_scope.as_ref().map(ScopeId::as_str),
                    properties
                ],
            )
            .map_err(from_rusqlite)?;
        self.next_entity += 1;
        self.mutations += 1;
        Ok(id)
    }

    fn update_entity(&mut self, entity: &Entity) -> Result<bool> {
        self.require_open()?;
        let current = self.entity(entity.id)?.ok_or_else(|| self.not_found(entity.id))?;
        if current.name == entity.name && current.properties == entity.properties {
            return Ok(false);
        }
        self.write_entity(entity)?;
        Ok(true)
    }

    fn delete_entity(&mut self, id: EntityId) -> Result<bool> {
        self.require_open()?;
        let deleted = self
            .conn
            .execute("DELETE FROM entities WHERE id = ?1", [id.0 as i64])
            .map_err(from_rusqlite)?;
        if deleted > 0 {
            self.mutations += 1;
        }
        Ok(deleted > 0)
    }

    fn set_pinned(&mut self, id: EntityId, pinned: bool) -> Result<()> {
        self.require_open()?;
        let current = self.entity(id)?.ok_or_else(|| self.not_found(id))?;
        if current.pinned == pinned {
            return Ok(());
        }
        self.conn
            .execute(
                "UPDATE entities SET pinned = ?1 WHERE id = ?2",
                params![pinned, id.0 as i64],
            )
            .map_err(from_rusqlite)?;
        self.mutations += 1;
        Ok(())
    }

    fn active_scope(&self) -> Option<ScopeId> {
        self.active_scope.clone()
    }

    fn entity_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM entities", [], |row| row.get(0))
            .map_err(from_rusqlite)?;
        Ok(count as usize)
    }

    fn find_by_name(&self, kind: &str, name: &str) -> Result<Option<Entity>> {
        let row = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM entities WHERE kind = ?1 AND name = ?2 ORDER BY id LIMIT 1",
                    ENTITY_COLUMNS
                ),
                [kind, name],
                EntityRow::read,
            )
            .optional()
            .map_err(from_rusqlite)?;
        row.map(EntityRow::into_entity).transpose()
    }

    fn warnings(&self) -> Result<Vec<FailureRecord>> {
        let mut stmt = self
            .conn
            .prepare("SELECT kind, description, failing FROM document_warnings ORDER BY id")
            .map_err(from_rusqlite)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(from_rusqlite)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(from_rusqlite)?;

        rows.into_iter()
            .enumerate()
            .map(|(i, (kind, description, failing))| {
                let failing: Vec<EntityId> = serde_json::from_str(&failing)
                    .map_err(|e| invalid_json("document_warnings.failing", e))?;
                Ok(FailureRecord {
                    id: FailureId(i as u32 + 1),
                    kind: FailureKind::new(kind),
                    severity: Severity::Warning,
                    description,
                    failing,
                    resolution_attempted: false,
                    resolvable: false,
                })
            })
            .collect()
    }
}
