//! Previous-Structure persistence
//!
//! A node's Previous-Structure is stored as canonical JSON with its SHA-256
//! digest. Loading recomputes the digest and refuses a row that no longer
//! matches, so a hand-edited structure never drives deletions.

use crate::errors::{digest_mismatch, from_rusqlite, invalid_json, Result};
use crate::migrations::compute_checksum;
use chrono::{DateTime, Utc};
use docweave_core::errors::DocweaveError;
use docweave_core::PreviousStructure;
use rusqlite::{params, Connection, OptionalExtension};

#[derive(Debug, Clone, PartialEq)]
pub struct StoredStructure {
    pub structure: PreviousStructure,
    pub digest: String,
    pub saved_at: DateTime<Utc>,
}

/// Save `structure` for `owner`, replacing any earlier one. Returns the
/// digest.
///
/// # Errors
///
/// `Serialization` if the structure cannot be encoded, `Persistence` on
/// database errors.
pub fn save_structure(
    conn: &Connection,
    owner: &str,
    structure: &PreviousStructure,
) -> Result<String> {
    let json = serde_json::to_string(structure)?;
    let digest = compute_checksum(&json);
    conn.execute(
        "INSERT INTO previous_structures (owner, structure_json, digest, saved_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(owner) DO UPDATE SET
            structure_json = excluded.structure_json,
            digest = excluded.digest,
            saved_at = excluded.saved_at",
        params![owner, json, digest, Utc::now().to_rfc3339()],
    )
    .map_err(from_rusqlite)?;

    tracing::debug!(owner, digest = %digest, slots = structure.len(), "structure saved");
    Ok(digest)
}

/// Load the structure saved for `owner`, if any.
///
/// # Errors
///
/// `Persistence` when the stored digest does not match the stored JSON,
/// `Serialization` when the row cannot be decoded.
pub fn load_structure(conn: &Connection, owner: &str) -> Result<Option<StoredStructure>> {
    let row: Option<(String, String, String)> = conn
        .query_row(
            "SELECT structure_json, digest, saved_at FROM previous_structures WHERE owner = ?1",
            [owner],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()
        .map_err(from_rusqlite)?;
    let Some((json, digest, saved_at)) = row else {
        return Ok(None);
    };

    let actual = compute_checksum(&json);
    if actual != digest {
        return Err(digest_mismatch(owner, &digest, &actual));
    }

    let structure: PreviousStructure = serde_json::from_str(&json)
        .map_err(|e| invalid_json("previous_structures.structure_json", e))?;
    let saved_at = DateTime::parse_from_rfc3339(&saved_at)
        .map_err(|e| DocweaveError::Serialization {
            message: format!("invalid timestamp '{}': {}", saved_at, e),
        })?
        .with_timezone(&Utc);

    Ok(Some(StoredStructure {
        structure,
        digest,
        saved_at,
    }))
}

/// Forget the structure saved for `owner`. Returns whether one existed.
///
/// # Errors
///
/// `Persistence` on database errors.
pub fn delete_structure(conn: &Connection, owner: &str) -> Result<bool> {
    let deleted = conn
        .execute("DELETE FROM previous_structures WHERE owner = ?1", [owner])
        .map_err(from_rusqlite)?;
    Ok(deleted > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::apply_migrations;
    use docweave_core::model::{DocumentId, EntityId, EntityRef};

    fn conn() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        apply_migrations(&mut conn).unwrap();
        conn
    }

    fn structure() -> PreviousStructure {
        PreviousStructure::from_slots(vec![
            Some(EntityRef::new(DocumentId::new("a"), EntityId(3))),
            None,
            Some(EntityRef::new(DocumentId::new("b"), EntityId(9))),
        ])
    }

    #[test]
    fn test_missing_structure_is_none() {
        assert!(load_structure(&conn(), "node-1").unwrap().is_none());
    }

    #[test]
    fn test_saved_structure_loads_back() {
        let conn = conn();
        let digest = save_structure(&conn, "node-1", &structure()).unwrap();

        let stored = load_structure(&conn, "node-1").unwrap().unwrap();
        assert_eq!(stored.structure, structure());
        assert_eq!(stored.digest, digest);
    }

    #[test]
    fn test_save_replaces_previous() {
        let conn = conn();
        save_structure(&conn, "node-1", &structure()).unwrap();
        save_structure(&conn, "node-1", &PreviousStructure::new()).unwrap();

        let stored = load_structure(&conn, "node-1").unwrap().unwrap();
        assert!(stored.structure.is_empty());
    }

    #[test]
    fn test_tampered_structure_is_rejected() {
        let conn = conn();
        save_structure(&conn, "node-1", &structure()).unwrap();
        conn.execute(
            "UPDATE previous_structures SET structure_json = '{\"slots\":[]}'
             WHERE owner = 'node-1'",
            [],
        )
        .unwrap();

        let err = load_structure(&conn, "node-1").unwrap_err();
        assert!(err.to_string().contains("Digest mismatch"));
    }

    #[test]
    fn test_delete_structure() {
        let conn = conn();
        save_structure(&conn, "node-1", &structure()).unwrap();
        assert!(delete_structure(&conn, "node-1").unwrap());
        assert!(!delete_structure(&conn, "node-1").unwrap());
    }
}
