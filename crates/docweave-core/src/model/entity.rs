use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Authored metadata carried by an entity
pub type Properties = BTreeMap<String, serde_json::Value>;

/// Identity of an external document handle
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Store-assigned identity token
///
/// Stable for the lifetime of the entity and never reused by the store once
/// the entity is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub u64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A (document, identity-token) pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub document: DocumentId,
    pub id: EntityId,
}

impl EntityRef {
    pub fn new(document: DocumentId, id: EntityId) -> Self {
        Self { document, id }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.document, self.id)
    }
}

/// Contextual placement of an entity inside a document (an alternate or
/// design-option scope). `None` means the main model.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopeId(String);

impl ScopeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A persistent entity as seen through the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub kind: String,
    pub name: Option<String>,
    pub scope: Option<ScopeId>,
    /// Pinned entities are owned by the reconcile loop; unpinned ones were
    /// released by the user.
    pub pinned: bool,
    pub properties: Properties,
}

impl Entity {
    pub fn property(&self, key: &str) -> Option<&serde_json::Value> {
        self.properties.get(key)
    }
}

/// Everything needed to create an entity; the store assigns the id and
/// places it in the active scope.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityDraft {
    pub kind: String,
    pub name: Option<String>,
    pub properties: Properties,
}

impl EntityDraft {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }
}
