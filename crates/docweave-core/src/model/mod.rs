pub mod entity;
pub mod failure;

pub use entity::{DocumentId, Entity, EntityDraft, EntityId, EntityRef, Properties, ScopeId};
pub use failure::{kinds, FailureDraft, FailureId, FailureKind, FailureRecord, Severity};
