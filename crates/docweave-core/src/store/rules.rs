//! Pre-commit validation rules shared by the reference stores

use crate::model::{kinds, Entity, EntityId, FailureKind, Severity};
use std::collections::{BTreeMap, BTreeSet};

/// One issue found by a rule
#[derive(Debug, Clone, PartialEq)]
pub struct RuleViolation {
    pub severity: Severity,
    pub description: String,
    pub failing: Vec<EntityId>,
    pub resolvable: bool,
}

/// A check a store runs over its working state before commit
pub trait ValidationRule {
    fn kind(&self) -> FailureKind;

    fn check(&self, entities: &BTreeMap<EntityId, Entity>) -> Vec<RuleViolation>;

    /// Compute the entities to rewrite so that the violation over `failing`
    /// disappears. An empty result means the rule has no fix.
    fn resolve(&self, failing: &[EntityId], entities: &BTreeMap<EntityId, Entity>) -> Vec<Entity>;
}

/// Entities of the same kind must not share a name
///
/// Resolves by renaming every entity after the first (lowest id) to the
/// first free `"{name} (n)"`.
#[derive(Debug, Clone, Copy, Default)]
pub struct UniqueNameRule;

impl ValidationRule for UniqueNameRule {
    fn kind(&self) -> FailureKind {
        FailureKind::new(kinds::NAME_NOT_UNIQUE)
    }

    fn check(&self, entities: &BTreeMap<EntityId, Entity>) -> Vec<RuleViolation> {
        let mut groups: BTreeMap<(&str, &str), Vec<EntityId>> = BTreeMap::new();
        for entity in entities.values() {
            if let Some(name) = entity.name.as_deref() {
                groups
                    .entry((entity.kind.as_str(), name))
                    .or_default()
                    .push(entity.id);
            }
        }

        groups
            .into_iter()
            .filter(|(_, ids)| ids.len() > 1)
            .map(|((kind, name), ids)| RuleViolation {
                severity: Severity::Error,
                description: format!("{} {} entities share the name '{}'.", ids.len(), kind, name),
                failing: ids,
                resolvable: true,
            })
            .collect()
    }

    fn resolve(&self, failing: &[EntityId], entities: &BTreeMap<EntityId, Entity>) -> Vec<Entity> {
        let mut ids: Vec<EntityId> = failing
            .iter()
            .copied()
            .filter(|id| entities.contains_key(id))
            .collect();
        ids.sort();

        let Some(first) = ids.first().and_then(|id| entities.get(id)) else {
            return Vec::new();
        };
        let Some(base) = first.name.clone() else {
            return Vec::new();
        };

        let mut taken: BTreeSet<String> = entities
            .values()
            .filter(|e| e.kind == first.kind)
            .filter_map(|e| e.name.clone())
            .collect();

        let mut renamed = Vec::new();
        let mut suffix = 2;
        for id in ids.iter().skip(1) {
            let Some(entity) = entities.get(id) else {
                continue;
            };
            let mut candidate = format!("{} ({})", base, suffix);
            while taken.contains(&candidate) {
                suffix += 1;
                candidate = format!("{} ({})", base, suffix);
            }
            taken.insert(candidate.clone());
            suffix += 1;

            let mut updated = entity.clone();
            updated.name = Some(candidate);
            renamed.push(updated);
        }
        renamed
    }
}
