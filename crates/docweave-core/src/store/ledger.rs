//! Failure bookkeeping for one open transaction
//!
//! Shared by the reference stores: collects rule violations and posted
//! failures into numbered records, remembers which signatures were already
//! handed to the fixer, and which warnings were dismissed.

use super::rules::ValidationRule;
use crate::model::{Entity, EntityId, FailureDraft, FailureId, FailureKind, FailureRecord, Severity};
use std::collections::{BTreeMap, HashSet};

type Signature = (FailureKind, Vec<EntityId>);

/// Where a failure of the last pass came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureSource {
    /// Index into the store's rule list
    Rule(usize),
    Posted,
}

#[derive(Debug, Default)]
pub struct FailureLedger {
    posted: Vec<FailureDraft>,
    marks: Vec<Vec<FailureDraft>>,
    attempted: HashSet<Signature>,
    dismissed: HashSet<Signature>,
    last_pass: BTreeMap<FailureId, (FailureSource, FailureRecord)>,
}

impl FailureLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn post(&mut self, failure: FailureDraft) -> FailureId {
        self.posted.push(failure);
        FailureId(self.posted.len() as u32)
    }

    /// Remember the posted failures at a savepoint
    pub fn mark(&mut self) {
        self.marks.push(self.posted.clone());
    }

    /// Forget the innermost mark. Returns false when there is none.
    pub fn release_mark(&mut self) -> bool {
        self.marks.pop().is_some()
    }

    /// Restore posted failures to the innermost mark. Returns false when
    /// there is none.
    pub fn restore_mark(&mut self) -> bool {
        match self.marks.pop() {
            Some(posted) => {
                self.posted = posted;
                true
            }
            None => false,
        }
    }

    /// Run every rule over `entities`, append posted failures, and number
    /// the result. Dismissed warnings are skipped.
    pub fn validate(
        &mut self,
        rules: &[Box<dyn ValidationRule>],
        entities: &BTreeMap<EntityId, Entity>,
    ) -> Vec<FailureRecord> {
        let mut raised: Vec<(FailureSource, FailureDraft)> = Vec::new();
        for (index, rule) in rules.iter().enumerate() {
            for violation in rule.check(entities) {
                raised.push((
                    FailureSource::Rule(index),
                    FailureDraft {
                        kind: rule.kind(),
                        severity: violation.severity,
                        description: Some(violation.description),
                        failing: violation.failing,
                        resolvable: violation.resolvable,
                    },
                ));
            }
        }
        raised.extend(self.posted.iter().cloned().map(|p| (FailureSource::Posted, p)));

        self.last_pass.clear();
        let mut records = Vec::new();
        for (source, draft) in raised {
            let signature = (draft.kind.clone(), draft.failing.clone());
            if draft.severity == Severity::Warning && self.dismissed.contains(&signature) {
                continue;
            }
            let record = FailureRecord {
                id: FailureId(records.len() as u32 + 1),
                kind: draft.kind,
                severity: draft.severity,
                description: draft.description,
                failing: draft.failing,
                resolution_attempted: self.attempted.contains(&signature),
                resolvable: draft.resolvable,
            };
            self.last_pass.insert(record.id, (source, record.clone()));
            records.push(record);
        }
        records
    }

    /// Look up a failure of the last pass for fixing and mark its signature
    /// attempted. `None` when the id is unknown.
    pub fn begin_resolution(&mut self, id: FailureId) -> Option<(FailureSource, FailureRecord)> {
        let (source, record) = self.last_pass.get(&id).cloned()?;
        self.attempted.insert(record.signature());
        Some((source, record))
    }

    /// Withdraw posted failures matching `record`. Returns whether any was
    /// removed.
    pub fn withdraw(&mut self, record: &FailureRecord) -> bool {
        let before = self.posted.len();
        self.posted
            .retain(|p| !(p.kind == record.kind && p.failing == record.failing));
        self.posted.len() < before
    }

    pub fn dismiss_warnings(&mut self) {
        let dismissed: Vec<Signature> = self
            .last_pass
            .values()
            .filter(|(_, record)| record.severity == Severity::Warning)
            .map(|(_, record)| record.signature())
            .collect();
        self.dismissed.extend(dismissed);
        self.posted.retain(|p| p.severity != Severity::Warning);
    }
}
