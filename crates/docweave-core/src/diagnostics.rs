//! User-visible diagnostics
//!
//! Every issue that reaches the user travels as a [`Diagnostic`]: a level, a
//! line of text, and optionally the entities it concerns so the host can
//! highlight them.

use crate::model::{DocumentId, EntityId, Severity};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticLevel {
    Remark,
    Warning,
    Error,
}

impl From<Severity> for DiagnosticLevel {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Warning => DiagnosticLevel::Warning,
            Severity::Error | Severity::DocumentCorruption => DiagnosticLevel::Error,
        }
    }
}

/// Axis-aligned bounding region used for highlighting
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub min: [f64; 3],
    pub max: [f64; 3],
}

impl Region {
    /// Smallest region covering both
    pub fn union(&self, other: &Region) -> Region {
        let mut min = self.min;
        let mut max = self.max;
        for axis in 0..3 {
            min[axis] = min[axis].min(other.min[axis]);
            max[axis] = max[axis].max(other.max[axis]);
        }
        Region { min, max }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub text: String,
    pub document: Option<DocumentId>,
    pub entities: Vec<EntityId>,
    pub region: Option<Region>,
}

impl Diagnostic {
    pub fn new(level: DiagnosticLevel, text: impl Into<String>) -> Self {
        Self {
            level,
            text: text.into(),
            document: None,
            entities: Vec::new(),
            region: None,
        }
    }

    pub fn remark(text: impl Into<String>) -> Self {
        Self::new(DiagnosticLevel::Remark, text)
    }

    pub fn warning(text: impl Into<String>) -> Self {
        Self::new(DiagnosticLevel::Warning, text)
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::new(DiagnosticLevel::Error, text)
    }

    /// Attach the entities this diagnostic is about
    pub fn with_entities(mut self, document: DocumentId, entities: Vec<EntityId>) -> Self {
        self.document = Some(document);
        self.entities = entities;
        self
    }

    pub fn with_region(mut self, region: Region) -> Self {
        self.region = Some(region);
        self
    }

    pub fn is_entity_scoped(&self) -> bool {
        !self.entities.is_empty()
    }
}

/// Highest level among `diagnostics`, if any
pub fn max_level<'a>(
    diagnostics: impl IntoIterator<Item = &'a Diagnostic>,
) -> Option<DiagnosticLevel> {
    diagnostics.into_iter().map(|d| d.level).max()
}
