//! Failure resolution.
//!
//! Decides, from the failures a store raised during one validation pass,
//! whether the commit continues, retries after a fix, or rolls back. The
//! resolver never talks to the store: it returns a [`ResolutionPlan`] the
//! transaction manager carries out.
//!
//! Only one failure kind is fixed per pass. After a fix the store
//! re-validates, so two independent fixes never interact inside one pass.

use crate::diagnostics::{Diagnostic, DiagnosticLevel};
use crate::model::{DocumentId, FailureKind, FailureRecord, Severity};
use crate::policy::FailureProcessingMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionDecision {
    /// Let the store carry on with its normal commit
    Continue,
    /// A fix was applied; validate again
    ProceedWithCommit,
    /// Discard the batch
    ProceedWithRollback,
}

/// What the transaction manager should do with one validation pass
#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionPlan {
    pub decision: ResolutionDecision,
    /// Failures to hand to the store's fixer, each reported with its outcome
    pub fixes: Vec<FailureRecord>,
    /// Failures to report as they stand
    pub report: Vec<FailureRecord>,
    /// Drop Warning-level failures so they do not block the commit
    pub dismiss_warnings: bool,
}

impl ResolutionPlan {
    fn decide(decision: ResolutionDecision) -> Self {
        Self {
            decision,
            fixes: Vec::new(),
            report: Vec::new(),
            dismiss_warnings: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FailureResolver {
    handled_kinds: Vec<FailureKind>,
    mode: FailureProcessingMode,
}

impl FailureResolver {
    /// `handled_kinds` are tried first, in the given order
    pub fn new(handled_kinds: Vec<FailureKind>, mode: FailureProcessingMode) -> Self {
        Self {
            handled_kinds,
            mode,
        }
    }

    pub fn mode(&self) -> FailureProcessingMode {
        self.mode
    }

    pub fn handled_kinds(&self) -> &[FailureKind] {
        &self.handled_kinds
    }

    /// Plan the handling of one validation pass.
    ///
    /// 1. DocumentCorruption: report everything and roll back, no fix.
    /// 2. Error: fix the first kind (declared kinds, then observed kinds in
    ///    raised order) that has resolvable failures not yet attempted.
    /// 3. Otherwise report every failure and dismiss warnings.
    /// 4. Roll back if an Error remains, else continue.
    ///
    /// Fixing is skipped unless the mode allows it. `WaitForUserInput`
    /// keeps warnings and leaves the Error decision to the store.
    pub fn resolve(&self, failures: &[FailureRecord]) -> ResolutionPlan {
        let Some(severity) = failures.iter().map(|f| f.severity).max() else {
            return ResolutionPlan::decide(ResolutionDecision::Continue);
        };
        let reportable = || -> Vec<FailureRecord> {
            failures
                .iter()
                .filter(|f| !f.kind.is_simulated_transaction())
                .cloned()
                .collect()
        };

        if severity >= Severity::DocumentCorruption {
            let mut plan = ResolutionPlan::decide(ResolutionDecision::ProceedWithRollback);
            plan.report = reportable();
            return plan;
        }

        if severity >= Severity::Error && self.mode.allows_auto_fix() {
            for kind in self.kinds_in_priority_order(failures) {
                let fixes: Vec<FailureRecord> = failures
                    .iter()
                    .filter(|f| f.kind == kind && f.resolvable && !f.resolution_attempted)
                    .cloned()
                    .collect();
                if !fixes.is_empty() {
                    let mut plan = ResolutionPlan::decide(ResolutionDecision::ProceedWithCommit);
                    plan.fixes = fixes;
                    return plan;
                }
            }
        }

        let waiting = self.mode == FailureProcessingMode::WaitForUserInput;
        let decision = if severity >= Severity::Error && !waiting {
            ResolutionDecision::ProceedWithRollback
        } else {
            ResolutionDecision::Continue
        };
        ResolutionPlan {
            decision,
            fixes: Vec::new(),
            report: reportable(),
            dismiss_warnings: !waiting,
        }
    }

    fn kinds_in_priority_order(&self, failures: &[FailureRecord]) -> Vec<FailureKind> {
        let mut kinds: Vec<FailureKind> = Vec::new();
        let declared = self.handled_kinds.iter();
        let observed = failures.iter().map(|f| &f.kind);
        for kind in declared.chain(observed) {
            if !kinds.contains(kind) {
                kinds.push(kind.clone());
            }
        }
        kinds
    }
}

/// Render a failure for the user.
///
/// `solved` is the outcome of a fix attempt, or `None` when the failure is
/// only being reported. Simulated-transaction failures are never shown.
pub fn failure_diagnostic(
    document: &DocumentId,
    failure: &FailureRecord,
    solved: Option<bool>,
) -> Option<Diagnostic> {
    if failure.kind.is_simulated_transaction() {
        return None;
    }

    let marker = match (failure.severity > Severity::Warning, solved) {
        (false, _) => "",
        (true, Some(true)) => "✔ ",
        (true, _) => "❌ ",
    };
    let mut text = format!("{}{}", marker, failure.display_description());
    if !failure.failing.is_empty() {
        let ids: Vec<String> = failure.failing.iter().map(|id| id.to_string()).collect();
        text.push_str(&format!(" {{{}}}", ids.join(", ")));
    }

    Some(
        Diagnostic::new(DiagnosticLevel::from(failure.severity), text)
            .with_entities(document.clone(), failure.failing.clone()),
    )
}
