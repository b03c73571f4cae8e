//! The triage pipeline: classify findings and emit fix-tasks.
//!
//! For each finding awaiting triage, the pipeline resolves the triage
//! handler for the finding's domain. When no handler is registered (or a
//! handler fails, or a SUPPRESS arrives without its required rationale) the
//! configured default policy applies: FIX for severities at or above the
//! policy floor, ACCEPT otherwise. The fallback is explicit and logged,
//! never silent.
//!
//! Findings are processed in a stable order — source, then severity
//! descending, then file path — so triage output and fix-task numbering are
//! deterministic for identical input sets. FIX decisions targeting the same
//! file within one iteration coalesce into a single fix-task.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::TriagePolicy;
use crate::model::TaskBoard;
use crate::registry::ExtensionRegistry;
use crate::triage::finding::{Finding, FindingId, FindingStatus, TriageDecision, TriageOutcome};

/// Result of one triage run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriageReport {
    /// Numbers of the fix-tasks created, in creation order.
    pub fix_tasks: Vec<u32>,
    /// Findings routed to FIX (may exceed `fix_tasks.len()` after coalescing).
    pub fixed: usize,
    pub suppressed: usize,
    pub accepted: usize,
}

impl TriageReport {
    /// Check if this run produced any fix-tasks (and so phase 6 must loop
    /// back to phase 5).
    pub fn has_fix_tasks(&self) -> bool {
        !self.fix_tasks.is_empty()
    }

    /// Total findings classified in this run.
    pub fn total(&self) -> usize {
        self.fixed + self.suppressed + self.accepted
    }
}

/// A recorded suppression, used to emit suppression annotations during
/// finalize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuppressionAnnotation {
    pub finding: FindingId,
    pub rule: String,
    pub file: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    pub rationale: String,
}

/// Classifies findings via domain triagers and emits fix-tasks.
pub struct TriagePipeline {
    registry: Arc<ExtensionRegistry>,
    policy: TriagePolicy,
}

impl TriagePipeline {
    pub fn new(registry: Arc<ExtensionRegistry>, policy: TriagePolicy) -> Self {
        Self { registry, policy }
    }

    /// Triage every finding still awaiting a decision, mutating the findings
    /// in place and appending fix-tasks to the board.
    pub fn run(&self, findings: &mut [Finding], board: &mut TaskBoard) -> TriageReport {
        let order = Self::processing_order(findings);
        let mut report = TriageReport::default();
        // FIX groups keyed by target file, in first-appearance order
        let mut fix_groups: Vec<(String, Vec<usize>)> = Vec::new();

        for idx in order {
            let outcome = self.classify(&findings[idx]);
            let finding = &mut findings[idx];
            finding.decision = Some(outcome.decision);
            finding.rationale = outcome.rationale;
            finding.status = FindingStatus::Triaged;
            tracing::debug!(
                finding = %finding.id,
                rule = %finding.rule,
                decision = %outcome.decision,
                "finding triaged"
            );

            match outcome.decision {
                TriageDecision::Fix => {
                    report.fixed += 1;
                    let file = finding.file.clone();
                    match fix_groups.iter_mut().find(|(f, _)| *f == file) {
                        Some((_, group)) => group.push(idx),
                        None => fix_groups.push((file, vec![idx])),
                    }
                }
                TriageDecision::Suppress => {
                    report.suppressed += 1;
                    finding.status = FindingStatus::Suppressed;
                }
                TriageDecision::Accept => {
                    report.accepted += 1;
                    finding.status = FindingStatus::Accepted;
                }
            }
        }

        for (file, group) in fix_groups {
            let members: Vec<&Finding> = group.iter().map(|&i| &findings[i]).collect();
            let number = board.add_fix_task(&members);
            tracing::info!(
                file = %file,
                task = number,
                findings = group.len(),
                "fix-task created"
            );
            for &idx in &group {
                findings[idx].status = FindingStatus::FixTaskCreated;
                findings[idx].fix_task = Some(number);
            }
            report.fix_tasks.push(number);
        }

        report
    }

    /// Stable processing order: source, then severity descending, then file
    /// path. Indexes into `findings`, restricted to those awaiting triage.
    fn processing_order(findings: &[Finding]) -> Vec<usize> {
        let mut order: Vec<usize> = findings
            .iter()
            .enumerate()
            .filter(|(_, f)| f.needs_triage())
            .map(|(i, _)| i)
            .collect();
        order.sort_by(|&a, &b| {
            let fa = &findings[a];
            let fb = &findings[b];
            fa.source
                .cmp(&fb.source)
                .then(fa.severity.cmp(&fb.severity))
                .then(fa.file.cmp(&fb.file))
        });
        order
    }

    /// Resolve the triager and produce a validated outcome, falling back to
    /// the default policy where required.
    fn classify(&self, finding: &Finding) -> TriageOutcome {
        let outcome = match self.registry.resolve_triager(&finding.domain) {
            Ok(triager) => {
                let mut result = triager.triage(finding);
                if result.as_ref().is_err_and(|e| e.is_transient()) {
                    tracing::debug!(finding = %finding.id, "transient triage failure, retrying once");
                    result = triager.triage(finding);
                }
                match result {
                    Ok(outcome) => outcome,
                    Err(err) => {
                        tracing::warn!(
                            finding = %finding.id,
                            domain = %finding.domain,
                            error = %err,
                            "triager failed, applying default policy"
                        );
                        return self.default_outcome(finding);
                    }
                }
            }
            Err(err) => {
                tracing::debug!(
                    domain = %finding.domain,
                    error = %err,
                    "no triager registered, applying default policy"
                );
                return self.default_outcome(finding);
            }
        };

        if !outcome.is_valid() {
            // SUPPRESS without a rationale is invalid and re-routed
            tracing::warn!(
                finding = %finding.id,
                "SUPPRESS without rationale rejected, applying default policy"
            );
            return self.default_outcome(finding);
        }
        outcome
    }

    fn default_outcome(&self, finding: &Finding) -> TriageOutcome {
        TriageOutcome {
            decision: self.policy.default_decision(finding.severity),
            rationale: None,
        }
    }
}

/// Collect suppression annotations from all suppressed findings, for the
/// finalize phase.
pub fn suppression_annotations(findings: &[Finding]) -> Vec<SuppressionAnnotation> {
    findings
        .iter()
        .filter(|f| f.status == FindingStatus::Suppressed)
        .map(|f| SuppressionAnnotation {
            finding: f.id,
            rule: f.rule.clone(),
            file: f.file.clone(),
            line: f.line,
            rationale: f.rationale.clone().unwrap_or_default(),
        })
        .collect()
}
