//! Boundary contracts between the orchestrator and its external
//! collaborators: task executors (phase 5) and verification runners
//! (phase 6), plus the review decision consumed by the outline gate.
//!
//! Each call is synchronous from the orchestrator's point of view. Handlers
//! signal retryable failures with `ExtensionError::Transient`; the
//! orchestrator retries once and then surfaces a blocking finding.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::errors::ExtensionError;
use crate::model::{ChangeType, StepOutcome, Task};
use crate::plan::PlanId;
use crate::triage::Finding;

/// Context handed to an executor alongside the task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub plan: PlanId,
    /// Domain of the deliverable (or finding) the task came from.
    pub domain: String,
    /// Kind of change being performed.
    pub change_type: ChangeType,
}

/// Per-task result returned by an executor: one outcome per step, plus any
/// findings discovered incidentally during execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskExecution {
    pub step_outcomes: Vec<StepOutcome>,
    #[serde(default)]
    pub findings: Vec<Finding>,
}

impl TaskExecution {
    /// A result with every step done and no findings.
    pub fn all_done(step_count: usize) -> Self {
        Self {
            step_outcomes: vec![StepOutcome::Done; step_count],
            findings: Vec::new(),
        }
    }

    /// Check if every step succeeded.
    pub fn succeeded(&self) -> bool {
        self.step_outcomes.iter().all(StepOutcome::is_done)
    }
}

/// Executes a task's steps. Resolved per change type through the
/// `ChangeTypeAgent` capability, with a plan-wide default as fallback.
pub trait TaskExecutor: Send + Sync {
    fn execute(&self, task: &Task, ctx: &ExecutionContext) -> Result<TaskExecution, ExtensionError>;
}

/// Check categories reported by a verification run.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum CheckCategory {
    Quality,
    Build,
    DomainTechnical,
    TestCoverage,
}

impl fmt::Display for CheckCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Quality => "quality",
            Self::Build => "build",
            Self::DomainTechnical => "domain_technical",
            Self::TestCoverage => "test_coverage",
        };
        write!(f, "{}", s)
    }
}

/// What a verification run should look at.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationScope {
    /// Files touched during execution.
    pub files: Vec<String>,
    /// Modules touched during execution.
    pub modules: Vec<String>,
    /// Which verify iteration this is (1-based).
    pub iteration: u32,
}

/// Result of a verification run: findings plus a pass/fail signal per check
/// category.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerificationReport {
    #[serde(default)]
    pub findings: Vec<Finding>,
    #[serde(default)]
    pub checks: BTreeMap<CheckCategory, bool>,
}

impl VerificationReport {
    /// A clean report: no findings, all recorded checks passing.
    pub fn clean() -> Self {
        Self::default()
    }

    /// Add a finding.
    pub fn with_finding(mut self, finding: Finding) -> Self {
        self.findings.push(finding);
        self
    }

    /// Record a check result.
    pub fn with_check(mut self, category: CheckCategory, passed: bool) -> Self {
        self.checks.insert(category, passed);
        self
    }

    /// Check categories that failed.
    pub fn failed_checks(&self) -> Vec<CheckCategory> {
        self.checks
            .iter()
            .filter(|&(_, passed)| !passed)
            .map(|(category, _)| *category)
            .collect()
    }

    /// Check if every recorded category passed.
    pub fn passed(&self) -> bool {
        self.checks.values().all(|&passed| passed)
    }
}

/// Runs verification over the touched files/modules in phase 6.
pub trait VerificationRunner: Send + Sync {
    fn verify(&self, scope: &VerificationScope) -> Result<VerificationReport, ExtensionError>;
}

/// Decision returned by the outline review gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ReviewDecision {
    Approved,
    ChangesRequested { feedback: String },
}
