//! Finding types for verification outputs.
//!
//! This module defines the structured records produced by verification steps
//! and consumed by the triage pipeline.
//!
//! ## Types
//!
//! - [`Severity`]: severity classification for individual findings
//! - [`TriageDecision`]: the FIX / SUPPRESS / ACCEPT classification
//! - [`TriageOutcome`]: a decision plus optional rationale from a triager
//! - [`FindingStatus`]: per-finding state machine
//! - [`Finding`]: a single defect or observation with location and metadata
//!
//! ## Example
//!
//! ```
//! use plansmith::triage::{Finding, Severity};
//!
//! let finding = Finding::new("lint", "unused-import", "src/api.rs", Severity::Minor,
//!     "unused import `std::fmt`")
//!     .with_line(3)
//!     .with_domain("backend")
//!     .with_auto_fixable(true);
//!
//! assert_eq!(finding.location(), "src/api.rs:3");
//! assert!(!finding.severity.is_blocking());
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identity of a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FindingId(Uuid);

impl FindingId {
    /// Generate a fresh finding id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for FindingId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FindingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Severity level for individual findings.
///
/// Severities are ordered from most to least critical, so the derived
/// ordering sorts the most severe findings first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Breaks the build or a core behavior; must be addressed.
    Blocker,
    /// Significant defect that should be fixed before finalization.
    #[default]
    Major,
    /// Low-impact issue; fixing is desirable but not required.
    Minor,
    /// Observation only.
    Info,
}

impl Severity {
    /// Check if this severity blocks progression on its own.
    ///
    /// # Examples
    ///
    /// ```
    /// use plansmith::triage::Severity;
    ///
    /// assert!(Severity::Blocker.is_blocking());
    /// assert!(Severity::Major.is_blocking());
    /// assert!(!Severity::Minor.is_blocking());
    /// ```
    pub fn is_blocking(&self) -> bool {
        matches!(self, Self::Blocker | Self::Major)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Blocker => "blocker",
            Self::Major => "major",
            Self::Minor => "minor",
            Self::Info => "info",
        };
        write!(f, "{}", s)
    }
}

/// Triage classification for a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriageDecision {
    /// Create a fix-task targeting the finding's location.
    Fix,
    /// Record a suppression annotation; requires a rationale.
    Suppress,
    /// Acknowledge without action.
    Accept,
}

impl fmt::Display for TriageDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Fix => "FIX",
            Self::Suppress => "SUPPRESS",
            Self::Accept => "ACCEPT",
        };
        write!(f, "{}", s)
    }
}

/// A triager's verdict for one finding: the decision plus optional rationale.
///
/// A `Suppress` outcome without a rationale is invalid and is rejected back
/// to the default policy by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriageOutcome {
    pub decision: TriageDecision,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

impl TriageOutcome {
    /// A FIX outcome.
    pub fn fix() -> Self {
        Self {
            decision: TriageDecision::Fix,
            rationale: None,
        }
    }

    /// A SUPPRESS outcome with its required rationale.
    pub fn suppress(rationale: impl Into<String>) -> Self {
        Self {
            decision: TriageDecision::Suppress,
            rationale: Some(rationale.into()),
        }
    }

    /// An ACCEPT outcome.
    pub fn accept() -> Self {
        Self {
            decision: TriageDecision::Accept,
            rationale: None,
        }
    }

    /// Attach a rationale to any outcome.
    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = Some(rationale.into());
        self
    }

    /// Check if this outcome satisfies the suppress-requires-rationale rule.
    pub fn is_valid(&self) -> bool {
        self.decision != TriageDecision::Suppress
            || self
                .rationale
                .as_deref()
                .is_some_and(|r| !r.trim().is_empty())
    }
}

/// Per-finding state machine: `new → triaged → {fix_task_created |
/// suppressed | accepted}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingStatus {
    #[default]
    New,
    Triaged,
    FixTaskCreated,
    Suppressed,
    Accepted,
}

impl FindingStatus {
    /// Check if the finding has been consumed by the pipeline.
    pub fn is_resolved(&self) -> bool {
        matches!(
            self,
            Self::FixTaskCreated | Self::Suppressed | Self::Accepted
        )
    }
}

/// A defect or observation produced by a verification step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub id: FindingId,
    /// Verification step that produced this finding.
    pub source: String,
    /// Rule or category that triggered it.
    pub rule: String,
    /// File path the finding points at.
    pub file: String,
    /// Line number (1-based, optional for file-level findings).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    pub severity: Severity,
    pub message: String,
    /// Whether an automated fix is known for this rule.
    #[serde(default)]
    pub auto_fixable: bool,
    /// Domain used to resolve the triage handler.
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub status: FindingStatus,
    /// Set when the finding belongs to a previous verify iteration and has
    /// been logically cleared. Stale findings are retained for audit but
    /// never re-triaged.
    #[serde(default)]
    pub stale: bool,
    /// The triage decision, once made.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<TriageDecision>,
    /// Rationale recorded with the decision (required for SUPPRESS).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    /// Number of the fix-task created for this finding, for FIX decisions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fix_task: Option<u32>,
    pub reported_at: DateTime<Utc>,
}

impl Finding {
    /// Create a new finding.
    ///
    /// # Arguments
    ///
    /// * `source` - the verification step that produced it
    /// * `rule` - the rule or category that triggered it
    /// * `file` - the file path it points at
    /// * `severity` - its severity
    /// * `message` - human-readable description
    pub fn new(
        source: impl Into<String>,
        rule: impl Into<String>,
        file: impl Into<String>,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: FindingId::new(),
            source: source.into(),
            rule: rule.into(),
            file: file.into(),
            line: None,
            severity,
            message: message.into(),
            auto_fixable: false,
            domain: String::new(),
            status: FindingStatus::New,
            stale: false,
            decision: None,
            rationale: None,
            fix_task: None,
            reported_at: Utc::now(),
        }
    }

    /// Set the line number.
    pub fn with_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }

    /// Set the domain used for triage resolution.
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }

    /// Mark the finding auto-fixable.
    pub fn with_auto_fixable(mut self, auto_fixable: bool) -> Self {
        self.auto_fixable = auto_fixable;
        self
    }

    /// Get a formatted `file:line` location string.
    pub fn location(&self) -> String {
        match self.line {
            Some(line) => format!("{}:{}", self.file, line),
            None => self.file.clone(),
        }
    }

    /// Check if this finding is awaiting triage.
    pub fn needs_triage(&self) -> bool {
        self.status == FindingStatus::New && !self.stale
    }

    /// Logically clear the finding at the start of a new cycle.
    pub fn mark_stale(&mut self) {
        self.stale = true;
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {}: {}",
            self.severity,
            self.rule,
            self.location(),
            self.message
        )
    }
}
