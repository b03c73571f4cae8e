//! Orchestrator configuration.
//!
//! Configuration is loaded once into an immutable [`OrchestratorConfig`] and
//! passed explicitly to the orchestrator constructor; there are no
//! process-wide singletons. A `plansmith.toml` file can override any field:
//!
//! ```toml
//! max_refine_iterations = 3
//! max_outline_iterations = 3
//! max_verify_iterations = 5
//! confidence_threshold = 0.8
//!
//! [triage]
//! fix_floor = "major"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::triage::{Severity, TriageDecision};

/// The configuration file name looked up by [`OrchestratorConfig::load_or_default`].
pub const CONFIG_FILE: &str = "plansmith.toml";

/// Immutable runtime configuration for the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Ceiling on clarification rounds in `2-refine`.
    #[serde(default = "default_max_refine")]
    pub max_refine_iterations: u32,
    /// Ceiling on re-outline rounds in `3-outline`.
    #[serde(default = "default_max_outline")]
    pub max_outline_iterations: u32,
    /// Ceiling on entries into `6-verify`.
    #[serde(default = "default_max_verify")]
    pub max_verify_iterations: u32,
    /// Confidence-of-understanding required to leave `2-refine` (0.0-1.0).
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    /// Default triage policy applied when no domain triager is registered.
    #[serde(default)]
    pub triage: TriagePolicy,
}

fn default_max_refine() -> u32 {
    3
}

fn default_max_outline() -> u32 {
    3
}

fn default_max_verify() -> u32 {
    5
}

fn default_confidence_threshold() -> f64 {
    0.8
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_refine_iterations: default_max_refine(),
            max_outline_iterations: default_max_outline(),
            max_verify_iterations: default_max_verify(),
            confidence_threshold: default_confidence_threshold(),
            triage: TriagePolicy::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config TOML: {}", path.display()))?;
        Ok(config)
    }

    /// Load `plansmith.toml` from a directory, falling back to defaults if
    /// the file does not exist.
    pub fn load_or_default(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Ceiling for the given loop-eligible phase counter.
    pub fn ceiling_for(&self, phase: crate::plan::PlanPhase) -> u32 {
        use crate::plan::PlanPhase;
        match phase {
            PlanPhase::Refine => self.max_refine_iterations,
            PlanPhase::Outline => self.max_outline_iterations,
            PlanPhase::Verify => self.max_verify_iterations,
            // Non-loop phases never consult a ceiling; a single pass is all
            // they get.
            _ => 1,
        }
    }
}

/// The explicit, overridable default applied when a finding has no domain
/// triager (or a SUPPRESS arrives without a rationale): FIX for severities
/// at or above `fix_floor`, ACCEPT otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriagePolicy {
    /// Least-critical severity that still defaults to FIX.
    #[serde(default = "default_fix_floor")]
    pub fix_floor: Severity,
}

fn default_fix_floor() -> Severity {
    Severity::Major
}

impl Default for TriagePolicy {
    fn default() -> Self {
        Self {
            fix_floor: default_fix_floor(),
        }
    }
}

impl TriagePolicy {
    /// The default decision for a finding of the given severity.
    pub fn default_decision(&self, severity: Severity) -> TriageDecision {
        // Severity orders most-critical-first, so "at or above the floor"
        // compares as less-or-equal.
        if severity <= self.fix_floor {
            TriageDecision::Fix
        } else {
            TriageDecision::Accept
        }
    }
}
