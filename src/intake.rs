//! Intake records: the change request and project context consumed at
//! phases 1-2.
//!
//! Confidence-of-understanding is assessed by an external collaborator and
//! carried on the request and its clarifications; the orchestrator only
//! compares the latest assessment to the configured threshold.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::PlanError;

/// A request document entering the lifecycle at phase 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeRequest {
    /// Short title of the requested change.
    pub title: String,
    /// Free-text description.
    pub description: String,
    /// Externally assessed confidence-of-understanding (0.0-1.0) for the
    /// request as originally written.
    pub confidence: f64,
    /// Clarification rounds collected during refine, in arrival order.
    #[serde(default)]
    pub clarifications: Vec<Clarification>,
}

impl ChangeRequest {
    /// Create a new request with an initial confidence assessment.
    pub fn new(title: impl Into<String>, description: impl Into<String>, confidence: f64) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            confidence,
            clarifications: Vec::new(),
        }
    }

    /// The most recent confidence assessment: the latest clarification's,
    /// or the original request's if none have arrived.
    pub fn current_confidence(&self) -> f64 {
        self.clarifications
            .last()
            .map(|c| c.confidence)
            .unwrap_or(self.confidence)
    }

    /// Reject malformed requests at the phase boundary.
    pub fn validate(&self) -> Result<(), PlanError> {
        if self.title.trim().is_empty() {
            return Err(PlanError::validation("request title must not be empty"));
        }
        if self.description.trim().is_empty() {
            return Err(PlanError::validation(
                "request description must not be empty",
            ));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(PlanError::validation(format!(
                "request confidence {} outside 0.0-1.0",
                self.confidence
            )));
        }
        Ok(())
    }
}

/// One round of clarification solicited during refine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Clarification {
    /// What was asked.
    pub question: String,
    /// The answer received.
    pub answer: String,
    /// Re-assessed confidence-of-understanding after this answer.
    pub confidence: f64,
    pub received_at: DateTime<Utc>,
}

impl Clarification {
    /// Create a clarification with the re-assessed confidence.
    pub fn new(
        question: impl Into<String>,
        answer: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
            confidence,
            received_at: Utc::now(),
        }
    }
}

/// Architecture metadata for the project a plan operates on.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectContext {
    /// Known modules with their owning domains.
    #[serde(default)]
    pub modules: Vec<ModuleInfo>,
    /// Domain identifiers available in this project.
    #[serde(default)]
    pub domains: Vec<String>,
}

impl ProjectContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a module, registering its domain if not yet known.
    pub fn with_module(mut self, name: impl Into<String>, domain: impl Into<String>) -> Self {
        let domain = domain.into();
        if !self.domains.contains(&domain) {
            self.domains.push(domain.clone());
        }
        self.modules.push(ModuleInfo {
            name: name.into(),
            domain,
        });
        self
    }

    /// Look up the domain owning a module.
    pub fn domain_of(&self, module: &str) -> Option<&str> {
        self.modules
            .iter()
            .find(|m| m.name == module)
            .map(|m| m.domain.as_str())
    }
}

/// A single module entry in the project context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleInfo {
    pub name: String,
    pub domain: String,
}
