//! Typed error hierarchy for the plansmith orchestrator.
//!
//! Three top-level enums cover the three subsystems:
//! - `PlanError` — structural failures that abort the current phase
//! - `ExtensionError` — extension resolution and handler failures
//! - `StoreError` — persistence failures
//!
//! The propagation policy is deliberately narrow: only structural errors
//! (validation, dependency cycles, iteration limits) cross phase boundaries.
//! Failures inside a single task or finding are contained to that unit and
//! surfaced as data (a blocked task, a blocking finding) instead.

use thiserror::Error;

use crate::plan::PlanPhase;
use crate::registry::Capability;

/// Structural errors escalated across phase boundaries.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("Validation failed: {message}")]
    Validation { message: String },

    #[error("Cycle detected in deliverable dependencies. Involved deliverables: {members:?}")]
    DependencyCycle { members: Vec<String> },

    #[error("Phase {phase} exceeded its iteration ceiling of {limit}")]
    IterationLimitExceeded { phase: PlanPhase, limit: u32 },

    #[error("Invalid phase transition: {from} -> {to}")]
    InvalidTransition { from: PlanPhase, to: PlanPhase },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl PlanError {
    /// Shorthand for a validation failure.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}

/// Errors from extension resolution and handler invocation.
///
/// `NotFound` and `Transient` are recoverable: callers fall back to the
/// documented default behavior or retry once. Only `Handler` represents a
/// definitive failure of the extension itself.
#[derive(Debug, Error)]
pub enum ExtensionError {
    #[error("No {capability} handler registered for domain '{domain}'")]
    NotFound {
        domain: String,
        capability: Capability,
    },

    #[error("Transient extension failure: {message}")]
    Transient { message: String },

    #[error("Extension handler failed: {message}")]
    Handler { message: String },
}

impl ExtensionError {
    /// Shorthand for a transient failure.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    /// Shorthand for a definitive handler failure.
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler {
            message: message.into(),
        }
    }

    /// Check whether this error is eligible for a local retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// Errors from the plan store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to read artifact at {path}: {source}")]
    ReadFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write artifact at {path}: {source}")]
    WriteFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode artifact {name}: {source}")]
    EncodeFailed {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to decode artifact at {path}: {source}")]
    DecodeFailed {
        path: std::path::PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("No persisted plan with id {id}")]
    PlanNotFound { id: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_error_iteration_limit_carries_phase_and_limit() {
        let err = PlanError::IterationLimitExceeded {
            phase: PlanPhase::Verify,
            limit: 5,
        };
        match &err {
            PlanError::IterationLimitExceeded { phase, limit } => {
                assert_eq!(*phase, PlanPhase::Verify);
                assert_eq!(*limit, 5);
            }
            _ => panic!("Expected IterationLimitExceeded"),
        }
        assert!(err.to_string().contains('5'));
    }

    #[test]
    fn plan_error_dependency_cycle_names_members() {
        let err = PlanError::DependencyCycle {
            members: vec!["a".into(), "b".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("Cycle"));
        assert!(msg.contains('a'));
        assert!(msg.contains('b'));
    }

    #[test]
    fn plan_error_converts_from_store_error() {
        let inner = StoreError::PlanNotFound { id: "x".into() };
        let plan_err: PlanError = inner.into();
        assert!(matches!(
            plan_err,
            PlanError::Store(StoreError::PlanNotFound { .. })
        ));
    }

    #[test]
    fn extension_error_transient_is_retryable() {
        let err = ExtensionError::transient("connection reset");
        assert!(err.is_transient());
        let err = ExtensionError::handler("bad input");
        assert!(!err.is_transient());
    }

    #[test]
    fn extension_error_not_found_names_domain_and_capability() {
        let err = ExtensionError::NotFound {
            domain: "java".into(),
            capability: Capability::Triage,
        };
        let msg = err.to_string();
        assert!(msg.contains("java"));
        assert!(msg.contains("triage"));
    }

    #[test]
    fn store_error_write_failed_carries_path() {
        use std::path::PathBuf;
        let path = PathBuf::from("/plans/p1/tasks.json");
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = StoreError::WriteFailed {
            path: path.clone(),
            source: io_err,
        };
        match &err {
            StoreError::WriteFailed { path: p, source: s } => {
                assert_eq!(p, &path);
                assert_eq!(s.kind(), std::io::ErrorKind::PermissionDenied);
            }
            _ => panic!("Expected WriteFailed"),
        }
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&PlanError::validation("x"));
        assert_std_error(&ExtensionError::transient("x"));
        assert_std_error(&StoreError::PlanNotFound { id: "x".into() });
    }
}
