//! Extension registry: `(domain, capability) → handler` resolution.
//!
//! Each capability is a typed trait; the registry maps domain identifiers to
//! shared handler instances. Registration happens at plan-or-project setup;
//! after that the registry is read-only and safely shared across plans
//! without locking. Resolution is a pure lookup and fails with
//! `ExtensionError::NotFound` — callers treat that as "capability optional,
//! fall back to generic handling", never as a crash.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::errors::ExtensionError;
use crate::intake::{ChangeRequest, ProjectContext};
use crate::model::{ChangeType, Deliverable};
use crate::orchestrator::interfaces::TaskExecutor;
use crate::triage::{Finding, TriageOutcome};

/// The named extension points a domain can provide handlers for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Outline,
    Triage,
    ChangeTypeAgent,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Outline => "outline",
            Self::Triage => "triage",
            Self::ChangeTypeAgent => "change_type_agent",
        };
        write!(f, "{}", s)
    }
}

/// Produces a domain's deliverables from a request and project context.
pub trait Outliner: Send + Sync {
    fn outline(
        &self,
        request: &ChangeRequest,
        context: &ProjectContext,
    ) -> Result<Vec<Deliverable>, ExtensionError>;
}

/// Classifies a single finding as FIX / SUPPRESS / ACCEPT.
pub trait Triager: Send + Sync {
    fn triage(&self, finding: &Finding) -> Result<TriageOutcome, ExtensionError>;
}

/// Maps a change type to the executor that should perform phase-4/5 work
/// for that kind of change. `None` means this agent has no opinion for the
/// given change type and the plan-wide default executor applies.
pub trait ChangeTypeAgent: Send + Sync {
    fn executor_for(&self, change_type: ChangeType) -> Option<Arc<dyn TaskExecutor>>;
}

/// Static map from domain to capability handlers, populated at setup time.
#[derive(Default)]
pub struct ExtensionRegistry {
    outliners: HashMap<String, Arc<dyn Outliner>>,
    triagers: HashMap<String, Arc<dyn Triager>>,
    change_type_agents: HashMap<String, Arc<dyn ChangeTypeAgent>>,
}

impl ExtensionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an outline handler for a domain.
    pub fn register_outliner(&mut self, domain: impl Into<String>, handler: Arc<dyn Outliner>) {
        self.outliners.insert(domain.into(), handler);
    }

    /// Register a triage handler for a domain.
    pub fn register_triager(&mut self, domain: impl Into<String>, handler: Arc<dyn Triager>) {
        self.triagers.insert(domain.into(), handler);
    }

    /// Register a change-type agent for a domain.
    pub fn register_change_type_agent(
        &mut self,
        domain: impl Into<String>,
        handler: Arc<dyn ChangeTypeAgent>,
    ) {
        self.change_type_agents.insert(domain.into(), handler);
    }

    /// Builder-style registration.
    pub fn with_outliner(mut self, domain: impl Into<String>, handler: Arc<dyn Outliner>) -> Self {
        self.register_outliner(domain, handler);
        self
    }

    /// Builder-style registration.
    pub fn with_triager(mut self, domain: impl Into<String>, handler: Arc<dyn Triager>) -> Self {
        self.register_triager(domain, handler);
        self
    }

    /// Builder-style registration.
    pub fn with_change_type_agent(
        mut self,
        domain: impl Into<String>,
        handler: Arc<dyn ChangeTypeAgent>,
    ) -> Self {
        self.register_change_type_agent(domain, handler);
        self
    }

    /// Resolve the outline handler for a domain.
    pub fn resolve_outliner(&self, domain: &str) -> Result<&Arc<dyn Outliner>, ExtensionError> {
        self.outliners
            .get(domain)
            .ok_or_else(|| Self::not_found(domain, Capability::Outline))
    }

    /// Resolve the triage handler for a domain.
    pub fn resolve_triager(&self, domain: &str) -> Result<&Arc<dyn Triager>, ExtensionError> {
        self.triagers
            .get(domain)
            .ok_or_else(|| Self::not_found(domain, Capability::Triage))
    }

    /// Resolve the change-type agent for a domain.
    pub fn resolve_change_type_agent(
        &self,
        domain: &str,
    ) -> Result<&Arc<dyn ChangeTypeAgent>, ExtensionError> {
        self.change_type_agents
            .get(domain)
            .ok_or_else(|| Self::not_found(domain, Capability::ChangeTypeAgent))
    }

    /// Check whether a domain provides a capability.
    pub fn has_capability(&self, domain: &str, capability: Capability) -> bool {
        match capability {
            Capability::Outline => self.outliners.contains_key(domain),
            Capability::Triage => self.triagers.contains_key(domain),
            Capability::ChangeTypeAgent => self.change_type_agents.contains_key(domain),
        }
    }

    fn not_found(domain: &str, capability: Capability) -> ExtensionError {
        ExtensionError::NotFound {
            domain: domain.to_string(),
            capability,
        }
    }
}

impl fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionRegistry")
            .field("outliners", &self.outliners.keys().collect::<Vec<_>>())
            .field("triagers", &self.triagers.keys().collect::<Vec<_>>())
            .field(
                "change_type_agents",
                &self.change_type_agents.keys().collect::<Vec<_>>(),
            )
            .finish()
    }
}
