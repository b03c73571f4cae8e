//! Plan identity, phase state machine, and iteration counters.
//!
//! This module provides:
//! - `PlanId` — unique plan identity
//! - `PlanPhase` — the seven ordered lifecycle phases plus terminal states
//! - `IterationCounters` — bounded re-entry counts for loop-eligible phases
//! - `PlanRecord` — the durable per-plan record mutated only by the orchestrator

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::errors::PlanError;

/// Unique identity of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlanId(Uuid);

impl PlanId {
    /// Generate a fresh plan id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PlanId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle phase of a plan.
///
/// Seven ordered working phases plus three terminal states. A plan only ever
/// moves forward one phase at a time, loops back along the documented edges
/// (refine and outline re-enter themselves, verify loops back to execute),
/// or drops into a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlanPhase {
    #[serde(rename = "1-init")]
    Init,
    #[serde(rename = "2-refine")]
    Refine,
    #[serde(rename = "3-outline")]
    Outline,
    #[serde(rename = "4-plan")]
    Plan,
    #[serde(rename = "5-execute")]
    Execute,
    #[serde(rename = "6-verify")]
    Verify,
    #[serde(rename = "7-finalize")]
    Finalize,
    #[serde(rename = "complete")]
    Complete,
    #[serde(rename = "failed")]
    Failed,
    #[serde(rename = "cancelled")]
    Cancelled,
}

impl PlanPhase {
    /// Ordinal position for working phases (1-7); terminal states have none.
    pub fn ordinal(&self) -> Option<u8> {
        match self {
            Self::Init => Some(1),
            Self::Refine => Some(2),
            Self::Outline => Some(3),
            Self::Plan => Some(4),
            Self::Execute => Some(5),
            Self::Verify => Some(6),
            Self::Finalize => Some(7),
            Self::Complete | Self::Failed | Self::Cancelled => None,
        }
    }

    /// Check if this phase is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Cancelled)
    }

    /// Check if re-entering this phase is permitted (and counted).
    pub fn is_loop_eligible(&self) -> bool {
        matches!(self, Self::Refine | Self::Outline | Self::Verify)
    }

    /// Check whether a transition from this phase to `next` is legal.
    ///
    /// Legal moves are: the single forward step, the documented loop edges
    /// (2→2, 3→3, 6→5), and a drop from any working phase into `Failed` or
    /// `Cancelled`. Phases are never skipped.
    pub fn can_transition_to(&self, next: PlanPhase) -> bool {
        if self.is_terminal() {
            return false;
        }
        if matches!(next, PlanPhase::Failed | PlanPhase::Cancelled) {
            return true;
        }
        match (self, next) {
            (Self::Refine, Self::Refine) => true,
            (Self::Outline, Self::Outline) => true,
            (Self::Verify, Self::Execute) => true,
            (Self::Finalize, Self::Complete) => true,
            (from, to) => match (from.ordinal(), to.ordinal()) {
                (Some(a), Some(b)) => b == a + 1,
                _ => false,
            },
        }
    }
}

impl fmt::Display for PlanPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Init => "1-init",
            Self::Refine => "2-refine",
            Self::Outline => "3-outline",
            Self::Plan => "4-plan",
            Self::Execute => "5-execute",
            Self::Verify => "6-verify",
            Self::Finalize => "7-finalize",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Re-entry counts for the loop-eligible phases.
///
/// Counters are monotonically non-decreasing within a plan's lifetime and
/// checked against the configured ceilings before any loop-back is taken.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationCounters {
    /// Clarification rounds taken in `2-refine`.
    #[serde(default)]
    pub refine: u32,
    /// Re-outline rounds forced by review feedback in `3-outline`.
    #[serde(default)]
    pub outline: u32,
    /// Entries into `6-verify` (the first run counts as iteration 1).
    #[serde(default)]
    pub verify: u32,
}

/// The durable record of a plan.
///
/// Created at intake and mutated only by the orchestrator. Terminal once
/// `phase` reaches `complete`, `failed`, or `cancelled`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanRecord {
    pub id: PlanId,
    pub phase: PlanPhase,
    #[serde(default)]
    pub counters: IterationCounters,
    /// Domains relevant to this plan, assigned during refine.
    #[serde(default)]
    pub domains: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Failure description, populated when the plan terminates in `failed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl PlanRecord {
    /// Create a fresh plan record in `1-init`.
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: PlanId::new(),
            phase: PlanPhase::Init,
            counters: IterationCounters::default(),
            domains: Vec::new(),
            created_at: now,
            updated_at: now,
            failure: None,
        }
    }

    /// Move the plan to `next`, rejecting undocumented transitions.
    pub fn transition_to(&mut self, next: PlanPhase) -> Result<(), PlanError> {
        if !self.phase.can_transition_to(next) {
            return Err(PlanError::InvalidTransition {
                from: self.phase,
                to: next,
            });
        }
        tracing::info!(plan = %self.id, from = %self.phase, to = %next, "phase transition");
        self.phase = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Check if the plan has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }
}

impl Default for PlanRecord {
    fn default() -> Self {
        Self::new()
    }
}
