//! Tasks: the executable steps derived from deliverables (or from findings,
//! for fix-tasks), and the board that tracks them.
//!
//! Tasks are never deleted — completed tasks remain on the board for audit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::PlanError;
use crate::model::deliverable::{DeliverableId, DeliverableSet, Profile};
use crate::triage::{Finding, FindingId};

/// Execution state of a task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Blocked,
    Done,
}

impl TaskStatus {
    /// Check if the task has reached a per-task terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Blocked)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Blocked => "blocked",
            Self::Done => "done",
        };
        write!(f, "{}", s)
    }
}

/// Where a task came from: the plan phase (normal) or the triage pipeline
/// (fix). Every task references a valid deliverable or a finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskOrigin {
    Normal { deliverable: DeliverableId },
    Fix { finding: FindingId },
}

impl TaskOrigin {
    /// Check if this is a fix-task origin.
    pub fn is_fix(&self) -> bool {
        matches!(self, Self::Fix { .. })
    }
}

/// Outcome of a single step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum StepOutcome {
    Done,
    Failed { diagnostic: String },
}

impl StepOutcome {
    /// Check if the step completed successfully.
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }
}

/// One ordered step within a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    /// What the step operates on (a file, a module, or a re-check target).
    pub target: String,
    /// Outcome, once the step has run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<StepOutcome>,
}

impl Step {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            outcome: None,
        }
    }
}

/// An executable unit derived from a deliverable or a finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Plan-scoped sequence number.
    pub number: u32,
    pub status: TaskStatus,
    /// Execution mode.
    pub profile: Profile,
    pub origin: TaskOrigin,
    /// Ordered step targets.
    pub steps: Vec<Step>,
    /// Capabilities/skills required to execute this task.
    #[serde(default)]
    pub skills: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Check if this is a fix-task.
    pub fn is_fix(&self) -> bool {
        self.origin.is_fix()
    }

    /// The deliverable this task was derived from, for normal tasks.
    pub fn deliverable(&self) -> Option<&DeliverableId> {
        match &self.origin {
            TaskOrigin::Normal { deliverable } => Some(deliverable),
            TaskOrigin::Fix { .. } => None,
        }
    }

    /// The finding this fix-task targets, for fix-tasks.
    pub fn finding(&self) -> Option<FindingId> {
        match &self.origin {
            TaskOrigin::Fix { finding } => Some(*finding),
            TaskOrigin::Normal { .. } => None,
        }
    }

    /// Check if every step has a done outcome.
    pub fn all_steps_done(&self) -> bool {
        !self.steps.is_empty()
            && self
                .steps
                .iter()
                .all(|s| s.outcome.as_ref().is_some_and(StepOutcome::is_done))
    }
}

/// The plan-scoped task list: derivation, execution-state tracking, and
/// fix-task creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskBoard {
    tasks: Vec<Task>,
    next_number: u32,
}

impl TaskBoard {
    /// Create an empty board. Task numbering starts at 1.
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            next_number: 1,
        }
    }

    /// All tasks in creation order.
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Number of tasks on the board.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Check if the board is empty.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Look up a task by number.
    pub fn get(&self, number: u32) -> Option<&Task> {
        self.tasks.iter().find(|t| t.number == number)
    }

    fn get_mut(&mut self, number: u32) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.number == number)
    }

    /// Numbers of tasks still pending execution, in creation order.
    pub fn pending(&self) -> Vec<u32> {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Pending)
            .map(|t| t.number)
            .collect()
    }

    /// Numbers of blocked tasks.
    pub fn blocked(&self) -> Vec<u32> {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Blocked)
            .map(|t| t.number)
            .collect()
    }

    /// Check if every task has reached a per-task terminal state.
    pub fn all_terminal(&self) -> bool {
        self.tasks.iter().all(|t| t.status.is_terminal())
    }

    /// Expand deliverables into tasks, one per required capability profile,
    /// in the set's dependency order. Creation order is the execution order,
    /// so a dependency's tasks always precede its dependents'.
    ///
    /// Returns the numbers of the created tasks.
    pub fn derive_tasks(&mut self, set: &DeliverableSet) -> Result<Vec<u32>, PlanError> {
        let ordered = set.topological_order()?;
        let mut created = Vec::new();
        for deliverable in ordered {
            for &profile in &deliverable.profiles {
                let steps = if deliverable.affected_files.is_empty() {
                    vec![Step::new(&deliverable.target_module)]
                } else {
                    deliverable.affected_files.iter().map(Step::new).collect()
                };
                let number = self.push_task(Task {
                    number: 0,
                    status: TaskStatus::Pending,
                    profile,
                    origin: TaskOrigin::Normal {
                        deliverable: deliverable.id.clone(),
                    },
                    steps,
                    skills: vec![deliverable.domain.clone()],
                    created_at: Utc::now(),
                });
                created.push(number);
            }
        }
        Ok(created)
    }

    /// Construct a fix-task from a group of findings that share a target
    /// file. The first finding is the primary; the group has already been
    /// coalesced by the triage pipeline. Steps target each distinct location,
    /// followed by a re-check step per distinct rule.
    pub fn add_fix_task(&mut self, findings: &[&Finding]) -> u32 {
        let primary = findings[0];
        let mut steps = Vec::new();
        for finding in findings {
            let step = Step::new(finding.location());
            if !steps.contains(&step) {
                steps.push(step);
            }
        }
        for finding in findings {
            let recheck = Step::new(format!("re-check:{}", finding.rule));
            if !steps.contains(&recheck) {
                steps.push(recheck);
            }
        }
        self.push_task(Task {
            number: 0,
            status: TaskStatus::Pending,
            profile: Profile::Implementation,
            origin: TaskOrigin::Fix {
                finding: primary.id,
            },
            steps,
            skills: if primary.domain.is_empty() {
                Vec::new()
            } else {
                vec![primary.domain.clone()]
            },
            created_at: Utc::now(),
        })
    }

    /// Record the outcome of a single step.
    ///
    /// When all steps of a task are done, the task becomes done. A failed
    /// step blocks the task — the blocking signal the orchestrator consumes
    /// before closing phase 5. Returns the task's resulting status.
    pub fn record_step_outcome(
        &mut self,
        number: u32,
        step_index: usize,
        outcome: StepOutcome,
    ) -> Result<TaskStatus, PlanError> {
        let task = self.get_mut(number).ok_or_else(|| {
            PlanError::validation(format!("no task with number {}", number))
        })?;
        let step = task.steps.get_mut(step_index).ok_or_else(|| {
            PlanError::validation(format!(
                "task {} has no step at index {}",
                number, step_index
            ))
        })?;

        let failed = !outcome.is_done();
        step.outcome = Some(outcome);

        if failed {
            task.status = TaskStatus::Blocked;
        } else if task.all_steps_done() {
            task.status = TaskStatus::Done;
        }
        Ok(task.status)
    }

    /// Mark a task in progress.
    pub fn start_task(&mut self, number: u32) -> Result<(), PlanError> {
        let task = self.get_mut(number).ok_or_else(|| {
            PlanError::validation(format!("no task with number {}", number))
        })?;
        task.status = TaskStatus::InProgress;
        Ok(())
    }

    /// Block a task outright (used when its executor fails after retry).
    pub fn block_task(&mut self, number: u32, diagnostic: impl Into<String>) -> Result<(), PlanError> {
        let diagnostic = diagnostic.into();
        let task = self.get_mut(number).ok_or_else(|| {
            PlanError::validation(format!("no task with number {}", number))
        })?;
        if let Some(step) = task.steps.iter_mut().find(|s| s.outcome.is_none()) {
            step.outcome = Some(StepOutcome::Failed { diagnostic });
        }
        task.status = TaskStatus::Blocked;
        Ok(())
    }

    /// Referential integrity: every task resolves to a deliverable in `set`
    /// or carries a fix origin referencing a finding in `findings`.
    pub fn check_integrity(
        &self,
        set: &DeliverableSet,
        findings: &[Finding],
    ) -> Result<(), PlanError> {
        for task in &self.tasks {
            match &task.origin {
                TaskOrigin::Normal { deliverable } => {
                    if set.get(deliverable).is_none() {
                        return Err(PlanError::validation(format!(
                            "task {} references unknown deliverable '{}'",
                            task.number, deliverable
                        )));
                    }
                }
                TaskOrigin::Fix { finding } => {
                    if !findings.iter().any(|f| f.id == *finding) {
                        return Err(PlanError::validation(format!(
                            "fix-task {} references unknown finding {}",
                            task.number, finding
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    fn push_task(&mut self, mut task: Task) -> u32 {
        task.number = self.next_number;
        self.next_number += 1;
        let number = task.number;
        self.tasks.push(task);
        number
    }
}

impl Default for TaskBoard {
    fn default() -> Self {
        Self::new()
    }
}
