//! The phase orchestrator: drives a single plan through its lifecycle.
//!
//! `PlanOrchestrator` owns all per-plan state (single-writer discipline) and
//! advances the plan until it suspends on an external decision, terminates,
//! or hits a structural error. Suspension points follow a callback/resume
//! model: the caller feeds the awaited event back in through one of the
//! `resume_with_*` entry points, which re-enter the phase evaluation logic.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::OrchestratorConfig;
use crate::errors::{ExtensionError, PlanError};
use crate::intake::{ChangeRequest, Clarification, ProjectContext};
use crate::model::{ChangeType, DeliverableSet, TaskBoard, TaskOrigin};
use crate::orchestrator::interfaces::{
    ExecutionContext, ReviewDecision, TaskExecutor, VerificationRunner, VerificationScope,
};
use crate::plan::{PlanPhase, PlanRecord};
use crate::registry::ExtensionRegistry;
use crate::store::PlanStore;
use crate::triage::{
    Finding, FindingStatus, Severity, TriagePipeline, TriageReport, suppression_annotations,
};

/// An external decision the plan is waiting on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "waiting_on", rename_all = "snake_case")]
pub enum Suspension {
    /// Refine confidence is below threshold; a clarification is needed.
    AwaitingClarification,
    /// Deliverables are outlined and waiting on the review gate.
    AwaitingReview,
    /// Phase 5 finished with blocked tasks and needs an explicit override
    /// to close.
    BlockedTasks { tasks: Vec<u32> },
}

/// What `advance` achieved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    /// The plan is waiting on an external decision.
    Suspended(Suspension),
    /// The plan reached a terminal phase.
    Terminal(PlanPhase),
}

/// Drives one plan through the seven-phase lifecycle.
pub struct PlanOrchestrator {
    config: OrchestratorConfig,
    store: PlanStore,
    registry: Arc<ExtensionRegistry>,
    default_executor: Arc<dyn TaskExecutor>,
    verifier: Arc<dyn VerificationRunner>,
    plan: PlanRecord,
    request: ChangeRequest,
    context: ProjectContext,
    deliverables: DeliverableSet,
    board: TaskBoard,
    findings: Vec<Finding>,
    suspension: Option<Suspension>,
    needs_outline: bool,
    outline_approved: bool,
    override_blocked: bool,
}

impl PlanOrchestrator {
    /// Intake: validate the request, create the plan record, and persist the
    /// intake artifacts. The plan starts in `1-init`.
    pub fn intake(
        config: OrchestratorConfig,
        store: PlanStore,
        registry: Arc<ExtensionRegistry>,
        default_executor: Arc<dyn TaskExecutor>,
        verifier: Arc<dyn VerificationRunner>,
        request: ChangeRequest,
        context: ProjectContext,
    ) -> Result<Self, PlanError> {
        request.validate()?;
        let plan = PlanRecord::new();
        store.save_plan(&plan)?;
        store.save_request(plan.id, &request)?;
        tracing::info!(plan = %plan.id, title = %request.title, "plan created");
        Ok(Self {
            config,
            store,
            registry,
            default_executor,
            verifier,
            plan,
            request,
            context,
            deliverables: DeliverableSet::default(),
            board: TaskBoard::new(),
            findings: Vec::new(),
            suspension: None,
            needs_outline: true,
            outline_approved: false,
            override_blocked: false,
        })
    }

    pub fn plan(&self) -> &PlanRecord {
        &self.plan
    }

    pub fn request(&self) -> &ChangeRequest {
        &self.request
    }

    pub fn deliverables(&self) -> &DeliverableSet {
        &self.deliverables
    }

    pub fn board(&self) -> &TaskBoard {
        &self.board
    }

    pub fn findings(&self) -> &[Finding] {
        &self.findings
    }

    pub fn suspension(&self) -> Option<&Suspension> {
        self.suspension.as_ref()
    }

    /// Run the state machine until the plan suspends, terminates, or a
    /// structural error aborts the current phase.
    pub fn advance(&mut self) -> Result<Progress, PlanError> {
        if let Some(suspension) = &self.suspension {
            return Ok(Progress::Suspended(suspension.clone()));
        }
        loop {
            match self.plan.phase {
                PlanPhase::Init => {
                    // Intake artifacts are persisted at construction
                    self.transition(PlanPhase::Refine)?;
                }
                PlanPhase::Refine => {
                    let confidence = self.request.current_confidence();
                    if confidence >= self.config.confidence_threshold {
                        self.plan.domains = self.context.domains.clone();
                        tracing::debug!(
                            plan = %self.plan.id,
                            confidence,
                            domains = ?self.plan.domains,
                            "refine complete"
                        );
                        self.transition(PlanPhase::Outline)?;
                    } else {
                        if self.plan.counters.refine >= self.config.max_refine_iterations {
                            return self.fail_iteration_limit(PlanPhase::Refine);
                        }
                        self.plan.counters.refine += 1;
                        self.plan.transition_to(PlanPhase::Refine)?;
                        self.store.save_plan(&self.plan)?;
                        return self.suspend(Suspension::AwaitingClarification);
                    }
                }
                PlanPhase::Outline => {
                    if self.outline_approved {
                        self.transition(PlanPhase::Plan)?;
                        continue;
                    }
                    if self.needs_outline {
                        self.run_outline()?;
                        self.needs_outline = false;
                    }
                    return self.suspend(Suspension::AwaitingReview);
                }
                PlanPhase::Plan => {
                    let created = self.board.derive_tasks(&self.deliverables)?;
                    tracing::info!(plan = %self.plan.id, tasks = created.len(), "tasks derived");
                    self.store.save_tasks(self.plan.id, &self.board)?;
                    self.transition(PlanPhase::Execute)?;
                }
                PlanPhase::Execute => {
                    self.run_execute()?;
                    let blocked = self.board.blocked();
                    if !blocked.is_empty() && !self.override_blocked {
                        return self.suspend(Suspension::BlockedTasks { tasks: blocked });
                    }
                    self.transition(PlanPhase::Verify)?;
                }
                PlanPhase::Verify => {
                    let report = self.run_verify()?;
                    if report.has_fix_tasks() {
                        if self.plan.counters.verify >= self.config.max_verify_iterations {
                            return self.fail_iteration_limit(PlanPhase::Verify);
                        }
                        self.transition(PlanPhase::Execute)?;
                    } else {
                        self.transition(PlanPhase::Finalize)?;
                    }
                }
                PlanPhase::Finalize => {
                    let annotations = suppression_annotations(&self.findings);
                    self.store.save_suppressions(self.plan.id, &annotations)?;
                    self.store.save_findings(self.plan.id, &self.findings)?;
                    self.transition(PlanPhase::Complete)?;
                }
                PlanPhase::Complete | PlanPhase::Failed | PlanPhase::Cancelled => {
                    return Ok(Progress::Terminal(self.plan.phase));
                }
            }
        }
    }

    /// Feed a clarification back into a plan suspended in refine.
    pub fn resume_with_clarification(
        &mut self,
        clarification: Clarification,
    ) -> Result<Progress, PlanError> {
        if self.suspension != Some(Suspension::AwaitingClarification) {
            return Err(PlanError::validation("plan is not awaiting clarification"));
        }
        self.suspension = None;
        self.request.clarifications.push(clarification);
        self.store.save_request(self.plan.id, &self.request)?;
        self.advance()
    }

    /// Feed the outline review decision back into a suspended plan.
    ///
    /// Approval moves the plan on to `4-plan`; requested changes loop the
    /// outline phase (bounded by its ceiling), recording the feedback on the
    /// request so the re-outline sees it.
    pub fn resume_with_review(&mut self, decision: ReviewDecision) -> Result<Progress, PlanError> {
        if self.suspension != Some(Suspension::AwaitingReview) {
            return Err(PlanError::validation("plan is not awaiting review"));
        }
        self.suspension = None;
        match decision {
            ReviewDecision::Approved => {
                self.outline_approved = true;
            }
            ReviewDecision::ChangesRequested { feedback } => {
                if self.plan.counters.outline >= self.config.max_outline_iterations {
                    return self.fail_iteration_limit(PlanPhase::Outline);
                }
                self.plan.counters.outline += 1;
                self.plan.transition_to(PlanPhase::Outline)?;
                self.request.clarifications.push(Clarification::new(
                    "outline review feedback",
                    feedback,
                    self.request.current_confidence(),
                ));
                self.store.save_request(self.plan.id, &self.request)?;
                self.store.save_plan(&self.plan)?;
                self.needs_outline = true;
            }
        }
        self.advance()
    }

    /// Resolve a `BlockedTasks` suspension. With `allow`, phase 5 closes
    /// despite the blocked tasks; otherwise the plan stays suspended (the
    /// caller may cancel instead).
    pub fn resume_with_override(&mut self, allow: bool) -> Result<Progress, PlanError> {
        let Some(Suspension::BlockedTasks { tasks }) = self.suspension.clone() else {
            return Err(PlanError::validation("plan has no blocked-task suspension"));
        };
        if !allow {
            return Ok(Progress::Suspended(Suspension::BlockedTasks { tasks }));
        }
        tracing::warn!(plan = %self.plan.id, tasks = ?tasks, "blocked tasks overridden");
        self.override_blocked = true;
        self.suspension = None;
        self.advance()
    }

    /// Cancel the plan at the current phase boundary.
    pub fn cancel(&mut self) -> Result<(), PlanError> {
        self.plan.transition_to(PlanPhase::Cancelled)?;
        self.suspension = None;
        self.store.save_plan(&self.plan)?;
        self.store.save_tasks(self.plan.id, &self.board)?;
        self.store.save_findings(self.plan.id, &self.findings)?;
        tracing::info!(plan = %self.plan.id, "plan cancelled");
        Ok(())
    }

    // ── phase bodies ─────────────────────────────────────────────────────

    fn run_outline(&mut self) -> Result<(), PlanError> {
        let domains = self.plan.domains.clone();
        let mut collected = Vec::new();
        for domain in &domains {
            match self.registry.resolve_outliner(domain) {
                Ok(outliner) => {
                    let mut result = outliner.outline(&self.request, &self.context);
                    if result.as_ref().is_err_and(ExtensionError::is_transient) {
                        tracing::debug!(domain = %domain, "transient outline failure, retrying once");
                        result = outliner.outline(&self.request, &self.context);
                    }
                    match result {
                        Ok(deliverables) => collected.extend(deliverables),
                        Err(err) => {
                            return Err(PlanError::validation(format!(
                                "outline failed for domain '{domain}': {err}"
                            )));
                        }
                    }
                }
                Err(err) => {
                    // Capability optional: a domain without an outliner
                    // contributes no deliverables
                    tracing::warn!(domain = %domain, error = %err, "skipping domain in outline");
                }
            }
        }
        if collected.is_empty() {
            return Err(PlanError::validation(
                "outline produced no deliverables for any domain",
            ));
        }
        self.deliverables = DeliverableSet::new(collected)?;
        self.store.save_deliverables(self.plan.id, &self.deliverables)?;
        tracing::info!(
            plan = %self.plan.id,
            deliverables = self.deliverables.len(),
            "outline complete"
        );
        Ok(())
    }

    fn run_execute(&mut self) -> Result<(), PlanError> {
        // Creation order is dependency order, so sequential execution keeps
        // the dependency invariant
        for number in self.board.pending() {
            let task = self
                .board
                .get(number)
                .expect("pending task exists")
                .clone();
            let ctx = self.execution_context(&task);
            let executor = self.resolve_executor(&task, &ctx);
            self.board.start_task(number)?;

            let mut result = executor.execute(&task, &ctx);
            if result.as_ref().is_err_and(ExtensionError::is_transient) {
                tracing::debug!(task = number, "transient executor failure, retrying once");
                result = executor.execute(&task, &ctx);
            }

            match result {
                Ok(execution) => {
                    let provided = execution.step_outcomes.len();
                    for (index, outcome) in execution
                        .step_outcomes
                        .into_iter()
                        .take(task.steps.len())
                        .enumerate()
                    {
                        let status = self.board.record_step_outcome(number, index, outcome)?;
                        if status.is_terminal() {
                            break;
                        }
                    }
                    let terminal = self
                        .board
                        .get(number)
                        .is_some_and(|t| t.status.is_terminal());
                    if !terminal {
                        self.board.block_task(
                            number,
                            format!(
                                "executor returned {provided} outcomes for {} steps",
                                task.steps.len()
                            ),
                        )?;
                    }
                    self.findings.extend(execution.findings);
                }
                Err(err) => {
                    tracing::warn!(task = number, error = %err, "executor failed after retry");
                    let file = task
                        .steps
                        .first()
                        .map(|s| s.target.clone())
                        .unwrap_or_default();
                    self.findings.push(
                        Finding::new(
                            "executor",
                            "execution-failure",
                            file,
                            Severity::Blocker,
                            format!("task {number} failed: {err}"),
                        )
                        .with_domain(ctx.domain.clone()),
                    );
                    self.board.block_task(number, err.to_string())?;
                }
            }
        }
        self.store.save_tasks(self.plan.id, &self.board)?;
        self.store.save_findings(self.plan.id, &self.findings)?;
        Ok(())
    }

    fn run_verify(&mut self) -> Result<TriageReport, PlanError> {
        self.plan.counters.verify += 1;
        // Logically clear findings resolved in earlier cycles
        for finding in &mut self.findings {
            if finding.status.is_resolved() && !finding.stale {
                finding.mark_stale();
            }
        }

        let scope = VerificationScope {
            files: self.deliverables.affected_files(),
            modules: self.touched_modules(),
            iteration: self.plan.counters.verify,
        };
        let mut result = self.verifier.verify(&scope);
        if result.as_ref().is_err_and(ExtensionError::is_transient) {
            tracing::debug!(plan = %self.plan.id, "transient verifier failure, retrying once");
            result = self.verifier.verify(&scope);
        }

        match result {
            Ok(report) => {
                let failed = report.failed_checks();
                let mut new_findings = report.findings;
                if new_findings.is_empty() {
                    // A failed check with no detailed findings still blocks
                    for category in failed {
                        new_findings.push(Finding::new(
                            "verification",
                            category.to_string(),
                            scope.files.first().cloned().unwrap_or_default(),
                            Severity::Blocker,
                            format!("{category} check failed without detailed findings"),
                        ));
                    }
                }
                tracing::info!(
                    plan = %self.plan.id,
                    iteration = scope.iteration,
                    findings = new_findings.len(),
                    "verification run complete"
                );
                self.findings.extend(new_findings);
            }
            Err(err) => {
                tracing::warn!(plan = %self.plan.id, error = %err, "verifier failed after retry");
                self.findings.push(Finding::new(
                    "verifier",
                    "verification-failure",
                    scope.files.first().cloned().unwrap_or_default(),
                    Severity::Blocker,
                    format!("verification run failed: {err}"),
                ));
            }
        }

        let pipeline = TriagePipeline::new(self.registry.clone(), self.config.triage.clone());
        let report = pipeline.run(&mut self.findings, &mut self.board);

        self.store.save_tasks(self.plan.id, &self.board)?;
        self.store.save_findings(self.plan.id, &self.findings)?;
        self.store.save_plan(&self.plan)?;
        Ok(report)
    }

    // ── helpers ──────────────────────────────────────────────────────────

    fn execution_context(&self, task: &crate::model::Task) -> ExecutionContext {
        let (domain, change_type) = match &task.origin {
            TaskOrigin::Normal { deliverable } => match self.deliverables.get(deliverable) {
                Some(d) => (d.domain.clone(), d.change_type),
                None => (String::new(), ChangeType::Feature),
            },
            TaskOrigin::Fix { finding } => {
                let domain = self
                    .findings
                    .iter()
                    .find(|f| f.id == *finding)
                    .map(|f| f.domain.clone())
                    .unwrap_or_default();
                (domain, ChangeType::BugFix)
            }
        };
        ExecutionContext {
            plan: self.plan.id,
            domain,
            change_type,
        }
    }

    fn resolve_executor(
        &self,
        task: &crate::model::Task,
        ctx: &ExecutionContext,
    ) -> Arc<dyn TaskExecutor> {
        match self.registry.resolve_change_type_agent(&ctx.domain) {
            Ok(agent) => agent
                .executor_for(ctx.change_type)
                .unwrap_or_else(|| self.default_executor.clone()),
            Err(err) => {
                tracing::debug!(
                    task = task.number,
                    domain = %ctx.domain,
                    error = %err,
                    "using default executor"
                );
                self.default_executor.clone()
            }
        }
    }

    fn touched_modules(&self) -> Vec<String> {
        let mut modules = Vec::new();
        for deliverable in self.deliverables.deliverables() {
            if !modules.contains(&deliverable.target_module) {
                modules.push(deliverable.target_module.clone());
            }
        }
        modules
    }

    fn transition(&mut self, next: PlanPhase) -> Result<(), PlanError> {
        self.plan.transition_to(next)?;
        self.store.save_plan(&self.plan)?;
        Ok(())
    }

    fn suspend(&mut self, suspension: Suspension) -> Result<Progress, PlanError> {
        tracing::info!(plan = %self.plan.id, suspension = ?suspension, "plan suspended");
        self.suspension = Some(suspension.clone());
        Ok(Progress::Suspended(suspension))
    }

    /// Iteration-limit failures are fatal and non-retryable: the plan moves
    /// to `failed` carrying its unresolved findings, and the typed error is
    /// surfaced for the caller.
    fn fail_iteration_limit(&mut self, phase: PlanPhase) -> Result<Progress, PlanError> {
        let limit = self.config.ceiling_for(phase);
        let unresolved: Vec<String> = self
            .findings
            .iter()
            .filter(|f| {
                !f.stale
                    && !matches!(
                        f.status,
                        FindingStatus::Accepted | FindingStatus::Suppressed
                    )
            })
            .map(|f| f.to_string())
            .collect();
        let mut message = format!("phase {phase} exceeded its iteration ceiling of {limit}");
        if !unresolved.is_empty() {
            message.push_str("; unresolved findings: ");
            message.push_str(&unresolved.join("; "));
        }
        tracing::warn!(plan = %self.plan.id, %phase, limit, "iteration ceiling exceeded");
        self.plan.failure = Some(message);
        self.plan.transition_to(PlanPhase::Failed)?;
        self.store.save_plan(&self.plan)?;
        self.store.save_findings(self.plan.id, &self.findings)?;
        Err(PlanError::IterationLimitExceeded { phase, limit })
    }
}
