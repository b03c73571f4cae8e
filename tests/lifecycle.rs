//! Integration tests for the plan lifecycle.
//!
//! These drive full plans through the orchestrator against in-memory stub
//! handlers and verify the documented lifecycle properties end to end.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use plansmith::config::OrchestratorConfig;
use plansmith::errors::{ExtensionError, PlanError};
use plansmith::intake::{ChangeRequest, Clarification, ProjectContext};
use plansmith::model::{ChangeType, Deliverable, Profile, Task, TaskStatus};
use plansmith::orchestrator::{
    CheckCategory, ExecutionContext, PlanOrchestrator, Progress, ReviewDecision, Suspension,
    TaskExecution, TaskExecutor, VerificationReport, VerificationRunner, VerificationScope,
};
use plansmith::plan::PlanPhase;
use plansmith::registry::{ExtensionRegistry, Outliner, Triager};
use plansmith::store::PlanStore;
use plansmith::triage::{
    Finding, FindingStatus, Severity, TriageDecision, TriageOutcome,
};
use tempfile::TempDir;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .try_init();
}

// =============================================================================
// Stub handlers
// =============================================================================

/// Outliner returning a fixed deliverable list, counting invocations.
struct StaticOutliner {
    deliverables: Vec<Deliverable>,
    calls: AtomicU32,
}

impl StaticOutliner {
    fn new(deliverables: Vec<Deliverable>) -> Self {
        Self {
            deliverables,
            calls: AtomicU32::new(0),
        }
    }
}

impl Outliner for StaticOutliner {
    fn outline(
        &self,
        _request: &ChangeRequest,
        _context: &ProjectContext,
    ) -> Result<Vec<Deliverable>, ExtensionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.deliverables.clone())
    }
}

/// Executor completing every step, optionally failing tasks whose first
/// step targets a given file.
struct StubExecutor {
    fail_target: Option<String>,
}

impl StubExecutor {
    fn all_done() -> Self {
        Self { fail_target: None }
    }

    fn failing_on(target: &str) -> Self {
        Self {
            fail_target: Some(target.to_string()),
        }
    }
}

impl TaskExecutor for StubExecutor {
    fn execute(
        &self,
        task: &Task,
        _ctx: &ExecutionContext,
    ) -> Result<TaskExecution, ExtensionError> {
        if let Some(fail) = &self.fail_target
            && task.steps.first().is_some_and(|s| &s.target == fail)
        {
            return Err(ExtensionError::handler("simulated executor failure"));
        }
        Ok(TaskExecution::all_done(task.steps.len()))
    }
}

/// Verifier popping one scripted report per run; clean once the script is
/// exhausted.
struct ScriptedVerifier {
    reports: Mutex<Vec<VerificationReport>>,
}

impl ScriptedVerifier {
    fn new(mut reports: Vec<VerificationReport>) -> Self {
        reports.reverse();
        Self {
            reports: Mutex::new(reports),
        }
    }

    fn clean() -> Self {
        Self::new(vec![])
    }
}

impl VerificationRunner for ScriptedVerifier {
    fn verify(&self, _scope: &VerificationScope) -> Result<VerificationReport, ExtensionError> {
        Ok(self
            .reports
            .lock()
            .unwrap()
            .pop()
            .unwrap_or_else(VerificationReport::clean))
    }
}

/// Verifier that reports one fresh major finding on every run.
struct AlwaysFindingVerifier;

impl VerificationRunner for AlwaysFindingVerifier {
    fn verify(&self, scope: &VerificationScope) -> Result<VerificationReport, ExtensionError> {
        Ok(VerificationReport::clean()
            .with_check(CheckCategory::Quality, false)
            .with_finding(
                Finding::new(
                    "quality",
                    "fix-persistent-smell",
                    format!("src/iter{}.rs", scope.iteration),
                    Severity::Major,
                    "still unhappy",
                )
                .with_domain("backend"),
            ))
    }
}

/// Triager deciding per rule name: `fix-*` → FIX, `suppress-*` → SUPPRESS
/// without rationale (invalid on purpose), `accept-*` → ACCEPT.
struct RuleNameTriager;

impl Triager for RuleNameTriager {
    fn triage(&self, finding: &Finding) -> Result<TriageOutcome, ExtensionError> {
        if finding.rule.starts_with("fix-") {
            Ok(TriageOutcome::fix())
        } else if finding.rule.starts_with("suppress-") {
            Ok(TriageOutcome {
                decision: TriageDecision::Suppress,
                rationale: None,
            })
        } else {
            Ok(TriageOutcome::accept())
        }
    }
}

// =============================================================================
// Fixtures
// =============================================================================

fn deliverable(id: &str, files: Vec<&str>) -> Deliverable {
    Deliverable::new(id, format!("Deliverable {id}"), ChangeType::Feature, "backend", "core")
        .with_affected_files(files.into_iter().map(String::from).collect())
        .with_profiles(vec![Profile::Implementation])
}

struct Harness {
    orchestrator: PlanOrchestrator,
    store_dir: TempDir,
}

fn harness(
    config: OrchestratorConfig,
    request: ChangeRequest,
    deliverables: Vec<Deliverable>,
    executor: Arc<dyn TaskExecutor>,
    verifier: Arc<dyn VerificationRunner>,
) -> Harness {
    init_tracing();
    let store_dir = TempDir::new().unwrap();
    let store = PlanStore::open(store_dir.path()).unwrap();
    let registry = Arc::new(
        ExtensionRegistry::new()
            .with_outliner("backend", Arc::new(StaticOutliner::new(deliverables)))
            .with_triager("backend", Arc::new(RuleNameTriager)),
    );
    let context = ProjectContext::new().with_module("core", "backend");
    let orchestrator = PlanOrchestrator::intake(
        config,
        store,
        registry,
        executor,
        verifier,
        request,
        context,
    )
    .unwrap();
    Harness {
        orchestrator,
        store_dir,
    }
}

fn default_harness(request: ChangeRequest, verifier: Arc<dyn VerificationRunner>) -> Harness {
    harness(
        OrchestratorConfig::default(),
        request,
        vec![deliverable("d1", vec!["src/d1.rs"])],
        Arc::new(StubExecutor::all_done()),
        verifier,
    )
}

// =============================================================================
// Scenario A: refine loop
// =============================================================================

mod refine_loop {
    use super::*;

    #[test]
    fn test_refine_loops_exactly_twice_given_two_clarifications() {
        let mut h = default_harness(
            ChangeRequest::new("Add quota checks", "vague", 0.4),
            Arc::new(ScriptedVerifier::clean()),
        );

        // Below threshold: first clarification round
        let progress = h.orchestrator.advance().unwrap();
        assert_eq!(
            progress,
            Progress::Suspended(Suspension::AwaitingClarification)
        );
        assert_eq!(h.orchestrator.plan().counters.refine, 1);
        assert_eq!(h.orchestrator.plan().phase, PlanPhase::Refine);

        // Still below threshold: second round
        let progress = h
            .orchestrator
            .resume_with_clarification(Clarification::new("which quotas?", "API quotas", 0.6))
            .unwrap();
        assert_eq!(
            progress,
            Progress::Suspended(Suspension::AwaitingClarification)
        );
        assert_eq!(h.orchestrator.plan().counters.refine, 2);

        // Confidence now clears the threshold: refine advances
        let progress = h
            .orchestrator
            .resume_with_clarification(Clarification::new("rollout?", "behind a flag", 0.9))
            .unwrap();
        assert_eq!(progress, Progress::Suspended(Suspension::AwaitingReview));
        assert_eq!(h.orchestrator.plan().phase, PlanPhase::Outline);
        // Looped exactly twice, never a third time
        assert_eq!(h.orchestrator.plan().counters.refine, 2);
    }
}

// =============================================================================
// Scenario B: dependency-ordered task derivation
// =============================================================================

mod dependency_order {
    use super::*;

    #[test]
    fn test_tasks_generated_in_dependency_order() {
        let dependent = deliverable("consumer", vec!["src/consumer.rs"]).with_dependency("producer");
        let dependency = deliverable("producer", vec!["src/producer.rs"]);
        // The dependent is outlined first; derivation must reorder
        let mut h = harness(
            OrchestratorConfig::default(),
            ChangeRequest::new("t", "d", 0.9),
            vec![dependent, dependency],
            Arc::new(StubExecutor::all_done()),
            Arc::new(ScriptedVerifier::clean()),
        );

        h.orchestrator.advance().unwrap();
        let progress = h
            .orchestrator
            .resume_with_review(ReviewDecision::Approved)
            .unwrap();
        assert_eq!(progress, Progress::Terminal(PlanPhase::Complete));

        let tasks = h.orchestrator.board().tasks();
        assert_eq!(tasks.len(), 2);
        // The dependency's tasks strictly precede the dependent's
        assert_eq!(tasks[0].deliverable().unwrap().as_str(), "producer");
        assert_eq!(tasks[1].deliverable().unwrap().as_str(), "consumer");
        assert!(tasks[0].number < tasks[1].number);
    }

    #[test]
    fn test_cyclic_deliverables_fail_outline() {
        let a = deliverable("a", vec!["src/a.rs"]).with_dependency("b");
        let b = deliverable("b", vec!["src/b.rs"]).with_dependency("a");
        let mut h = harness(
            OrchestratorConfig::default(),
            ChangeRequest::new("t", "d", 0.9),
            vec![a, b],
            Arc::new(StubExecutor::all_done()),
            Arc::new(ScriptedVerifier::clean()),
        );

        let err = h.orchestrator.advance().unwrap_err();
        assert!(matches!(err, PlanError::DependencyCycle { .. }));
    }
}

// =============================================================================
// Outline loop: review feedback forces a re-outline
// =============================================================================

mod outline_loop {
    use super::*;

    #[test]
    fn test_changes_requested_reinvokes_outliner() {
        init_tracing();
        let _store_dir = TempDir::new().unwrap();
        let store = PlanStore::open(_store_dir.path()).unwrap();
        let outliner = Arc::new(StaticOutliner::new(vec![deliverable(
            "d1",
            vec!["src/d1.rs"],
        )]));
        let registry = Arc::new(
            ExtensionRegistry::new()
                .with_outliner("backend", outliner.clone())
                .with_triager("backend", Arc::new(RuleNameTriager)),
        );
        let mut orchestrator = PlanOrchestrator::intake(
            OrchestratorConfig::default(),
            store,
            registry,
            Arc::new(StubExecutor::all_done()),
            Arc::new(ScriptedVerifier::clean()),
            ChangeRequest::new("t", "d", 0.9),
            ProjectContext::new().with_module("core", "backend"),
        )
        .unwrap();

        orchestrator.advance().unwrap();
        assert_eq!(outliner.calls.load(Ordering::SeqCst), 1);

        // Rejected deliverables force a fresh outline; approval does not
        orchestrator
            .resume_with_review(ReviewDecision::ChangesRequested {
                feedback: "wrong module".into(),
            })
            .unwrap();
        assert_eq!(outliner.calls.load(Ordering::SeqCst), 2);

        let progress = orchestrator
            .resume_with_review(ReviewDecision::Approved)
            .unwrap();
        assert_eq!(progress, Progress::Terminal(PlanPhase::Complete));
        assert_eq!(outliner.calls.load(Ordering::SeqCst), 2);
    }
}

// =============================================================================
// Scenario C: suppress without rationale
// =============================================================================

mod suppress_validation {
    use super::*;

    #[test]
    fn test_invalid_suppress_rerouted_to_default_policy() {
        // Verification yields three findings the RuleNameTriager routes to
        // FIX, SUPPRESS-without-rationale, and ACCEPT
        let report = VerificationReport::clean()
            .with_finding(
                Finding::new("lint", "fix-unwrap", "src/d1.rs", Severity::Major, "unwrap")
                    .with_domain("backend"),
            )
            .with_finding(
                Finding::new(
                    "lint",
                    "suppress-style",
                    "src/style.rs",
                    Severity::Major,
                    "style",
                )
                .with_domain("backend"),
            )
            .with_finding(
                Finding::new("lint", "accept-nit", "src/nit.rs", Severity::Minor, "nit")
                    .with_domain("backend"),
            );
        let mut h = default_harness(
            ChangeRequest::new("t", "d", 0.9),
            Arc::new(ScriptedVerifier::new(vec![report])),
        );

        h.orchestrator.advance().unwrap();
        let progress = h
            .orchestrator
            .resume_with_review(ReviewDecision::Approved)
            .unwrap();
        assert_eq!(progress, Progress::Terminal(PlanPhase::Complete));

        let findings = h.orchestrator.findings();
        let by_rule = |rule: &str| findings.iter().find(|f| f.rule == rule).unwrap();

        // The triager's FIX stands
        assert_eq!(by_rule("fix-unwrap").decision, Some(TriageDecision::Fix));
        assert_eq!(by_rule("fix-unwrap").status, FindingStatus::FixTaskCreated);
        // The rationale-less SUPPRESS is rejected; Major qualifies for the
        // default FIX
        assert_eq!(
            by_rule("suppress-style").decision,
            Some(TriageDecision::Fix)
        );
        assert_eq!(
            by_rule("suppress-style").status,
            FindingStatus::FixTaskCreated
        );
        // ACCEPT is untouched
        assert_eq!(by_rule("accept-nit").decision, Some(TriageDecision::Accept));
        assert_eq!(by_rule("accept-nit").status, FindingStatus::Accepted);
    }
}

// =============================================================================
// Scenario D: verify loop and counters
// =============================================================================

mod verify_loop {
    use super::*;

    #[test]
    fn test_two_findings_loop_once_then_finalize() {
        let first_run = VerificationReport::clean()
            .with_finding(
                Finding::new("build", "fix-e0308", "src/d1.rs", Severity::Blocker, "mismatch")
                    .with_domain("backend"),
            )
            .with_finding(
                Finding::new("test", "fix-panics", "src/other.rs", Severity::Major, "panics")
                    .with_domain("backend"),
            );
        let mut h = default_harness(
            ChangeRequest::new("t", "d", 0.9),
            // Run 1 yields two findings, run 2 is clean
            Arc::new(ScriptedVerifier::new(vec![
                first_run,
                VerificationReport::clean(),
            ])),
        );

        h.orchestrator.advance().unwrap();
        let progress = h
            .orchestrator
            .resume_with_review(ReviewDecision::Approved)
            .unwrap();
        assert_eq!(progress, Progress::Terminal(PlanPhase::Complete));

        // Two distinct files → two fix-tasks, both executed on the loop-back
        let fix_tasks: Vec<&Task> = h
            .orchestrator
            .board()
            .tasks()
            .iter()
            .filter(|t| t.is_fix())
            .collect();
        assert_eq!(fix_tasks.len(), 2);
        assert!(fix_tasks.iter().all(|t| t.status == TaskStatus::Done));

        assert_eq!(h.orchestrator.plan().counters.verify, 2);
    }

    #[test]
    fn test_verify_ceiling_yields_failed_never_an_extra_run() {
        let config = OrchestratorConfig {
            max_verify_iterations: 3,
            ..Default::default()
        };
        let mut h = harness(
            config,
            ChangeRequest::new("t", "d", 0.9),
            vec![deliverable("d1", vec!["src/d1.rs"])],
            Arc::new(StubExecutor::all_done()),
            Arc::new(AlwaysFindingVerifier),
        );

        h.orchestrator.advance().unwrap();
        let err = h
            .orchestrator
            .resume_with_review(ReviewDecision::Approved)
            .unwrap_err();

        assert!(matches!(
            err,
            PlanError::IterationLimitExceeded {
                phase: PlanPhase::Verify,
                limit: 3
            }
        ));
        assert_eq!(h.orchestrator.plan().phase, PlanPhase::Failed);
        // Exactly the ceiling, never a fourth run
        assert_eq!(h.orchestrator.plan().counters.verify, 3);
        // The failure carries the unresolved findings verbatim
        let failure = h.orchestrator.plan().failure.as_deref().unwrap();
        assert!(failure.contains("unresolved findings"));
        assert!(failure.contains("persistent-smell"));
    }
}

// =============================================================================
// Blocked tasks and the override gate
// =============================================================================

mod blocked_tasks {
    use super::*;

    #[test]
    fn test_blocked_task_suspends_phase_five() {
        let mut h = harness(
            OrchestratorConfig::default(),
            ChangeRequest::new("t", "d", 0.9),
            vec![
                deliverable("d1", vec!["src/d1.rs"]),
                deliverable("d2", vec!["src/d2.rs"]),
            ],
            Arc::new(StubExecutor::failing_on("src/d2.rs")),
            Arc::new(ScriptedVerifier::clean()),
        );

        h.orchestrator.advance().unwrap();
        let progress = h
            .orchestrator
            .resume_with_review(ReviewDecision::Approved)
            .unwrap();

        let Progress::Suspended(Suspension::BlockedTasks { tasks }) = progress else {
            panic!("expected blocked-task suspension, got {progress:?}");
        };
        assert_eq!(tasks.len(), 1);
        assert_eq!(h.orchestrator.plan().phase, PlanPhase::Execute);
        // The executor failure surfaced as a blocking finding
        assert!(
            h.orchestrator
                .findings()
                .iter()
                .any(|f| f.source == "executor" && f.severity == Severity::Blocker)
        );
    }

    #[test]
    fn test_override_closes_phase_five() {
        let mut h = harness(
            OrchestratorConfig::default(),
            ChangeRequest::new("t", "d", 0.9),
            vec![
                deliverable("d1", vec!["src/d1.rs"]),
                deliverable("d2", vec!["src/d2.rs"]),
            ],
            Arc::new(StubExecutor::failing_on("src/d2.rs")),
            Arc::new(ScriptedVerifier::clean()),
        );

        h.orchestrator.advance().unwrap();
        h.orchestrator
            .resume_with_review(ReviewDecision::Approved)
            .unwrap();

        // Declining the override keeps the suspension
        let progress = h.orchestrator.resume_with_override(false).unwrap();
        assert!(matches!(
            progress,
            Progress::Suspended(Suspension::BlockedTasks { .. })
        ));

        // Granting it closes phase 5 into verify; the clean verification
        // leaves only the executor finding, which the triager accepts
        let progress = h.orchestrator.resume_with_override(true).unwrap();
        assert_eq!(progress, Progress::Terminal(PlanPhase::Complete));
        assert_eq!(h.orchestrator.plan().counters.verify, 1);
        // The blocked task stays blocked on the audit trail
        assert_eq!(h.orchestrator.board().blocked().len(), 1);
    }
}

// =============================================================================
// Lifecycle properties
// =============================================================================

mod properties {
    use super::*;

    #[test]
    fn test_phase_monotonicity_documented_loops_only() {
        let first_run = VerificationReport::clean().with_finding(
            Finding::new("build", "fix-it", "src/d1.rs", Severity::Blocker, "broken")
                .with_domain("backend"),
        );
        let mut h = default_harness(
            ChangeRequest::new("t", "d", 0.4),
            Arc::new(ScriptedVerifier::new(vec![
                first_run,
                VerificationReport::clean(),
            ])),
        );

        let mut phases = vec![h.orchestrator.plan().phase];
        h.orchestrator.advance().unwrap();
        phases.push(h.orchestrator.plan().phase);
        h.orchestrator
            .resume_with_clarification(Clarification::new("q", "a", 0.9))
            .unwrap();
        phases.push(h.orchestrator.plan().phase);
        h.orchestrator
            .resume_with_review(ReviewDecision::Approved)
            .unwrap();
        phases.push(h.orchestrator.plan().phase);

        // The observable stops are the suspension points and the terminal
        // state; every intermediate move is checked by
        // PlanRecord::transition_to, which rejects undocumented edges
        assert_eq!(
            phases,
            vec![
                PlanPhase::Init,
                PlanPhase::Refine,
                PlanPhase::Outline,
                PlanPhase::Complete,
            ]
        );
    }

    #[test]
    fn test_task_deliverable_referential_integrity_on_completion() {
        let first_run = VerificationReport::clean().with_finding(
            Finding::new("lint", "fix-dead", "src/d1.rs", Severity::Major, "dead code")
                .with_domain("backend"),
        );
        let mut h = default_harness(
            ChangeRequest::new("t", "d", 0.9),
            Arc::new(ScriptedVerifier::new(vec![
                first_run,
                VerificationReport::clean(),
            ])),
        );

        h.orchestrator.advance().unwrap();
        let progress = h
            .orchestrator
            .resume_with_review(ReviewDecision::Approved)
            .unwrap();
        assert_eq!(progress, Progress::Terminal(PlanPhase::Complete));

        // No orphans: every task resolves to a deliverable or a finding
        h.orchestrator
            .board()
            .check_integrity(h.orchestrator.deliverables(), h.orchestrator.findings())
            .unwrap();
    }

    #[test]
    fn test_completed_plan_round_trips_through_store() {
        let mut h = default_harness(
            ChangeRequest::new("t", "d", 0.9),
            Arc::new(ScriptedVerifier::clean()),
        );

        h.orchestrator.advance().unwrap();
        h.orchestrator
            .resume_with_review(ReviewDecision::Approved)
            .unwrap();
        let id = h.orchestrator.plan().id;

        // Reload everything from disk and compare structure
        let store = PlanStore::open(h.store_dir.path()).unwrap();
        let plan = store.load_plan(id).unwrap();
        assert_eq!(plan.phase, PlanPhase::Complete);
        assert_eq!(plan.counters, h.orchestrator.plan().counters);

        let board = store.load_tasks(id).unwrap();
        assert_eq!(board.len(), h.orchestrator.board().len());
        assert!(board.all_terminal());

        let set = store.load_deliverables(id).unwrap();
        assert_eq!(set.len(), h.orchestrator.deliverables().len());

        let request = store.load_request(id).unwrap();
        assert_eq!(request.title, "t");

        // Saving the reloaded state and loading again is idempotent
        store.save_plan(&plan).unwrap();
        let reloaded = store.load_plan(id).unwrap();
        assert_eq!(reloaded.phase, plan.phase);
        assert_eq!(reloaded.updated_at, plan.updated_at);
    }

    #[test]
    fn test_suppression_annotations_emitted_at_finalize() {
        // A triager granting a rationale-backed SUPPRESS
        struct SuppressingTriager;
        impl Triager for SuppressingTriager {
            fn triage(&self, _finding: &Finding) -> Result<TriageOutcome, ExtensionError> {
                Ok(TriageOutcome::suppress("vendored file, out of scope"))
            }
        }

        init_tracing();
        let store_dir = TempDir::new().unwrap();
        let store = PlanStore::open(store_dir.path()).unwrap();
        let registry = Arc::new(
            ExtensionRegistry::new()
                .with_outliner(
                    "backend",
                    Arc::new(StaticOutliner::new(vec![deliverable(
                        "d1",
                        vec!["src/d1.rs"],
                    )])),
                )
                .with_triager("backend", Arc::new(SuppressingTriager)),
        );
        let report = VerificationReport::clean().with_finding(
            Finding::new("lint", "style", "vendor/lib.rs", Severity::Major, "style")
                .with_domain("backend"),
        );
        let mut orchestrator = PlanOrchestrator::intake(
            OrchestratorConfig::default(),
            store,
            registry,
            Arc::new(StubExecutor::all_done()),
            Arc::new(ScriptedVerifier::new(vec![report])),
            ChangeRequest::new("t", "d", 0.9),
            ProjectContext::new().with_module("core", "backend"),
        )
        .unwrap();

        orchestrator.advance().unwrap();
        let progress = orchestrator
            .resume_with_review(ReviewDecision::Approved)
            .unwrap();
        // The sole finding was suppressed, so no loop-back happened
        assert_eq!(progress, Progress::Terminal(PlanPhase::Complete));
        assert_eq!(orchestrator.plan().counters.verify, 1);

        let store = PlanStore::open(store_dir.path()).unwrap();
        let annotations = store.load_suppressions(orchestrator.plan().id).unwrap();
        assert_eq!(annotations.len(), 1);
        assert_eq!(annotations[0].rationale, "vendored file, out of scope");
        assert_eq!(annotations[0].file, "vendor/lib.rs");
    }
}
