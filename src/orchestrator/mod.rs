//! The phase orchestrator and its boundary interfaces.

pub mod driver;
pub mod interfaces;

pub use driver::{PlanOrchestrator, Progress, Suspension};
pub use interfaces::{
    CheckCategory, ExecutionContext, ReviewDecision, TaskExecution, TaskExecutor,
    VerificationReport, VerificationRunner, VerificationScope,
};
