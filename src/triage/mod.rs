//! Findings and the triage pipeline.

pub mod finding;
pub mod pipeline;

pub use finding::{Finding, FindingId, FindingStatus, Severity, TriageDecision, TriageOutcome};
pub use pipeline::{SuppressionAnnotation, TriagePipeline, TriageReport, suppression_annotations};
