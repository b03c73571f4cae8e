//! Task/deliverable data model.
//!
//! Deliverables are the planned units of change produced by outline; tasks
//! are the executable steps derived from them (or from findings, for
//! fix-tasks).

pub mod deliverable;
pub mod task;

pub use deliverable::{ChangeType, Deliverable, DeliverableId, DeliverableSet, Profile};
pub use task::{Step, StepOutcome, Task, TaskBoard, TaskOrigin, TaskStatus};
