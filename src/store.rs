//! Durable per-plan persistence.
//!
//! Artifacts are stored under `<root>/plans/<plan_id>/` as pretty-printed
//! JSON, one file per artifact, so the state is human-diffable:
//!
//! ```text
//! <root>/plans/<plan_id>/
//! ├── plan.json           # PlanRecord (phase, counters, domains)
//! ├── request.json        # ChangeRequest with clarifications
//! ├── deliverables.json   # DeliverableSet
//! ├── tasks.json          # TaskBoard
//! ├── findings.json       # Finding log
//! └── suppressions.json   # SuppressionAnnotation list (finalize)
//! ```
//!
//! Each artifact is the unit of atomic update: writes go to a `.tmp`
//! sibling and are renamed into place, so a crash mid-write can never leave
//! a torn file. Related records that must stay consistent (a task and its
//! parent deliverable reference) live inside one artifact.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::StoreError;
use crate::intake::ChangeRequest;
use crate::model::{DeliverableSet, TaskBoard};
use crate::plan::{PlanId, PlanRecord};
use crate::triage::{Finding, SuppressionAnnotation};

const PLAN_FILE: &str = "plan.json";
const REQUEST_FILE: &str = "request.json";
const DELIVERABLES_FILE: &str = "deliverables.json";
const TASKS_FILE: &str = "tasks.json";
const FINDINGS_FILE: &str = "findings.json";
const SUPPRESSIONS_FILE: &str = "suppressions.json";

/// File-backed store for plan artifacts.
#[derive(Debug, Clone)]
pub struct PlanStore {
    root: PathBuf,
}

impl PlanStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        let plans = root.join("plans");
        fs::create_dir_all(&plans).map_err(|source| StoreError::WriteFailed {
            path: plans.clone(),
            source,
        })?;
        Ok(Self { root })
    }

    /// Directory holding a plan's artifacts.
    pub fn plan_dir(&self, id: PlanId) -> PathBuf {
        self.root.join("plans").join(id.to_string())
    }

    /// List ids of all persisted plans.
    pub fn list_plans(&self) -> Result<Vec<String>, StoreError> {
        let plans = self.root.join("plans");
        let entries = fs::read_dir(&plans).map_err(|source| StoreError::ReadFailed {
            path: plans.clone(),
            source,
        })?;
        let mut ids = Vec::new();
        for entry in entries.flatten() {
            if entry.path().is_dir() {
                ids.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    pub fn save_plan(&self, plan: &PlanRecord) -> Result<(), StoreError> {
        self.write_artifact(plan.id, PLAN_FILE, plan)
    }

    pub fn load_plan(&self, id: PlanId) -> Result<PlanRecord, StoreError> {
        let path = self.plan_dir(id).join(PLAN_FILE);
        if !path.exists() {
            return Err(StoreError::PlanNotFound { id: id.to_string() });
        }
        self.read_artifact(&path)
    }

    pub fn save_request(&self, id: PlanId, request: &ChangeRequest) -> Result<(), StoreError> {
        self.write_artifact(id, REQUEST_FILE, request)
    }

    pub fn load_request(&self, id: PlanId) -> Result<ChangeRequest, StoreError> {
        self.read_artifact(&self.plan_dir(id).join(REQUEST_FILE))
    }

    pub fn save_deliverables(&self, id: PlanId, set: &DeliverableSet) -> Result<(), StoreError> {
        self.write_artifact(id, DELIVERABLES_FILE, set)
    }

    pub fn load_deliverables(&self, id: PlanId) -> Result<DeliverableSet, StoreError> {
        self.read_artifact(&self.plan_dir(id).join(DELIVERABLES_FILE))
    }

    pub fn save_tasks(&self, id: PlanId, board: &TaskBoard) -> Result<(), StoreError> {
        self.write_artifact(id, TASKS_FILE, board)
    }

    pub fn load_tasks(&self, id: PlanId) -> Result<TaskBoard, StoreError> {
        self.read_artifact(&self.plan_dir(id).join(TASKS_FILE))
    }

    pub fn save_findings(&self, id: PlanId, findings: &[Finding]) -> Result<(), StoreError> {
        self.write_artifact(id, FINDINGS_FILE, &findings)
    }

    pub fn load_findings(&self, id: PlanId) -> Result<Vec<Finding>, StoreError> {
        self.read_artifact(&self.plan_dir(id).join(FINDINGS_FILE))
    }

    pub fn save_suppressions(
        &self,
        id: PlanId,
        annotations: &[SuppressionAnnotation],
    ) -> Result<(), StoreError> {
        self.write_artifact(id, SUPPRESSIONS_FILE, &annotations)
    }

    pub fn load_suppressions(&self, id: PlanId) -> Result<Vec<SuppressionAnnotation>, StoreError> {
        self.read_artifact(&self.plan_dir(id).join(SUPPRESSIONS_FILE))
    }

    /// Serialize `value` and atomically replace the artifact.
    fn write_artifact<T: Serialize>(
        &self,
        id: PlanId,
        name: &str,
        value: &T,
    ) -> Result<(), StoreError> {
        let dir = self.plan_dir(id);
        fs::create_dir_all(&dir).map_err(|source| StoreError::WriteFailed {
            path: dir.clone(),
            source,
        })?;

        let content =
            serde_json::to_string_pretty(value).map_err(|source| StoreError::EncodeFailed {
                name: name.to_string(),
                source,
            })?;

        let path = dir.join(name);
        let tmp = dir.join(format!("{name}.tmp"));
        fs::write(&tmp, content).map_err(|source| StoreError::WriteFailed {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &path).map_err(|source| StoreError::WriteFailed { path, source })?;
        tracing::debug!(plan = %id, artifact = name, "artifact written");
        Ok(())
    }

    fn read_artifact<T: DeserializeOwned>(&self, path: &Path) -> Result<T, StoreError> {
        let content = fs::read_to_string(path).map_err(|source| StoreError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| StoreError::DecodeFailed {
            path: path.to_path_buf(),
            source,
        })
    }
}
