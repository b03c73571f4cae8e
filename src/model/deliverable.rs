//! Deliverables: the planned units of change produced by the outline phase.
//!
//! A deliverable set forms a directed acyclic graph through `depends_on`
//! references. The set validates duplicates, unknown references, and cycles
//! at outline time, and yields a producers-before-consumers ordering used
//! for task derivation.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;

use crate::errors::PlanError;

/// Identity of a deliverable, unique within a plan.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeliverableId(String);

impl DeliverableId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeliverableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DeliverableId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for DeliverableId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Kind of change a deliverable represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Feature,
    BugFix,
    Enhancement,
    TechDebt,
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Feature => "feature",
            Self::BugFix => "bug_fix",
            Self::Enhancement => "enhancement",
            Self::TechDebt => "tech_debt",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for ChangeType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "feature" => Ok(Self::Feature),
            "bug_fix" | "bugfix" => Ok(Self::BugFix),
            "enhancement" => Ok(Self::Enhancement),
            "tech_debt" | "techdebt" => Ok(Self::TechDebt),
            _ => anyhow::bail!(
                "Invalid change type '{}'. Valid values: feature, bug_fix, enhancement, tech_debt",
                s
            ),
        }
    }
}

/// A capability profile a deliverable requires — also the execution mode of
/// the tasks derived from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    Implementation,
    Testing,
    Verification,
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Implementation => "implementation",
            Self::Testing => "testing",
            Self::Verification => "verification",
        };
        write!(f, "{}", s)
    }
}

/// A planned unit of change, produced during outline.
///
/// Immutable in content after outline except through explicit re-outline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deliverable {
    pub id: DeliverableId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub change_type: ChangeType,
    pub domain: String,
    pub target_module: String,
    #[serde(default)]
    pub affected_files: Vec<String>,
    /// Required capability profiles; each expands into one task.
    pub profiles: Vec<Profile>,
    /// Deliverables that must be produced before this one.
    #[serde(default)]
    pub depends_on: Vec<DeliverableId>,
}

impl Deliverable {
    /// Create a deliverable with the implementation profile.
    pub fn new(
        id: impl Into<DeliverableId>,
        title: impl Into<String>,
        change_type: ChangeType,
        domain: impl Into<String>,
        target_module: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            change_type,
            domain: domain.into(),
            target_module: target_module.into(),
            affected_files: Vec::new(),
            profiles: vec![Profile::Implementation],
            depends_on: Vec::new(),
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the affected files.
    pub fn with_affected_files(mut self, files: Vec<String>) -> Self {
        self.affected_files = files;
        self
    }

    /// Replace the required capability profiles.
    pub fn with_profiles(mut self, profiles: Vec<Profile>) -> Self {
        self.profiles = profiles;
        self
    }

    /// Add a dependency on another deliverable.
    pub fn with_dependency(mut self, id: impl Into<DeliverableId>) -> Self {
        self.depends_on.push(id.into());
        self
    }
}

/// A validated, dependency-ordered collection of deliverables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeliverableSet {
    deliverables: Vec<Deliverable>,
}

impl DeliverableSet {
    /// Build a set, validating structure.
    ///
    /// Rejected at outline time, never silently broken:
    /// - duplicate ids and unknown dependency references (`Validation`)
    /// - deliverables without a capability profile (`Validation`)
    /// - cyclic dependency references (`DependencyCycle`)
    pub fn new(deliverables: Vec<Deliverable>) -> Result<Self, PlanError> {
        let mut index_map = HashMap::new();
        for (i, deliverable) in deliverables.iter().enumerate() {
            if index_map.insert(deliverable.id.clone(), i).is_some() {
                return Err(PlanError::validation(format!(
                    "duplicate deliverable id: {}",
                    deliverable.id
                )));
            }
            if deliverable.profiles.is_empty() {
                return Err(PlanError::validation(format!(
                    "deliverable {} has no capability profile",
                    deliverable.id
                )));
            }
        }
        for deliverable in &deliverables {
            for dep in &deliverable.depends_on {
                if !index_map.contains_key(dep) {
                    return Err(PlanError::validation(format!(
                        "unknown dependency '{}' in deliverable '{}'",
                        dep, deliverable.id
                    )));
                }
            }
        }

        let set = Self { deliverables };
        set.topological_order()?;
        Ok(set)
    }

    /// Number of deliverables.
    pub fn len(&self) -> usize {
        self.deliverables.len()
    }

    /// Check if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.deliverables.is_empty()
    }

    /// All deliverables in insertion order.
    pub fn deliverables(&self) -> &[Deliverable] {
        &self.deliverables
    }

    /// Look up a deliverable by id.
    pub fn get(&self, id: &DeliverableId) -> Option<&Deliverable> {
        self.deliverables.iter().find(|d| &d.id == id)
    }

    /// Producers-before-consumers ordering via Kahn's algorithm.
    ///
    /// The queue is processed in insertion order, so the ordering is
    /// deterministic: independent deliverables keep their outline order.
    /// Fails with `DependencyCycle` naming the deliverables still blocked
    /// when the queue drains.
    pub fn topological_order(&self) -> Result<Vec<&Deliverable>, PlanError> {
        let index_map: HashMap<&DeliverableId, usize> = self
            .deliverables
            .iter()
            .enumerate()
            .map(|(i, d)| (&d.id, i))
            .collect();

        let mut in_degree = vec![0usize; self.deliverables.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); self.deliverables.len()];
        for (to_idx, deliverable) in self.deliverables.iter().enumerate() {
            for dep in &deliverable.depends_on {
                let from_idx = index_map[dep];
                dependents[from_idx].push(to_idx);
                in_degree[to_idx] += 1;
            }
        }

        let mut queue: VecDeque<usize> = in_degree
            .iter()
            .enumerate()
            .filter(|&(_, deg)| *deg == 0)
            .map(|(i, _)| i)
            .collect();

        let mut ordered = Vec::with_capacity(self.deliverables.len());
        while let Some(node) = queue.pop_front() {
            ordered.push(&self.deliverables[node]);
            for &dependent in &dependents[node] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    queue.push_back(dependent);
                }
            }
        }

        if ordered.len() != self.deliverables.len() {
            let members: Vec<String> = in_degree
                .iter()
                .enumerate()
                .filter(|&(_, deg)| *deg > 0)
                .map(|(i, _)| self.deliverables[i].id.to_string())
                .collect();
            return Err(PlanError::DependencyCycle { members });
        }

        Ok(ordered)
    }

    /// Union of affected files across all deliverables, deduplicated in
    /// first-seen order.
    pub fn affected_files(&self) -> Vec<String> {
        let mut files = Vec::new();
        for deliverable in &self.deliverables {
            for file in &deliverable.affected_files {
                if !files.contains(file) {
                    files.push(file.clone());
                }
            }
        }
        files
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deliverable(id: &str, deps: Vec<&str>) -> Deliverable {
        let mut d = Deliverable::new(
            id,
            format!("Deliverable {}", id),
            ChangeType::Feature,
            "backend",
            "core",
        );
        for dep in deps {
            d = d.with_dependency(dep);
        }
        d
    }

    #[test]
    fn test_build_simple_set() {
        let set = DeliverableSet::new(vec![
            deliverable("d1", vec![]),
            deliverable("d2", vec!["d1"]),
            deliverable("d3", vec!["d1"]),
            deliverable("d4", vec!["d2", "d3"]),
        ])
        .unwrap();

        assert_eq!(set.len(), 4);
        let order: Vec<&str> = set
            .topological_order()
            .unwrap()
            .iter()
            .map(|d| d.id.as_str())
            .collect();
        assert_eq!(order, vec!["d1", "d2", "d3", "d4"]);
    }

    #[test]
    fn test_topological_order_puts_producers_first() {
        // d2 listed before its producer d1; ordering must flip them
        let set = DeliverableSet::new(vec![
            deliverable("d2", vec!["d1"]),
            deliverable("d1", vec![]),
        ])
        .unwrap();

        let order: Vec<&str> = set
            .topological_order()
            .unwrap()
            .iter()
            .map(|d| d.id.as_str())
            .collect();
        assert_eq!(order, vec!["d1", "d2"]);
    }

    #[test]
    fn test_cycle_detection() {
        let result = DeliverableSet::new(vec![
            deliverable("d1", vec!["d3"]),
            deliverable("d2", vec!["d1"]),
            deliverable("d3", vec!["d2"]),
        ]);

        match result {
            Err(PlanError::DependencyCycle { members }) => {
                assert_eq!(members.len(), 3);
            }
            other => panic!("Expected DependencyCycle, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let result = DeliverableSet::new(vec![deliverable("d1", vec!["ghost"])]);
        let err = result.unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let result =
            DeliverableSet::new(vec![deliverable("d1", vec![]), deliverable("d1", vec![])]);
        let err = result.unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_empty_profiles_rejected() {
        let d = deliverable("d1", vec![]).with_profiles(vec![]);
        let result = DeliverableSet::new(vec![d]);
        assert!(result.unwrap_err().to_string().contains("profile"));
    }

    #[test]
    fn test_empty_set_is_valid() {
        let set = DeliverableSet::new(vec![]).unwrap();
        assert!(set.is_empty());
        assert!(set.topological_order().unwrap().is_empty());
    }

    #[test]
    fn test_affected_files_union_dedups() {
        let d1 = deliverable("d1", vec![])
            .with_affected_files(vec!["src/a.rs".into(), "src/b.rs".into()]);
        let d2 = deliverable("d2", vec![])
            .with_affected_files(vec!["src/b.rs".into(), "src/c.rs".into()]);
        let set = DeliverableSet::new(vec![d1, d2]).unwrap();

        assert_eq!(set.affected_files(), vec!["src/a.rs", "src/b.rs", "src/c.rs"]);
    }

    #[test]
    fn test_change_type_from_str() {
        use std::str::FromStr;
        assert_eq!(ChangeType::from_str("bug_fix").unwrap(), ChangeType::BugFix);
        assert_eq!(ChangeType::from_str("Feature").unwrap(), ChangeType::Feature);
        assert!(ChangeType::from_str("unknown").is_err());
    }

    #[test]
    fn test_deliverable_serialization_roundtrip() {
        let d = deliverable("d1", vec![])
            .with_description("desc")
            .with_profiles(vec![Profile::Implementation, Profile::Testing]);

        let json = serde_json::to_string(&d).unwrap();
        let parsed: Deliverable = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.id, d.id);
        assert_eq!(parsed.profiles, d.profiles);
        assert_eq!(parsed.change_type, ChangeType::Feature);
    }
}
