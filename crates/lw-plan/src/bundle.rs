//! [`TaskBundle`]: the on-disk directory a staged workflow is executed
//! from — a task descriptor, the plan it was staged for, and its own copy
//! of the referenced data/transform libraries. Grounded on the "Task
//! bundle" entry in the data model (`task.<ext>`, `plan.<ext>`,
//! `data/<lib-key>/…`, `transforms/<lib-key>/…`).

use crate::error::PlanError;
use crate::plan::WorkflowPlan;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Agent-facing descriptor stored alongside a staged plan: arbitrary runner
/// configuration plus the keys of every library the plan's steps reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDescriptor {
    /// The staged plan's stable key.
    pub plan_key: String,
    /// Keys of every data/transform library the bundle carries a copy of.
    pub library_keys: Vec<String>,
    /// Free-form runner configuration (e.g. `nextflow` parameter overrides).
    pub config: serde_json::Value,
}

/// A directory bundling a [`WorkflowPlan`] with everything an agent needs
/// to execute it: the task descriptor, the plan itself, and (by
/// convention, alongside this struct's `root`) `data/<lib-key>/` and
/// `transforms/<lib-key>/` copies of the referenced libraries.
#[derive(Debug, Clone)]
pub struct TaskBundle {
    /// The bundle's root directory.
    pub root: PathBuf,
    /// The task descriptor.
    pub task: TaskDescriptor,
    /// The staged plan.
    pub plan: WorkflowPlan,
}

impl TaskBundle {
    /// Directory a library named `lib_key` has its data payload copied
    /// under, relative to `root`.
    pub fn data_dir(&self, lib_key: &str) -> PathBuf {
        self.root.join("data").join(lib_key)
    }

    /// Directory a library named `lib_key` has its transform definitions
    /// copied under, relative to `root`.
    pub fn transforms_dir(&self, lib_key: &str) -> PathBuf {
        self.root.join("transforms").join(lib_key)
    }

    /// Write `task.json` and `plan.json` under `root`, creating it first if
    /// necessary. Does not copy library payloads — callers populate
    /// `data/`/`transforms/` themselves via [`Self::data_dir`]/
    /// [`Self::transforms_dir`].
    pub fn save_as(&self, root: &Path) -> Result<(), PlanError> {
        std::fs::create_dir_all(root).map_err(|e| PlanError::SerializationFailed { reason: e.to_string() })?;
        let task_content =
            serde_json::to_string_pretty(&self.task).map_err(|e| PlanError::SerializationFailed { reason: e.to_string() })?;
        std::fs::write(root.join("task.json"), task_content)
            .map_err(|e| PlanError::SerializationFailed { reason: e.to_string() })?;
        self.plan.save(&root.join("plan.json"))
    }

    /// Load a bundle previously written by [`Self::save_as`].
    pub fn load(root: &Path) -> Result<Self, PlanError> {
        let task_content = std::fs::read_to_string(root.join("task.json"))
            .map_err(|e| PlanError::SerializationFailed { reason: e.to_string() })?;
        let task: TaskDescriptor =
            serde_json::from_str(&task_content).map_err(|e| PlanError::SerializationFailed { reason: e.to_string() })?;
        let plan = WorkflowPlan::load(&root.join("plan.json"))?;
        Ok(Self { root: root.to_path_buf(), task, plan })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn sample_plan() -> WorkflowPlan {
        WorkflowPlan {
            given: BTreeMap::new(),
            steps: Vec::new(),
            targets: BTreeMap::new(),
        }
    }

    #[test]
    fn save_as_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = TaskBundle {
            root: dir.path().to_path_buf(),
            task: TaskDescriptor {
                plan_key: "abc123".into(),
                library_keys: vec!["core".into()],
                config: serde_json::json!({"nextflow": {"threads": 4}}),
            },
            plan: sample_plan(),
        };
        bundle.save_as(dir.path()).unwrap();

        let loaded = TaskBundle::load(dir.path()).unwrap();
        assert_eq!(loaded.task.plan_key, "abc123");
        assert_eq!(loaded.task.library_keys, vec!["core".to_string()]);
    }

    #[test]
    fn data_dir_and_transforms_dir_are_scoped_by_library_key() {
        let bundle = TaskBundle {
            root: PathBuf::from("/tasks/t1"),
            task: TaskDescriptor { plan_key: "k".into(), library_keys: vec![], config: serde_json::json!({}) },
            plan: sample_plan(),
        };
        assert_eq!(bundle.data_dir("core"), PathBuf::from("/tasks/t1/data/core"));
        assert_eq!(bundle.transforms_dir("core"), PathBuf::from("/tasks/t1/transforms/core"));
    }
}
