//! Task group descriptors.
use crate::config::{load_yaml, resolve, save_yaml};
use crate::error::TaskError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Scheduler bookkeeping for one task of a group. Unrelated to the task's own
/// [`crate::config::TaskStatus`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPerformStatus {
    #[default]
    Standby,
    Performing,
    Interrupt,
    Finished,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Performable {
    pub task_name: String,
    pub task_file_path: PathBuf,
    #[serde(default)]
    pub status: TaskPerformStatus,
}

fn default_max_concurrent() -> usize {
    1
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskGroupConfig {
    pub task_group_name: String,
    #[serde(default)]
    pub task_group_note: String,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_num: usize,
    #[serde(default)]
    pub task_list: Vec<Performable>,
}

#[derive(Debug, Clone)]
pub struct TaskGroup {
    path: PathBuf,
    pub config: TaskGroupConfig,
}

impl TaskGroup {
    pub fn load(path: &Path) -> Result<Self, TaskError> {
        let config: TaskGroupConfig = load_yaml(path)?;
        if config.max_concurrent_num == 0 {
            return Err(TaskError::config("max_concurrent_num must be at least 1"));
        }
        Ok(Self {
            path: path.to_path_buf(),
            config,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self) -> Result<(), TaskError> {
        save_yaml(&self.path, &self.config)
    }

    /// Descriptor of the `index`-th task, relative paths taken from the group file.
    pub fn task_path(&self, index: usize) -> Option<PathBuf> {
        self.config
            .task_list
            .get(index)
            .map(|entry| resolve(&self.path, &entry.task_file_path))
    }

    pub fn set_status(&mut self, index: usize, status: TaskPerformStatus) {
        if let Some(entry) = self.config.task_list.get_mut(index) {
            entry.status = status;
        }
    }
}
