//! Task descriptor files.
//!
//! A descriptor is a human-editable YAML document holding both the static
//! definition of a task and its `capture_context`, the resumable progress that
//! is rewritten after every capture. Relative paths inside it are resolved
//! against the directory of the descriptor itself.
use crate::error::TaskError;
use chrono::{DateTime, Local};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracelab_capture::config::{ExtensionConfig, RequestConfig, SnifferConfig};
use tracelab_capture::orchestrator::CaptureSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    WebsiteSingleTab,
    WebsiteMultiTab,
}

/// Progress of a task through its target list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Initial,
    Running,
    Resume,
    Interrupt,
    Finished,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapturePolicy {
    pub capture_times: u32,
    /// Seconds a single fetch may take.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    /// Seconds to wait between two captures.
    pub visit_interval: u64,
}

impl Default for CapturePolicy {
    fn default() -> Self {
        Self {
            capture_times: 1,
            timeout: None,
            visit_interval: 0,
        }
    }
}

impl CapturePolicy {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_secs)
    }

    pub fn visit_interval(&self) -> Duration {
        Duration::from_secs(self.visit_interval)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureContext {
    pub status: TaskStatus,
    pub counter: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_perform_time: Option<DateTime<Local>>,
    pub capture_performed_times: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preference {
    pub save_log: bool,
    pub save_screenshot: bool,
}

impl Default for Preference {
    fn default() -> Self {
        Self {
            save_log: false,
            save_screenshot: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskConfig {
    pub task_name: String,
    #[serde(default)]
    pub task_note: String,
    pub task_type: TaskType,
    pub website_list_path: PathBuf,
    pub output_dir: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension_config: Option<ExtensionConfig>,
    pub request_config: RequestConfig,
    #[serde(default)]
    pub sniffer_config: SnifferConfig,
    #[serde(default)]
    pub capture_policy: CapturePolicy,
    #[serde(default)]
    pub capture_context: CaptureContext,
    #[serde(default)]
    pub preference: Preference,
}

impl TaskConfig {
    pub fn validate(&self) -> Result<(), TaskError> {
        if self.task_name.trim().is_empty() {
            return Err(TaskError::config("task_name must not be empty"));
        }
        if self.task_type != TaskType::WebsiteSingleTab {
            return Err(TaskError::config(
                format!("task type {:?} is not supported", self.task_type).as_str(),
            ));
        }
        if self.capture_policy.capture_times == 0 {
            return Err(TaskError::config("capture_times must be at least 1"));
        }
        if let Some(extension) = &self.extension_config {
            extension.validate()?;
        }
        self.request_config.validate()?;
        Ok(())
    }
}

/// A task descriptor bound to the file it was read from.
#[derive(Debug, Clone)]
pub struct TaskDescriptor {
    path: PathBuf,
    pub config: TaskConfig,
}

impl TaskDescriptor {
    pub fn load(path: &Path) -> Result<Self, TaskError> {
        let config: TaskConfig = load_yaml(path)?;
        config.validate()?;
        Ok(Self {
            path: path.to_path_buf(),
            config,
        })
    }

    pub fn new(path: &Path, config: TaskConfig) -> Self {
        Self {
            path: path.to_path_buf(),
            config,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self) -> Result<(), TaskError> {
        save_yaml(&self.path, &self.config)
    }

    pub fn website_list_path(&self) -> PathBuf {
        resolve(&self.path, &self.config.website_list_path)
    }

    /// Capture settings with every relative path made absolute.
    pub fn capture_settings(&self) -> CaptureSettings {
        let config = &self.config;
        let mut extension = config.extension_config.clone();
        if let Some(proxy) = extension.as_mut().map(|e| &mut e.proxy_config) {
            proxy.binary_file_path = proxy
                .binary_file_path
                .take()
                .map(|p| resolve_binary(&self.path, p));
            for path in [
                &mut proxy.work_dir,
                &mut proxy.node_config_dir,
                &mut proxy.config_file_path,
            ] {
                *path = path.take().map(|p| resolve(&self.path, &p));
            }
        }
        let mut request = config.request_config.clone();
        request.binary_path = request
            .binary_path
            .take()
            .map(|p| resolve_binary(&self.path, p));
        let mut sniffer = config.sniffer_config.clone();
        sniffer.capture.binary_path = sniffer
            .capture
            .binary_path
            .take()
            .map(|p| resolve_binary(&self.path, p));
        CaptureSettings {
            output_dir: resolve(&self.path, &config.output_dir),
            extension,
            request: Some(request),
            sniffer,
            timeout: config.capture_policy.timeout(),
            save_log: config.preference.save_log,
            save_screenshot: config.preference.save_screenshot,
        }
    }
}

/// `path` relative to the directory of `descriptor`.
pub fn resolve(descriptor: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match descriptor.parent() {
        Some(dir) => dir.join(path),
        None => path.to_path_buf(),
    }
}

/// Bare program names are left for a `PATH` lookup.
fn resolve_binary(descriptor: &Path, path: PathBuf) -> PathBuf {
    if path.components().count() > 1 {
        resolve(descriptor, &path)
    } else {
        path
    }
}

pub fn load_yaml<T: DeserializeOwned>(path: &Path) -> Result<T, TaskError> {
    let text = fs::read_to_string(path).map_err(|e| {
        TaskError::config(format!("cannot read {:?}: {e}", path).as_str())
    })?;
    Ok(serde_yaml::from_str(&text)?)
}

/// Writes `value` next to `path` first and renames it over, so a reader never
/// sees a half-written descriptor.
pub fn save_yaml<T: Serialize>(path: &Path, value: &T) -> Result<(), TaskError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, serde_yaml::to_string(value)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
