//! Resumable execution of one task.
//!
//! The task walks its target list in order and performs `capture_times`
//! captures per target. `capture_context.counter` is the index of the current
//! target and `capture_performed_times` the captures already done for it; both
//! are written back to the descriptor after every capture, so a restarted task
//! repeats at most the capture that was in flight and never skips a target.
use crate::config::{TaskDescriptor, TaskStatus};
use crate::error::TaskError;
use crate::targets::load_targets;
use chrono::Local;
use log::{error, info, warn};
use std::fmt::{Display, Formatter};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracelab_capture::error::{CaptureError, CaptureErrorKind};
use tracelab_capture::orchestrator::{CaptureOrchestrator, CaptureReport, CaptureSettings};
use tracelab_core::error::CoreErrorKind;
use tracelab_core::utils::sleep_unless_cancelled;

/// Performs a single capture.
pub trait CaptureRunner: Send + Sync {
    fn capture(
        &self,
        url: &str,
        settings: &CaptureSettings,
        cancel: &CancellationToken,
    ) -> Result<CaptureReport, CaptureError>;
}

impl CaptureRunner for CaptureOrchestrator {
    fn capture(
        &self,
        url: &str,
        settings: &CaptureSettings,
        cancel: &CancellationToken,
    ) -> Result<CaptureReport, CaptureError> {
        CaptureOrchestrator::capture(self, url, settings, cancel)
    }
}

/// Scheduler-facing view of a task.
pub trait Perform: Send {
    fn name(&self) -> &str;
    fn is_finished(&self) -> bool;
    /// Runs until finished or interrupted. Blocking.
    fn perform(&mut self, cancel: &CancellationToken) -> Result<TaskStatus, TaskError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskProgress {
    pub total: usize,
    pub done: usize,
    pub current: Option<String>,
}

impl Display for TaskProgress {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.done, self.total)?;
        if let Some(current) = &self.current {
            write!(f, " (next {current})")?;
        }
        Ok(())
    }
}

pub struct TaskStateMachine {
    descriptor: TaskDescriptor,
    runner: Arc<dyn CaptureRunner>,
}

impl TaskStateMachine {
    pub fn new(descriptor: TaskDescriptor, runner: Arc<dyn CaptureRunner>) -> Self {
        Self { descriptor, runner }
    }

    pub fn load(path: &Path, runner: Arc<dyn CaptureRunner>) -> Result<Self, TaskError> {
        Ok(Self::new(TaskDescriptor::load(path)?, runner))
    }

    pub fn descriptor(&self) -> &TaskDescriptor {
        &self.descriptor
    }

    pub fn status(&self) -> TaskStatus {
        self.descriptor.config.capture_context.status
    }

    pub fn progress(&self, targets: &[String]) -> TaskProgress {
        let done = self.descriptor.config.capture_context.counter.min(targets.len());
        TaskProgress {
            total: targets.len(),
            done,
            current: targets.get(done).cloned(),
        }
    }

    /// Drives the task from its persisted context. A finished task is left alone.
    pub fn run(&mut self, cancel: &CancellationToken) -> Result<TaskStatus, TaskError> {
        let name = self.descriptor.config.task_name.clone();
        if self.status() == TaskStatus::Finished {
            info!("Task {name} is already finished");
            return Ok(TaskStatus::Finished);
        }
        let targets = match load_targets(&self.descriptor.website_list_path()) {
            Ok(targets) => targets,
            Err(e) => {
                self.set_status(TaskStatus::Interrupt)?;
                return Err(e);
            }
        };

        let context = &mut self.descriptor.config.capture_context;
        if context.counter > targets.len() {
            error!(
                "Task {name} cannot resume: counter {} is beyond {} target(s)",
                context.counter,
                targets.len()
            );
            self.set_status(TaskStatus::Interrupt)?;
            return Ok(TaskStatus::Interrupt);
        }
        context.status = match context.status {
            TaskStatus::Initial => TaskStatus::Running,
            _ => TaskStatus::Resume,
        };
        if context.status == TaskStatus::Resume {
            info!(
                "Resuming task {name} at target {} after {} capture(s)",
                context.counter, context.capture_performed_times
            );
        }
        self.descriptor.save()?;

        let settings = self.descriptor.capture_settings();
        let policy = self.descriptor.config.capture_policy.clone();
        while self.descriptor.config.capture_context.counter < targets.len() {
            let index = self.descriptor.config.capture_context.counter;
            let url = &targets[index];
            while self.descriptor.config.capture_context.capture_performed_times
                < policy.capture_times
            {
                if cancel.is_cancelled() {
                    return self.interrupt();
                }
                let round = self.descriptor.config.capture_context.capture_performed_times + 1;
                match self.runner.capture(url, &settings, cancel) {
                    Ok(report) => info!(
                        "Task {name}: capture {round}/{} of {url} saved to {:?}",
                        policy.capture_times, report.output_dir
                    ),
                    Err(e) if is_cancellation(&e) => return self.interrupt(),
                    Err(e) if e.is_config_error() => {
                        error!("Task {name}: capture of {url} is misconfigured: {e}");
                        self.set_status(TaskStatus::Interrupt)?;
                        return Err(e.into());
                    }
                    Err(e) => warn!("Task {name}: capture {round} of {url} failed: {e}"),
                }
                let context = &mut self.descriptor.config.capture_context;
                context.capture_performed_times += 1;
                context.last_perform_time = Some(Local::now());
                self.descriptor.save()?;

                let last = round >= policy.capture_times && index + 1 == targets.len();
                if !last {
                    sleep_unless_cancelled(policy.visit_interval(), cancel);
                }
            }
            let context = &mut self.descriptor.config.capture_context;
            context.counter += 1;
            context.capture_performed_times = 0;
            context.last_perform_time = Some(Local::now());
            self.descriptor.save()?;
            info!("Task {name} progress {}", self.progress(&targets));
        }
        info!("Task {name} finished");
        self.set_status(TaskStatus::Finished)?;
        Ok(TaskStatus::Finished)
    }

    fn interrupt(&mut self) -> Result<TaskStatus, TaskError> {
        info!(
            "Task {} interrupted at target {}",
            self.descriptor.config.task_name, self.descriptor.config.capture_context.counter
        );
        self.set_status(TaskStatus::Interrupt)?;
        Ok(TaskStatus::Interrupt)
    }

    fn set_status(&mut self, status: TaskStatus) -> Result<(), TaskError> {
        self.descriptor.config.capture_context.status = status;
        self.descriptor.save()
    }
}

impl Perform for TaskStateMachine {
    fn name(&self) -> &str {
        &self.descriptor.config.task_name
    }

    fn is_finished(&self) -> bool {
        self.status() == TaskStatus::Finished
    }

    fn perform(&mut self, cancel: &CancellationToken) -> Result<TaskStatus, TaskError> {
        self.run(cancel)
    }
}

fn is_cancellation(error: &CaptureError) -> bool {
    matches!(
        &error.error_kind,
        CaptureErrorKind::CoreError(e) if matches!(e.error_kind, CoreErrorKind::Cancelled)
    )
}
