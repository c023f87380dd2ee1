//! Bounded-concurrency execution of a task group.
//!
//! The scheduler polls: every iteration it admits tasks in list order while
//! fewer than `max_concurrent_num` are running, reaps the ones that are done,
//! and writes the group descriptor back. Each task runs on the blocking pool,
//! since a capture blocks for the whole fetch.
use crate::config::TaskStatus;
use crate::error::TaskError;
use crate::group::{TaskGroup, TaskPerformStatus};
use crate::task::Perform;
use log::{debug, error, info, warn};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

pub type TaskLoader = Arc<dyn Fn(&Path) -> Result<Box<dyn Perform>, TaskError> + Send + Sync>;

type Running = Vec<(usize, JoinHandle<Result<TaskStatus, TaskError>>)>;

pub struct TaskGroupScheduler {
    group: TaskGroup,
    loader: TaskLoader,
    poll_interval: Duration,
}

impl TaskGroupScheduler {
    pub fn new(group: TaskGroup, loader: TaskLoader, poll_interval: Duration) -> Self {
        Self {
            group,
            loader,
            poll_interval,
        }
    }

    pub fn group(&self) -> &TaskGroup {
        &self.group
    }

    /// Runs until every task has ended or `stop` is cancelled. On stop, the
    /// running tasks are told to interrupt and awaited.
    pub async fn run(&mut self, stop: CancellationToken) -> Result<(), TaskError> {
        let tasks = CancellationToken::new();
        let mut running: Running = Vec::new();
        let mut next = 0;
        let total = self.group.config.task_list.len();
        info!(
            "Task group {} with {} task(s), at most {} at once",
            self.group.config.task_group_name, total, self.group.config.max_concurrent_num
        );
        loop {
            if stop.is_cancelled() {
                info!("Stopping {} running task(s)", running.len());
                tasks.cancel();
                for (index, handle) in running.drain(..) {
                    let outcome = handle.await;
                    self.record(index, outcome);
                }
                self.persist();
                return Ok(());
            }

            while next < total && running.len() < self.group.config.max_concurrent_num {
                let index = next;
                next += 1;
                if let Some(handle) = self.admit(index, &tasks) {
                    running.push((index, handle));
                }
            }

            let mut pending = Vec::with_capacity(running.len());
            for (index, handle) in running.drain(..) {
                if handle.is_finished() {
                    let outcome = handle.await;
                    self.record(index, outcome);
                } else {
                    pending.push((index, handle));
                }
            }
            running = pending;
            self.persist();

            if next >= total && running.is_empty() {
                info!("Task group {} done", self.group.config.task_group_name);
                return Ok(());
            }
            tokio::select! {
                _ = stop.cancelled() => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    /// Starts the `index`-th task unless it cannot be loaded or is already finished.
    fn admit(
        &mut self,
        index: usize,
        cancel: &CancellationToken,
    ) -> Option<JoinHandle<Result<TaskStatus, TaskError>>> {
        let path = self.group.task_path(index)?;
        let mut task = match (self.loader)(&path) {
            Ok(task) => task,
            Err(e) => {
                error!("Cannot load task {:?}: {e}", path);
                self.group.set_status(index, TaskPerformStatus::Interrupt);
                return None;
            }
        };
        if task.is_finished() {
            debug!("Task {} already finished, skipping", task.name());
            self.group.set_status(index, TaskPerformStatus::Finished);
            return None;
        }
        info!("Starting task {}", task.name());
        self.group.set_status(index, TaskPerformStatus::Performing);
        let cancel = cancel.clone();
        Some(tokio::task::spawn_blocking(move || task.perform(&cancel)))
    }

    fn record(&mut self, index: usize, outcome: Result<Result<TaskStatus, TaskError>, JoinError>) {
        let name = self
            .group
            .config
            .task_list
            .get(index)
            .map(|entry| entry.task_name.clone())
            .unwrap_or_default();
        let status = match outcome {
            Ok(Ok(TaskStatus::Finished)) => {
                info!("Task {name} finished");
                TaskPerformStatus::Finished
            }
            Ok(Ok(status)) => {
                warn!("Task {name} ended as {:?}", status);
                TaskPerformStatus::Interrupt
            }
            Ok(Err(e)) => {
                error!("Task {name} failed: {e}");
                TaskPerformStatus::Interrupt
            }
            Err(e) => {
                error!("Task {name} panicked or was aborted: {}", TaskError::from(e));
                TaskPerformStatus::Interrupt
            }
        };
        self.group.set_status(index, status);
    }

    fn persist(&self) {
        if let Err(e) = self.group.save() {
            error!("Could not save task group {:?}: {e}", self.group.path());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TaskErrorKind;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    #[derive(Default)]
    struct Gauge {
        current: AtomicUsize,
        peak: AtomicUsize,
        started: AtomicUsize,
    }

    enum Behaviour {
        Work(Duration),
        UntilCancelled,
        Finished,
        Fail,
    }

    struct FakeTask {
        name: String,
        behaviour: Behaviour,
        gauge: Arc<Gauge>,
    }

    impl Perform for FakeTask {
        fn name(&self) -> &str {
            &self.name
        }

        fn is_finished(&self) -> bool {
            matches!(self.behaviour, Behaviour::Finished)
        }

        fn perform(&mut self, cancel: &CancellationToken) -> Result<TaskStatus, TaskError> {
            self.gauge.started.fetch_add(1, Ordering::SeqCst);
            let now = self.gauge.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.gauge.peak.fetch_max(now, Ordering::SeqCst);
            let result = match self.behaviour {
                Behaviour::Work(duration) => {
                    std::thread::sleep(duration);
                    Ok(TaskStatus::Finished)
                }
                Behaviour::UntilCancelled => {
                    while !cancel.is_cancelled() {
                        std::thread::sleep(Duration::from_millis(5));
                    }
                    Ok(TaskStatus::Interrupt)
                }
                Behaviour::Finished => Ok(TaskStatus::Finished),
                Behaviour::Fail => Err(TaskError::config("broken")),
            };
            self.gauge.current.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }

    /// Group file whose task paths name the fake behaviour, e.g. `work.yaml`.
    fn group_file(dir: &Path, tasks: &[&str], max: usize) -> TaskGroup {
        let list: String = tasks
            .iter()
            .enumerate()
            .map(|(i, kind)| format!("  - task_name: t{i}\n    task_file_path: {kind}-{i}.yaml\n"))
            .collect();
        let path = dir.join("group.yaml");
        fs::write(
            &path,
            format!("task_group_name: test\nmax_concurrent_num: {max}\ntask_list:\n{list}"),
        )
        .unwrap();
        TaskGroup::load(&path).unwrap()
    }

    fn loader(gauge: Arc<Gauge>) -> TaskLoader {
        Arc::new(move |path: &Path| {
            let stem = path.file_stem().unwrap().to_string_lossy().into_owned();
            let behaviour = match stem.split('-').next().unwrap() {
                "work" => Behaviour::Work(Duration::from_millis(50)),
                "forever" => Behaviour::UntilCancelled,
                "done" => Behaviour::Finished,
                "fail" => Behaviour::Fail,
                _ => return Err(TaskError::new(TaskErrorKind::ConfigError, "unknown task")),
            };
            Ok(Box::new(FakeTask {
                name: stem,
                behaviour,
                gauge: gauge.clone(),
            }) as Box<dyn Perform>)
        })
    }

    fn statuses(path: &Path) -> Vec<TaskPerformStatus> {
        TaskGroup::load(path)
            .unwrap()
            .config
            .task_list
            .iter()
            .map(|entry| entry.status)
            .collect()
    }

    #[tokio::test]
    async fn test_single_slot_never_overlaps() {
        let dir = TempDir::new().unwrap();
        let group = group_file(dir.path(), &["work", "work"], 1);
        let path = group.path().to_path_buf();
        let gauge = Arc::new(Gauge::default());
        let mut scheduler =
            TaskGroupScheduler::new(group, loader(gauge.clone()), Duration::from_millis(5));
        scheduler.run(CancellationToken::new()).await.unwrap();

        assert_eq!(gauge.started.load(Ordering::SeqCst), 2);
        assert_eq!(gauge.peak.load(Ordering::SeqCst), 1);
        assert_eq!(
            statuses(&path),
            vec![TaskPerformStatus::Finished, TaskPerformStatus::Finished]
        );
    }

    #[tokio::test]
    async fn test_parallel_slots_are_used() {
        let dir = TempDir::new().unwrap();
        let group = group_file(dir.path(), &["forever", "forever", "forever"], 2);
        let gauge = Arc::new(Gauge::default());
        let mut scheduler =
            TaskGroupScheduler::new(group, loader(gauge.clone()), Duration::from_millis(5));
        let stop = CancellationToken::new();
        let stopper = stop.clone();
        let watcher = gauge.clone();
        tokio::spawn(async move {
            while watcher.started.load(Ordering::SeqCst) < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            stopper.cancel();
        });
        scheduler.run(stop).await.unwrap();
        assert_eq!(gauge.peak.load(Ordering::SeqCst), 2);
        assert_eq!(gauge.started.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_stop_interrupts_running_tasks() {
        let dir = TempDir::new().unwrap();
        let group = group_file(dir.path(), &["forever", "work"], 1);
        let path = group.path().to_path_buf();
        let gauge = Arc::new(Gauge::default());
        let mut scheduler =
            TaskGroupScheduler::new(group, loader(gauge.clone()), Duration::from_millis(5));
        let stop = CancellationToken::new();
        let stopper = stop.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            stopper.cancel();
        });
        scheduler.run(stop).await.unwrap();

        assert_eq!(gauge.current.load(Ordering::SeqCst), 0);
        assert_eq!(
            statuses(&path),
            vec![TaskPerformStatus::Interrupt, TaskPerformStatus::Standby]
        );
    }

    #[tokio::test]
    async fn test_finished_failed_and_unloadable_tasks() {
        let dir = TempDir::new().unwrap();
        let group = group_file(dir.path(), &["done", "fail", "missing", "work"], 1);
        let path = group.path().to_path_buf();
        let gauge = Arc::new(Gauge::default());
        let mut scheduler =
            TaskGroupScheduler::new(group, loader(gauge.clone()), Duration::from_millis(5));
        scheduler.run(CancellationToken::new()).await.unwrap();

        assert_eq!(gauge.started.load(Ordering::SeqCst), 2);
        assert_eq!(
            statuses(&path),
            vec![
                TaskPerformStatus::Finished,
                TaskPerformStatus::Interrupt,
                TaskPerformStatus::Interrupt,
                TaskPerformStatus::Finished
            ]
        );
    }
}
