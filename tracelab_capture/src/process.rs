//! Spawning and stopping the external helper processes of a capture
//! (proxy binaries, capture backends and fetch clients).
use crate::error::{CaptureError, CaptureErrorKind};
use log::{debug, info, warn};
use std::fs::{self, File};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

pub struct ExternalProcess {
    name: String,
    child: Child,
    grace: Duration,
    exit_status: Option<ExitStatus>,
}

impl ExternalProcess {
    /// Starts `command` with stdout and stderr sent to `log_path`, or discarded.
    pub fn spawn(
        name: &str,
        mut command: Command,
        log_path: Option<&Path>,
        grace: Duration,
    ) -> Result<Self, CaptureError> {
        match log_path {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }
                let log = File::create(path)?;
                command.stdout(log.try_clone()?).stderr(log);
            }
            None => {
                command.stdout(Stdio::null()).stderr(Stdio::null());
            }
        }
        command.stdin(Stdio::null());
        debug!("Spawning {name}: {:?}", command);
        let child = command.spawn().map_err(|e| {
            CaptureError::new(
                CaptureErrorKind::ProcessError,
                format!("could not start {name}: {e}").as_str(),
            )
        })?;
        info!("{name} started with pid {}", child.id());
        Ok(Self {
            name: name.to_owned(),
            child,
            grace,
            exit_status: None,
        })
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&mut self) -> Result<bool, CaptureError> {
        if self.exit_status.is_some() {
            return Ok(false);
        }
        self.exit_status = self.child.try_wait()?;
        Ok(self.exit_status.is_none())
    }

    /// Waits for the process to exit. Returns `None` if `timeout` elapsed first.
    pub fn wait_timeout(
        &mut self,
        timeout: Option<Duration>,
    ) -> Result<Option<ExitStatus>, CaptureError> {
        if let Some(status) = self.exit_status {
            return Ok(Some(status));
        }
        let Some(timeout) = timeout else {
            let status = self.child.wait()?;
            self.exit_status = Some(status);
            return Ok(Some(status));
        };
        let deadline = Instant::now() + timeout;
        loop {
            if !self.is_running()? {
                return Ok(self.exit_status);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            std::thread::sleep(remaining.min(WAIT_POLL_INTERVAL));
        }
    }

    /// Asks the process to finish: SIGINT on Unix so capture backends flush their output.
    #[cfg(unix)]
    pub fn interrupt(&mut self) -> Result<(), CaptureError> {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;
        if !self.is_running()? {
            return Ok(());
        }
        kill(Pid::from_raw(self.pid() as i32), Signal::SIGINT)?;
        Ok(())
    }

    #[cfg(not(unix))]
    pub fn interrupt(&mut self) -> Result<(), CaptureError> {
        self.kill()
    }

    pub fn kill(&mut self) -> Result<(), CaptureError> {
        if !self.is_running()? {
            return Ok(());
        }
        self.child.kill()?;
        self.exit_status = Some(self.child.wait()?);
        Ok(())
    }

    /// Interrupts, waits up to the grace period, then kills.
    pub fn stop(&mut self) -> Result<Option<ExitStatus>, CaptureError> {
        if !self.is_running()? {
            return Ok(self.exit_status);
        }
        self.interrupt()?;
        if self.wait_timeout(Some(self.grace))?.is_none() {
            warn!(
                "{} (pid {}) ignored interrupt for {:?}, killing",
                self.name,
                self.pid(),
                self.grace
            );
            self.kill()?;
        }
        info!("{} (pid {}) stopped: {:?}", self.name, self.pid(), self.exit_status);
        Ok(self.exit_status)
    }
}

impl Drop for ExternalProcess {
    fn drop(&mut self) {
        if let Ok(true) = self.is_running() {
            warn!("{} (pid {}) still running on drop, killing", self.name, self.pid());
            let _ = self.kill();
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_output_goes_to_log() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("logs").join("echo.log");
        let mut command = Command::new("sh");
        command.args(["-c", "echo captured; echo failed >&2"]);
        let mut process =
            ExternalProcess::spawn("echo", command, Some(&log), Duration::from_secs(1)).unwrap();
        let status = process.wait_timeout(Some(Duration::from_secs(5))).unwrap();
        assert!(status.unwrap().success());
        let content = fs::read_to_string(&log).unwrap();
        assert!(content.contains("captured"));
        assert!(content.contains("failed"));
    }

    #[test]
    fn test_stop_interrupts_long_running() {
        let mut command = Command::new("sleep");
        command.arg("30");
        let mut process =
            ExternalProcess::spawn("sleep", command, None, Duration::from_secs(2)).unwrap();
        assert!(process.is_running().unwrap());
        assert!(process.wait_timeout(Some(Duration::from_millis(50))).unwrap().is_none());
        let started = Instant::now();
        process.stop().unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(!process.is_running().unwrap());
        process.stop().unwrap();
    }

    #[test]
    fn test_spawn_missing_binary() {
        let command = Command::new("/nonexistent/tracelab-helper");
        let err = ExternalProcess::spawn("missing", command, None, Duration::ZERO)
            .err()
            .unwrap();
        assert!(matches!(err.error_kind, CaptureErrorKind::ProcessError));
    }
}
