//! Content retrieval clients.
//!
//! A fetcher is launched during `setup`, which reports the pid to monitor, and
//! driven to completion by `run`. Both current backends are external programs;
//! they differ only in how their command line is built.
use crate::config::{FetchParams, RequestConfig, RequestType};
use crate::error::{CaptureError, CaptureErrorKind};
use crate::process::ExternalProcess;
use log::{info, warn};
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

pub mod chrome;
pub mod command;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetcherInfo {
    pub process_id: u32,
}

pub trait Fetcher: Send {
    fn setup(&mut self) -> Result<FetcherInfo, CaptureError>;
    fn run(&mut self) -> Result<FetcherInfo, CaptureError>;
    fn shutdown(&mut self) -> Result<(), CaptureError>;
}

pub fn build_fetcher(
    config: &RequestConfig,
    params: FetchParams,
) -> Result<Box<dyn Fetcher>, CaptureError> {
    config.validate()?;
    let (name, command) = match config.request_type {
        RequestType::BrowserChromeSingleTab => ("chrome", chrome::chrome_command(config, &params)?),
        RequestType::Command => ("client", command::client_command(config, &params)?),
    };
    let log_path = params
        .save_log
        .then(|| params.output_dir.join(format!("{name}.log")));
    Ok(Box::new(ProcessFetcher::new(name, command, log_path, params.timeout)))
}

/// Runs one external client to completion, killing it once `timeout` elapses.
pub struct ProcessFetcher {
    name: String,
    command: Option<Command>,
    log_path: Option<PathBuf>,
    timeout: Option<Duration>,
    process: Option<ExternalProcess>,
}

impl ProcessFetcher {
    pub fn new(
        name: &str,
        command: Command,
        log_path: Option<PathBuf>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            name: name.to_owned(),
            command: Some(command),
            log_path,
            timeout,
            process: None,
        }
    }

    fn info(&self) -> Result<FetcherInfo, CaptureError> {
        let process = self.process.as_ref().ok_or(CaptureError::new(
            CaptureErrorKind::FetcherError,
            format!("{} was not set up", self.name).as_str(),
        ))?;
        Ok(FetcherInfo {
            process_id: process.pid(),
        })
    }
}

impl Fetcher for ProcessFetcher {
    fn setup(&mut self) -> Result<FetcherInfo, CaptureError> {
        if let Some(command) = self.command.take() {
            self.process = Some(ExternalProcess::spawn(
                &self.name,
                command,
                self.log_path.as_deref(),
                SHUTDOWN_GRACE,
            )?);
        }
        self.info()
    }

    fn run(&mut self) -> Result<FetcherInfo, CaptureError> {
        let info = self.info()?;
        let timeout = self.timeout;
        let name = self.name.clone();
        if let Some(process) = self.process.as_mut() {
            match process.wait_timeout(timeout)? {
                Some(status) if status.success() => info!("{name} finished"),
                Some(status) => warn!("{name} exited with {status}"),
                None => {
                    warn!("{name} exceeded {:?}, stopping it", timeout);
                    process.stop()?;
                }
            }
        }
        Ok(info)
    }

    fn shutdown(&mut self) -> Result<(), CaptureError> {
        if let Some(mut process) = self.process.take() {
            process.stop()?;
        }
        Ok(())
    }
}
