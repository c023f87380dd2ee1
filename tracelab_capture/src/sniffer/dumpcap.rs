use crate::config::{CaptureConfig, SnifferParams};
use crate::error::{CaptureError, CaptureErrorKind};
use crate::process::ExternalProcess;
use crate::sniffer::{Sniffer, ensure_started, stop_process};
use log::debug;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

const WINDOWS_DEFAULT_PATH: &str = r"C:\Program Files\Wireshark\dumpcap.exe";

pub struct DumpcapSniffer {
    binary: PathBuf,
    interface: String,
    params: SnifferParams,
    grace: Duration,
    process: Option<ExternalProcess>,
}

impl DumpcapSniffer {
    pub fn new(
        config: &CaptureConfig,
        params: SnifferParams,
        interface: &str,
    ) -> Result<Self, CaptureError> {
        let binary = match &config.binary_path {
            Some(path) => path.clone(),
            None => which::which("dumpcap").or_else(|e| {
                let fallback = PathBuf::from(WINDOWS_DEFAULT_PATH);
                if cfg!(windows) && fallback.exists() {
                    Ok(fallback)
                } else {
                    Err(e)
                }
            })?,
        };
        Ok(Self {
            binary,
            interface: interface.to_owned(),
            params,
            grace: config.stop_grace(),
            process: None,
        })
    }

    /// dumpcap numbers interfaces; `-D` lists them as `N. name (description)`.
    fn interface_index(&self) -> Result<String, CaptureError> {
        if self.interface.chars().all(|c| c.is_ascii_digit()) {
            return Ok(self.interface.clone());
        }
        let output = Command::new(&self.binary).arg("-D").output()?;
        let listing = String::from_utf8_lossy(&output.stdout);
        parse_interface_index(&listing, &self.interface).ok_or(CaptureError::new(
            CaptureErrorKind::SnifferError,
            format!("dumpcap does not list interface {}", self.interface).as_str(),
        ))
    }

    /// `dumpcap -i IDX -P -q -w OUT [-f EXPR]`; `-P` keeps the classic pcap format.
    pub fn build_command(&self, interface_index: &str) -> Command {
        let mut command = Command::new(&self.binary);
        command
            .arg("-i")
            .arg(interface_index)
            .arg("-P")
            .arg("-q")
            .arg("-w")
            .arg(&self.params.output_path);
        if let Some(expr) = &self.params.filter_expression {
            command.arg("-f").arg(expr);
        }
        command
    }
}

pub fn parse_interface_index(listing: &str, interface: &str) -> Option<String> {
    listing.lines().find_map(|line| {
        let (index, rest) = line.trim().split_once(". ")?;
        let name = rest.split(" (").next()?.trim();
        let description = rest
            .split_once(" (")
            .map(|(_, d)| d.trim_end_matches(')'))
            .unwrap_or_default();
        (name == interface || description == interface).then(|| index.to_owned())
    })
}

impl Sniffer for DumpcapSniffer {
    fn start(&mut self) -> Result<(), CaptureError> {
        if self.process.is_some() {
            return Ok(());
        }
        let index = self.interface_index()?;
        debug!("dumpcap interface {} has index {}", self.interface, index);
        let mut process = ExternalProcess::spawn(
            "dumpcap",
            self.build_command(&index),
            self.params.log_path.as_deref(),
            self.grace,
        )?;
        ensure_started(&mut process)?;
        self.process = Some(process);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        stop_process(self.process.take())
    }

    fn output_path(&self) -> &Path {
        &self.params.output_path
    }
}
