use crate::config::{CaptureConfig, SnifferParams};
use crate::error::CaptureError;
use crate::process::ExternalProcess;
use crate::sniffer::{Sniffer, ensure_started, stop_process};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

pub struct TcpdumpSniffer {
    binary: PathBuf,
    interface: String,
    params: SnifferParams,
    grace: Duration,
    process: Option<ExternalProcess>,
}

impl TcpdumpSniffer {
    pub fn new(
        config: &CaptureConfig,
        params: SnifferParams,
        interface: &str,
    ) -> Result<Self, CaptureError> {
        let binary = match &config.binary_path {
            Some(path) => path.clone(),
            None => which::which("tcpdump")?,
        };
        Ok(Self {
            binary,
            interface: interface.to_owned(),
            params,
            grace: config.stop_grace(),
            process: None,
        })
    }

    /// `tcpdump -i IF -U -w OUT [EXPR]`, packet-buffered so a stop loses nothing.
    pub fn build_command(&self) -> Command {
        let mut command = Command::new(&self.binary);
        command
            .arg("-i")
            .arg(&self.interface)
            .arg("-U")
            .arg("-w")
            .arg(&self.params.output_path);
        if let Some(expr) = &self.params.filter_expression {
            command.arg(expr);
        }
        command
    }
}

impl Sniffer for TcpdumpSniffer {
    fn start(&mut self) -> Result<(), CaptureError> {
        if self.process.is_some() {
            return Ok(());
        }
        let mut process = ExternalProcess::spawn(
            "tcpdump",
            self.build_command(),
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_command() {
        let config = CaptureConfig {
            binary_path: Some(PathBuf::from("/usr/sbin/tcpdump")),
            ..CaptureConfig::default()
        };
        let params = SnifferParams {
            interface: None,
            filter_expression: Some("host 203.0.113.7 and port 443".to_owned()),
            output_path: PathBuf::from("/tmp/out/example.com_now.pcap"),
            log_path: None,
        };
        let sniffer = TcpdumpSniffer::new(&config, params, "eth0").unwrap();
        let command = sniffer.build_command();
        assert_eq!(command.get_program(), "/usr/sbin/tcpdump");
        let args: Vec<_> = command.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            vec![
                "-i",
                "eth0",
                "-U",
                "-w",
                "/tmp/out/example.com_now.pcap",
                "host 203.0.113.7 and port 443"
            ]
        );
    }

    #[test]
    fn test_stop_without_start() {
        let config = CaptureConfig {
            binary_path: Some(PathBuf::from("tcpdump")),
            ..CaptureConfig::default()
        };
        let params = SnifferParams {
            interface: None,
            filter_expression: None,
            output_path: PathBuf::from("capture.pcap"),
            log_path: None,
        };
        let mut sniffer = TcpdumpSniffer::new(&config, params, "en0").unwrap();
        assert_eq!(sniffer.build_command().get_args().count(), 5);
        sniffer.stop().unwrap();
    }
}
