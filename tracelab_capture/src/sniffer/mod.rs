//! Packet capture backends.
//!
//! A [`Sniffer`] records traffic of one interface into a pcap file between
//! `start` and `stop`. The backend is picked from [`CaptureConfig::backend`],
//! with `auto` resolving to dumpcap on Windows, tcpdump on Linux and macOS,
//! and the in-process libpcap recorder elsewhere.
use crate::config::{CaptureConfig, SnifferBackend, SnifferParams};
use crate::error::{CaptureError, CaptureErrorKind};
use crate::process::ExternalProcess;
use log::debug;
use std::path::Path;
use std::time::Duration;
use tracelab_core::interface::{detect_capture_interface, find_interface};

pub mod dumpcap;
pub mod libpcap;
pub mod tcpdump;

pub use dumpcap::DumpcapSniffer;
pub use libpcap::LibpcapSniffer;
pub use tcpdump::TcpdumpSniffer;

/// How long an external backend gets to fail before it is considered listening.
const STARTUP_CHECK: Duration = Duration::from_millis(500);

pub trait Sniffer: Send {
    fn start(&mut self) -> Result<(), CaptureError>;
    fn stop(&mut self) -> Result<(), CaptureError>;
    fn output_path(&self) -> &Path;
}

pub fn platform_backend() -> SnifferBackend {
    if cfg!(target_os = "windows") {
        SnifferBackend::Dumpcap
    } else if cfg!(any(target_os = "linux", target_os = "macos")) {
        SnifferBackend::Tcpdump
    } else {
        SnifferBackend::Libpcap
    }
}

pub fn build_sniffer(
    config: &CaptureConfig,
    params: SnifferParams,
) -> Result<Box<dyn Sniffer>, CaptureError> {
    let backend = match config.backend {
        SnifferBackend::Auto => platform_backend(),
        other => other,
    };
    let interface = match &params.interface {
        Some(name) => find_interface(name)?.name,
        None => detect_capture_interface()?.name,
    };
    debug!("Using {:?} sniffer on {}", backend, interface);
    Ok(match backend {
        SnifferBackend::Dumpcap => Box::new(DumpcapSniffer::new(config, params, &interface)?),
        SnifferBackend::Libpcap => Box::new(LibpcapSniffer::new(params, &interface)),
        SnifferBackend::Tcpdump | SnifferBackend::Auto => {
            Box::new(TcpdumpSniffer::new(config, params, &interface)?)
        }
    })
}

/// Fails when an external backend exits right after being started,
/// typically for lack of capture permissions.
fn ensure_started(process: &mut ExternalProcess) -> Result<(), CaptureError> {
    if let Some(status) = process.wait_timeout(Some(STARTUP_CHECK))? {
        return Err(CaptureError::new(
            CaptureErrorKind::SnifferError,
            format!("{} exited right after start: {status}", process.name()).as_str(),
        ));
    }
    Ok(())
}

fn stop_process(process: Option<ExternalProcess>) -> Result<(), CaptureError> {
    let Some(mut process) = process else {
        return Ok(());
    };
    process.stop()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tracelab_core::error::CoreErrorKind;

    #[test]
    fn test_unknown_configured_interface_is_rejected() {
        let params = SnifferParams {
            interface: Some("no-such-interface0".to_owned()),
            filter_expression: None,
            output_path: PathBuf::from("out.pcap"),
            log_path: None,
        };
        let Err(err) = build_sniffer(&CaptureConfig::default(), params) else {
            panic!("sniffer built for a missing interface");
        };
        assert!(matches!(
            &err.error_kind,
            CaptureErrorKind::CoreError(e) if matches!(e.error_kind, CoreErrorKind::NetworkInterfaceError)
        ));
    }
}
