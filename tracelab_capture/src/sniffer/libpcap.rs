use crate::config::SnifferParams;
use crate::error::{CaptureError, CaptureErrorKind};
use crate::sniffer::Sniffer;
use log::error;
use std::path::Path;
use std::thread::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracelab_core::capture::CaptureSource;
use tracelab_core::error::CoreError;

/// In-process recorder on top of libpcap, for hosts without tcpdump or dumpcap.
pub struct LibpcapSniffer {
    interface: String,
    params: SnifferParams,
    cancellation_token: CancellationToken,
    handle: Option<JoinHandle<Result<usize, CoreError>>>,
}

impl LibpcapSniffer {
    pub fn new(params: SnifferParams, interface: &str) -> Self {
        Self {
            interface: interface.to_owned(),
            params,
            cancellation_token: CancellationToken::new(),
            handle: None,
        }
    }
}

impl Sniffer for LibpcapSniffer {
    fn start(&mut self) -> Result<(), CaptureError> {
        if self.handle.is_some() {
            return Ok(());
        }
        let source = CaptureSource::device(
            &self.interface,
            self.params.filter_expression.as_deref(),
        )?;
        let output = self.params.output_path.clone();
        let token = self.cancellation_token.clone();
        let handle = std::thread::Builder::new()
            .name(format!("libpcap-{}", self.interface))
            .spawn(move || source.record(&output, token))?;
        self.handle = Some(handle);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        self.cancellation_token.cancel();
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        match handle.join() {
            Ok(result) => {
                result?;
                Ok(())
            }
            Err(_) => {
                error!("libpcap recorder on {} panicked", self.interface);
                Err(CaptureError::new(
                    CaptureErrorKind::SnifferError,
                    "libpcap recorder thread panicked",
                ))
            }
        }
    }

    fn output_path(&self) -> &Path {
        &self.params.output_path
    }
}

impl Drop for LibpcapSniffer {
    fn drop(&mut self) {
        self.cancellation_token.cancel();
    }
}
