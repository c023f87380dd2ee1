//! In-process packet recording through libpcap.
use crate::error::{CoreError, CoreErrorKind};
use log::{debug, info};
use pcap::{Activated, Active, Capture, Device, Error, Offline, State};
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// Read timeout of live captures; bounds how long a stop request can go unnoticed.
const READ_TIMEOUT_MS: i32 = 200;

/// A libpcap handle together with the BPF expression applied before reading.
pub struct CaptureSource<T: State + Activated> {
    capture: Capture<T>,
    filter: Option<String>,
}

impl CaptureSource<Active> {
    pub fn device(name: &str, filter: Option<&str>) -> Result<Self, CoreError> {
        let device = Device::list()?
            .into_iter()
            .find(|d| d.name == name)
            .ok_or(CoreError::new(
                CoreErrorKind::NetworkInterfaceError,
                format!("capture device {name} not found").as_str(),
            ))?;
        let capture = Capture::from_device(device)?
            .promisc(false)
            .timeout(READ_TIMEOUT_MS)
            .immediate_mode(true)
            .open()?;
        debug!("Opened live capture on {name}");
        Ok(Self {
            capture,
            filter: filter.map(str::to_owned),
        })
    }
}

impl CaptureSource<Offline> {
    pub fn file(path: &Path, filter: Option<&str>) -> Result<Self, CoreError> {
        Ok(Self {
            capture: Capture::from_file(path)?,
            filter: filter.map(str::to_owned),
        })
    }
}

impl<T: State + Activated> CaptureSource<T> {
    /// Writes every packet to a pcap savefile until cancelled or the source
    /// runs dry. Returns the number of packets written.
    pub fn record(mut self, output: &Path, cancel: CancellationToken) -> Result<usize, CoreError> {
        if let Some(filter) = &self.filter {
            self.capture.filter(filter, true)?;
            debug!("BPF filter {filter:?} applied");
        }
        let mut savefile = self.capture.savefile(output)?;
        let mut written = 0;
        while !cancel.is_cancelled() {
            match self.capture.next_packet() {
                Ok(packet) => {
                    savefile.write(&packet);
                    written += 1;
                }
                Err(Error::TimeoutExpired) => {}
                Err(Error::NoMorePackets) => break,
                Err(e) => {
                    savefile.flush()?;
                    return Err(e.into());
                }
            }
        }
        savefile.flush()?;
        info!("Recorded {written} packet(s) into {:?}", output);
        Ok(written)
    }
}
