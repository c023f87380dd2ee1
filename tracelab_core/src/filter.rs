//! Post-capture narrowing of a pcap file to the tracked connections.
use crate::connection::{ConnectionRecord, FourTuple};
use crate::error::{CoreError, CoreErrorKind};
use crate::packet::NetworkFrame;
use crate::retry;
use log::{debug, error, info};
use pcap_file::DataLink;
use pcap_file::pcap::{PcapHeader, PcapPacket, PcapReader, PcapWriter};
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct FilterOptions {
    /// Pause before the first replacement so the capture backend can let go of the file.
    pub settle_delay: Duration,
    pub replace_attempts: usize,
    pub retry_interval: Duration,
}

impl Default for FilterOptions {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(200),
            replace_attempts: 3,
            retry_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterStats {
    pub total: usize,
    pub kept: usize,
}

pub struct ConnectionsFilter {
    tuples: HashSet<FourTuple>,
    options: FilterOptions,
}

impl ConnectionsFilter {
    pub fn new(records: &[ConnectionRecord]) -> Self {
        Self::from_tuples(records.iter().map(ConnectionRecord::four_tuple))
    }

    /// Both directions of every tuple are retained.
    pub fn from_tuples(tuples: impl IntoIterator<Item = FourTuple>) -> Self {
        let tuples = tuples
            .into_iter()
            .flat_map(|tuple| [tuple, tuple.reversed()])
            .collect();
        Self {
            tuples,
            options: FilterOptions::default(),
        }
    }

    pub fn with_options(mut self, options: FilterOptions) -> Self {
        self.options = options;
        self
    }

    pub fn contains(&self, tuple: &FourTuple) -> bool {
        self.tuples.contains(tuple)
    }

    pub fn len(&self) -> usize {
        self.tuples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }

    /// Rewrites `path` in place with only the matching packets.
    ///
    /// When the file cannot be replaced the temporary output is discarded and
    /// the original capture is left as it was.
    pub fn filter_file(&self, path: &Path) -> Result<FilterStats, CoreError> {
        let tmp_path = temporary_path(path);
        let stats = match self.write_filtered(path, &tmp_path) {
            Ok(stats) => stats,
            Err(e) => {
                let _ = fs::remove_file(&tmp_path);
                return Err(e);
            }
        };
        std::thread::sleep(self.options.settle_delay);
        let replaced = retry!(
            fs::rename(&tmp_path, path),
            self.options.replace_attempts,
            self.options.retry_interval
        );
        if let Err(e) = replaced {
            error!("Could not replace {:?} with filtered capture: {e}", path);
            let _ = fs::remove_file(&tmp_path);
            return Err(CoreError::new(
                CoreErrorKind::IoError,
                format!("replacing {:?} failed: {e}", path).as_str(),
            ));
        }
        info!(
            "Filtered {:?}: kept {} of {} packets",
            path, stats.kept, stats.total
        );
        Ok(stats)
    }

    fn write_filtered(&self, input: &Path, output: &Path) -> Result<FilterStats, CoreError> {
        let mut reader = PcapReader::new(BufReader::new(File::open(input)?))?;
        let input_header = reader.header();
        let datalink = input_header.datalink;
        let header = PcapHeader {
            datalink: DataLink::ETHERNET,
            ..input_header
        };
        let mut writer = PcapWriter::with_header(BufWriter::new(File::create(output)?), header)?;

        let mut stats = FilterStats::default();
        while let Some(packet) = reader.next_packet() {
            let packet = packet?;
            stats.total += 1;
            let Some(frame) = NetworkFrame::parse(datalink, &packet.data) else {
                debug!("Unparsable frame {} skipped", stats.total);
                continue;
            };
            let Some(tuple) = frame.four_tuple() else {
                continue;
            };
            if !self.tuples.contains(&tuple) {
                continue;
            }
            let data = frame.to_ethernet(&packet.data);
            let orig_len = (packet.orig_len as usize + data.len()).saturating_sub(packet.data.len());
            writer.write_packet(&PcapPacket::new(
                packet.timestamp,
                orig_len as u32,
                &data,
            ))?;
            stats.kept += 1;
        }
        writer.into_writer().flush()?;
        Ok(stats)
    }
}

fn temporary_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
