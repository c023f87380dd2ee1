//! Connection tracking for a single capture.
//!
//! [`ConnectionTracker::start`] spawns a polling thread that asks a
//! [`SocketSource`] for the sockets of the monitored process every interval and
//! folds them into a [`ConnectionTable`]. The table is written to a JSON
//! snapshot when the thread exits, whether it was stopped or the process went
//! away.
use crate::connection::{Connection, ConnectionRecord};
use crate::error::{CoreError, CoreErrorKind};
use crate::hostname::{HostnameCache, HostnameResolver};
use crate::socket::{SocketEndpoint, SocketSource};
use crate::utils::sleep_unless_cancelled;
use chrono::{DateTime, Local};
use log::{debug, error, info, warn};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Default)]
pub struct ConnectionTable {
    connections: BTreeMap<String, Connection>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one polling pass.
    pub fn update(&mut self, endpoints: &[SocketEndpoint], now: DateTime<Local>) {
        let mut seen = HashSet::new();
        for endpoint in endpoints {
            let Some(remote) = endpoint.remote else {
                continue;
            };
            let connection = Connection::new(endpoint.local, remote, &endpoint.status, now);
            let key = connection.key();
            match self.connections.get_mut(&key) {
                Some(existing) => {
                    existing.observe(&endpoint.status, now);
                }
                None => {
                    debug!("New connection {key} ({})", endpoint.status);
                    self.connections.insert(key.clone(), connection);
                }
            }
            seen.insert(key);
        }
        for (key, connection) in self.connections.iter_mut() {
            if !seen.contains(key) && connection.active {
                debug!("Connection {key} no longer observed");
                connection.mark_inactive();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Connection> {
        self.connections.get(key)
    }

    pub fn records(&self, hostnames: &mut HostnameCache) -> Vec<ConnectionRecord> {
        self.connections
            .values()
            .map(|connection| connection.to_record(&hostnames.hostname(connection.remote.ip())))
            .collect()
    }
}

pub struct ConnectionTracker {
    pid: u32,
    snapshot_path: PathBuf,
    stop: CancellationToken,
    handle: Option<JoinHandle<Vec<ConnectionRecord>>>,
}

impl ConnectionTracker {
    pub fn start(
        pid: u32,
        mut source: Box<dyn SocketSource>,
        resolver: Box<dyn HostnameResolver>,
        interval: Duration,
        snapshot_path: &Path,
    ) -> Result<Self, CoreError> {
        let stop = CancellationToken::new();
        let stop_local = stop.clone();
        let path_local = snapshot_path.to_path_buf();
        let handle = std::thread::Builder::new()
            .name(format!("tracker-{pid}"))
            .spawn(move || {
                let mut table = ConnectionTable::new();
                loop {
                    match source.endpoints(pid) {
                        Ok(endpoints) => table.update(&endpoints, Local::now()),
                        Err(e) => {
                            match e.error_kind {
                                CoreErrorKind::ProcessNotFound
                                | CoreErrorKind::AccessDenied
                                | CoreErrorKind::UnsupportedPlatform => {
                                    info!("Tracking of pid {pid} ended: {e}")
                                }
                                _ => warn!("Tracking of pid {pid} aborted: {e}"),
                            }
                            break;
                        }
                    }
                    if !sleep_unless_cancelled(interval, &stop_local) {
                        break;
                    }
                }
                let records = table.records(&mut HostnameCache::new(resolver));
                if let Err(e) = write_snapshot(&path_local, &records) {
                    error!("Could not save connection snapshot {:?}: {e}", path_local);
                }
                records
            })
            .map_err(|e| CoreError::new(CoreErrorKind::ThreadError, e.to_string().as_str()))?;
        info!("Tracking connections of pid {pid}");
        Ok(Self {
            pid,
            snapshot_path: snapshot_path.to_path_buf(),
            stop,
            handle: Some(handle),
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    /// Stops polling and returns the final connection table. Calling it twice
    /// yields an empty list the second time.
    pub fn stop(&mut self) -> Result<Vec<ConnectionRecord>, CoreError> {
        self.stop.cancel();
        let Some(handle) = self.handle.take() else {
            return Ok(Vec::new());
        };
        let records = handle.join().map_err(|_| {
            CoreError::new(
                CoreErrorKind::ThreadError,
                format!("tracker thread for pid {} panicked", self.pid).as_str(),
            )
        })?;
        info!(
            "Tracked {} connection(s) of pid {}, snapshot {:?}",
            records.len(),
            self.pid,
            self.snapshot_path
        );
        Ok(records)
    }
}

impl Drop for ConnectionTracker {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

pub fn write_snapshot(path: &Path, records: &[ConnectionRecord]) -> Result<(), CoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_vec_pretty(records)?)?;
    Ok(())
}

pub fn read_snapshot(path: &Path) -> Result<Vec<ConnectionRecord>, CoreError> {
    Ok(serde_json::from_slice(&fs::read(path)?)?)
}
