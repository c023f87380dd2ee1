use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::net::{IpAddr, SocketAddr};

/// Directional (source, destination) pair of socket addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FourTuple {
    pub src_ip: IpAddr,
    pub src_port: u16,
    pub dst_ip: IpAddr,
    pub dst_port: u16,
}

impl FourTuple {
    pub fn new(src: SocketAddr, dst: SocketAddr) -> Self {
        Self {
            src_ip: src.ip(),
            src_port: src.port(),
            dst_ip: dst.ip(),
            dst_port: dst.port(),
        }
    }

    pub fn reversed(&self) -> Self {
        Self {
            src_ip: self.dst_ip,
            src_port: self.dst_port,
            dst_ip: self.src_ip,
            dst_port: self.src_port,
        }
    }
}

impl Display for FourTuple {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}->{}:{}",
            self.src_ip, self.src_port, self.dst_ip, self.dst_port
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEntry {
    pub timestamp: DateTime<Local>,
    pub status: String,
}

/// A socket of the monitored process as seen by the connection tracker.
///
/// Connections are never removed once observed; when they disappear from a
/// polling pass they are only marked inactive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub local: SocketAddr,
    pub remote: SocketAddr,
    pub first_seen: DateTime<Local>,
    pub last_seen: DateTime<Local>,
    pub active: bool,
    pub status_history: Vec<StatusEntry>,
}

impl Connection {
    pub fn new(local: SocketAddr, remote: SocketAddr, status: &str, now: DateTime<Local>) -> Self {
        Self {
            local,
            remote,
            first_seen: now,
            last_seen: now,
            active: true,
            status_history: vec![StatusEntry {
                timestamp: now,
                status: status.to_owned(),
            }],
        }
    }

    pub fn four_tuple(&self) -> FourTuple {
        FourTuple::new(self.local, self.remote)
    }

    /// Identity key, `local_ip:local_port->remote_ip:remote_port`.
    pub fn key(&self) -> String {
        self.four_tuple().to_string()
    }

    pub fn current_status(&self) -> Option<&str> {
        self.status_history.last().map(|entry| entry.status.as_str())
    }

    /// Records another sighting. Returns `true` when a new status entry was appended.
    pub fn observe(&mut self, status: &str, now: DateTime<Local>) -> bool {
        self.last_seen = now;
        self.active = true;
        if self.current_status() == Some(status) {
            return false;
        }
        self.status_history.push(StatusEntry {
            timestamp: now,
            status: status.to_owned(),
        });
        true
    }

    pub fn mark_inactive(&mut self) {
        self.active = false;
    }

    pub fn to_record(&self, hostname: &str) -> ConnectionRecord {
        ConnectionRecord {
            local: LocalEndpoint {
                ip: self.local.ip(),
                port: self.local.port(),
            },
            remote: RemoteEndpoint {
                ip: self.remote.ip(),
                port: self.remote.port(),
                hostname: hostname.to_owned(),
            },
            first_seen: self.first_seen,
            last_seen: self.last_seen,
            active: self.active,
            status_history: self.status_history.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalEndpoint {
    pub ip: IpAddr,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEndpoint {
    pub ip: IpAddr,
    pub port: u16,
    pub hostname: String,
}

/// One entry of the JSON connection snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    pub local: LocalEndpoint,
    pub remote: RemoteEndpoint,
    pub first_seen: DateTime<Local>,
    pub last_seen: DateTime<Local>,
    pub active: bool,
    pub status_history: Vec<StatusEntry>,
}

impl ConnectionRecord {
    pub fn four_tuple(&self) -> FourTuple {
        FourTuple {
            src_ip: self.local.ip,
            src_port: self.local.port,
            dst_ip: self.remote.ip,
            dst_port: self.remote.port,
        }
    }
}
