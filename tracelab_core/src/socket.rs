use crate::error::{CoreError, CoreErrorKind};
use std::net::SocketAddr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketEndpoint {
    pub local: SocketAddr,
    pub remote: Option<SocketAddr>,
    pub status: String,
}

/// Enumerates the internet sockets currently held by a process.
///
/// `ProcessNotFound` and `AccessDenied` errors mean the process cannot be
/// observed any longer; the tracker treats them as the end of tracking.
pub trait SocketSource: Send {
    fn endpoints(&mut self, pid: u32) -> Result<Vec<SocketEndpoint>, CoreError>;
}

pub struct ProcfsSocketSource {
    include_children: bool,
}

impl ProcfsSocketSource {
    pub fn new(include_children: bool) -> Self {
        Self { include_children }
    }
}

impl SocketSource for ProcfsSocketSource {
    #[cfg(target_os = "linux")]
    fn endpoints(&mut self, pid: u32) -> Result<Vec<SocketEndpoint>, CoreError> {
        linux::endpoints(pid, self.include_children)
    }

    #[cfg(not(target_os = "linux"))]
    fn endpoints(&mut self, pid: u32) -> Result<Vec<SocketEndpoint>, CoreError> {
        let _ = self.include_children;
        Err(CoreError::new(
            CoreErrorKind::UnsupportedPlatform,
            format!("socket enumeration for pid {pid} is only available on Linux").as_str(),
        ))
    }
}

/// Dual-stack sockets report IPv4 peers as `::ffff:a.b.c.d`; packets carry plain IPv4.
fn canonical(addr: SocketAddr) -> SocketAddr {
    SocketAddr::new(addr.ip().to_canonical(), addr.port())
}

fn peer(addr: SocketAddr) -> Option<SocketAddr> {
    if addr.port() == 0 && addr.ip().is_unspecified() {
        None
    } else {
        Some(canonical(addr))
    }
}

#[cfg(target_os = "linux")]
mod linux {
    use super::{SocketEndpoint, canonical, peer};
    use crate::error::CoreError;
    use procfs::net::TcpState;
    use procfs::process::{FDTarget, Process, all_processes};
    use std::collections::{HashMap, HashSet, VecDeque};

    pub(super) fn endpoints(
        pid: u32,
        include_children: bool,
    ) -> Result<Vec<SocketEndpoint>, CoreError> {
        let root = pid as i32;
        let pids = if include_children {
            process_tree(root)?
        } else {
            vec![root]
        };

        let mut inodes = HashSet::new();
        for current in pids {
            let fds = match Process::new(current).and_then(|p| p.fd()) {
                Ok(fds) => fds,
                // the monitored process itself must be observable, children may vanish
                Err(e) if current == root => return Err(e.into()),
                Err(_) => continue,
            };
            for fd in fds.flatten() {
                if let FDTarget::Socket(inode) = fd.target {
                    inodes.insert(inode);
                }
            }
        }

        let mut endpoints = Vec::new();
        let tcp = procfs::net::tcp()?
            .into_iter()
            .chain(procfs::net::tcp6().unwrap_or_default());
        for entry in tcp {
            if inodes.contains(&entry.inode) {
                endpoints.push(SocketEndpoint {
                    local: canonical(entry.local_address),
                    remote: peer(entry.remote_address),
                    status: tcp_status(&entry.state),
                });
            }
        }
        let udp = procfs::net::udp()?
            .into_iter()
            .chain(procfs::net::udp6().unwrap_or_default());
        for entry in udp {
            if inodes.contains(&entry.inode) {
                endpoints.push(SocketEndpoint {
                    local: canonical(entry.local_address),
                    remote: peer(entry.remote_address),
                    status: "NONE".to_owned(),
                });
            }
        }
        Ok(endpoints)
    }

    fn process_tree(root: i32) -> Result<Vec<i32>, CoreError> {
        let mut children: HashMap<i32, Vec<i32>> = HashMap::new();
        for process in all_processes()?.flatten() {
            if let Ok(stat) = process.stat() {
                children.entry(stat.ppid).or_default().push(stat.pid);
            }
        }
        let mut tree = Vec::new();
        let mut queue = VecDeque::from([root]);
        while let Some(pid) = queue.pop_front() {
            tree.push(pid);
            if let Some(kids) = children.get(&pid) {
                queue.extend(kids.iter().copied());
            }
        }
        Ok(tree)
    }

    fn tcp_status(state: &TcpState) -> String {
        match state {
            TcpState::Established => "ESTABLISHED".to_owned(),
            TcpState::SynSent => "SYN_SENT".to_owned(),
            TcpState::SynRecv => "SYN_RECV".to_owned(),
            TcpState::FinWait1 => "FIN_WAIT1".to_owned(),
            TcpState::FinWait2 => "FIN_WAIT2".to_owned(),
            TcpState::TimeWait => "TIME_WAIT".to_owned(),
            TcpState::Close => "CLOSE".to_owned(),
            TcpState::CloseWait => "CLOSE_WAIT".to_owned(),
            TcpState::LastAck => "LAST_ACK".to_owned(),
            TcpState::Listen => "LISTEN".to_owned(),
            TcpState::Closing => "CLOSING".to_owned(),
            other => format!("{:?}", other).to_uppercase(),
        }
    }
}
