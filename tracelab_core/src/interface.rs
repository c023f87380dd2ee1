use crate::error::{CoreError, CoreErrorKind};
use log::debug;
use pnet::datalink::{self, NetworkInterface};

const VIRTUAL_PREFIXES: [&str; 12] = [
    "docker", "veth", "br-", "virbr", "vmnet", "vboxnet", "utun", "tun", "tap", "wg", "zt", "lxc",
];

fn is_virtual(name: &str) -> bool {
    let name = name.to_lowercase();
    VIRTUAL_PREFIXES.iter().any(|prefix| name.starts_with(prefix))
}

fn is_capture_candidate(interface: &NetworkInterface) -> bool {
    interface.is_up()
        && !interface.is_loopback()
        && !is_virtual(&interface.name)
        && interface
            .ips
            .iter()
            .any(|ip| ip.is_ipv4() && !ip.ip().is_loopback())
}

/// First up, physical-looking interface with an IPv4 address.
pub fn detect_capture_interface() -> Result<NetworkInterface, CoreError> {
    select_capture_interface(datalink::interfaces())
}

pub fn select_capture_interface(
    interfaces: Vec<NetworkInterface>,
) -> Result<NetworkInterface, CoreError> {
    let interface = interfaces
        .into_iter()
        .find(is_capture_candidate)
        .ok_or(CoreError::new(
            CoreErrorKind::NetworkInterfaceError,
            "no active network interface found",
        ))?;
    debug!("Selected capture interface {}", interface.name);
    Ok(interface)
}

/// Looks up a configured interface by name; it must exist and be up.
pub fn find_interface(name: &str) -> Result<NetworkInterface, CoreError> {
    let interface = datalink::interfaces()
        .into_iter()
        .find(|i| i.name == name)
        .ok_or(CoreError::new(
            CoreErrorKind::NetworkInterfaceError,
            format!("Interface {} not found", name).as_str(),
        ))?;
    if !interface.is_up() {
        return Err(CoreError::new(
            CoreErrorKind::NetworkInterfaceError,
            format!("Interface {} is not up", name).as_str(),
        ));
    }
    Ok(interface)
}
