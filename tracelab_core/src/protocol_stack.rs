//! Proxy protocol stack description.
//!
//! A [`ProtocolStack`] names the control/security/transport triple of a proxy
//! node together with the node's remote endpoint. It is used to pick the
//! extension node configuration, to build output directory fragments and to
//! derive the sniffer filter expression for proxied captures.
use crate::error::{CoreError, CoreErrorKind};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlProtocol {
    Shadowsocks,
    Vless,
    Vmess,
    Trojan,
    Hysteria2,
    Tuic,
    Socks,
    Http,
}

impl ControlProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlProtocol::Shadowsocks => "shadowsocks",
            ControlProtocol::Vless => "vless",
            ControlProtocol::Vmess => "vmess",
            ControlProtocol::Trojan => "trojan",
            ControlProtocol::Hysteria2 => "hysteria2",
            ControlProtocol::Tuic => "tuic",
            ControlProtocol::Socks => "socks",
            ControlProtocol::Http => "http",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SecurityProtocol {
    #[serde(rename = "tls")]
    Tls,
    #[serde(rename = "tls12")]
    Tls12,
    #[serde(rename = "tls13")]
    Tls13,
    #[serde(rename = "xtls")]
    Xtls,
    #[serde(rename = "xtls-rprx-vision")]
    XtlsRprxVision,
    #[serde(rename = "reality")]
    Reality,
    #[serde(rename = "reality-xtls-rprx-vision")]
    RealityXtlsRprxVision,
    #[serde(rename = "no-extra-security")]
    NoExtraSecurity,
}

impl SecurityProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityProtocol::Tls => "tls",
            SecurityProtocol::Tls12 => "tls12",
            SecurityProtocol::Tls13 => "tls13",
            SecurityProtocol::Xtls => "xtls",
            SecurityProtocol::XtlsRprxVision => "xtls-rprx-vision",
            SecurityProtocol::Reality => "reality",
            SecurityProtocol::RealityXtlsRprxVision => "reality-xtls-rprx-vision",
            SecurityProtocol::NoExtraSecurity => "no-extra-security",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportProtocol {
    Tcp,
    Udp,
    Websocket,
    Quic,
    Mkcp,
    Http2,
    Grpc,
    Xhttp,
}

impl TransportProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportProtocol::Tcp => "tcp",
            TransportProtocol::Udp => "udp",
            TransportProtocol::Websocket => "websocket",
            TransportProtocol::Quic => "quic",
            TransportProtocol::Mkcp => "mkcp",
            TransportProtocol::Http2 => "http2",
            TransportProtocol::Grpc => "grpc",
            TransportProtocol::Xhttp => "xhttp",
        }
    }
}

/// Serializes to and from the flat mapping used in task descriptors.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProtocolStack {
    pub control_protocol: ControlProtocol,
    pub security_protocol: SecurityProtocol,
    pub transport_protocol: TransportProtocol,
    pub remote_address: String,
    pub remote_port: u16,
}

impl ProtocolStack {
    pub fn new(
        control_protocol: ControlProtocol,
        security_protocol: SecurityProtocol,
        transport_protocol: TransportProtocol,
        remote_address: &str,
        remote_port: u16,
    ) -> Result<Self, CoreError> {
        let stack = Self {
            control_protocol,
            security_protocol,
            transport_protocol,
            remote_address: remote_address.to_owned(),
            remote_port,
        };
        stack.validate()?;
        Ok(stack)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.remote_address.trim().is_empty() {
            return Err(CoreError::new(
                CoreErrorKind::ConfigError,
                "protocol stack remote_address must not be empty",
            ));
        }
        if self.remote_port == 0 {
            return Err(CoreError::new(
                CoreErrorKind::ConfigError,
                "protocol stack remote_port must not be zero",
            ));
        }
        Ok(())
    }

    /// `control/security/transport` directory fragments.
    pub fn path_fragments(&self) -> [&'static str; 3] {
        [
            self.control_protocol.as_str(),
            self.security_protocol.as_str(),
            self.transport_protocol.as_str(),
        ]
    }

    pub fn filter_expression(&self) -> String {
        format!("host {} and port {}", self.remote_address, self.remote_port)
    }
}

impl Display for ProtocolStack {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}_{}_{}",
            self.control_protocol.as_str(),
            self.security_protocol.as_str(),
            self.transport_protocol.as_str()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vless_reality() -> ProtocolStack {
        ProtocolStack::new(
            ControlProtocol::Vless,
            SecurityProtocol::RealityXtlsRprxVision,
            TransportProtocol::Tcp,
            "203.0.113.7",
            443,
        )
        .unwrap()
    }

    #[test]
    fn test_display_and_fragments() {
        let stack = vless_reality();
        assert_eq!(stack.to_string(), "vless_reality-xtls-rprx-vision_tcp");
        assert_eq!(
            stack.path_fragments(),
            ["vless", "reality-xtls-rprx-vision", "tcp"]
        );
        assert_eq!(stack.filter_expression(), "host 203.0.113.7 and port 443");
    }

    #[test]
    fn test_flat_mapping() {
        let json = r#"{
            "control_protocol": "shadowsocks",
            "security_protocol": "no-extra-security",
            "transport_protocol": "websocket",
            "remote_address": "proxy.example.net",
            "remote_port": 8388
        }"#;
        let stack: ProtocolStack = serde_json::from_str(json).unwrap();
        assert_eq!(stack.control_protocol, ControlProtocol::Shadowsocks);
        assert_eq!(stack.security_protocol, SecurityProtocol::NoExtraSecurity);
        assert_eq!(stack.transport_protocol, TransportProtocol::Websocket);
        let back = serde_json::to_value(&stack).unwrap();
        assert_eq!(back["security_protocol"], "no-extra-security");
    }

    #[test]
    fn test_rejects_unknown_enum_value() {
        let json = r#"{
            "control_protocol": "wireguard",
            "security_protocol": "tls",
            "transport_protocol": "udp",
            "remote_address": "1.2.3.4",
            "remote_port": 51820
        }"#;
        assert!(serde_json::from_str::<ProtocolStack>(json).is_err());
    }

    #[test]
    fn test_validate_endpoint() {
        let err = ProtocolStack::new(
            ControlProtocol::Trojan,
            SecurityProtocol::Tls,
            TransportProtocol::Grpc,
            " ",
            443,
        )
        .unwrap_err();
        assert!(matches!(err.error_kind, CoreErrorKind::ConfigError));
        assert!(
            ProtocolStack::new(
                ControlProtocol::Trojan,
                SecurityProtocol::Tls,
                TransportProtocol::Grpc,
                "1.2.3.4",
                0,
            )
            .is_err()
        );
    }
}
