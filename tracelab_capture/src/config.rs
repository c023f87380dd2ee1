//! Typed configuration blocks of a capture.
//!
//! These are the `extension_config`, `request_config` and `sniffer_config`
//! sections of a task descriptor. The runtime `*Params` structs carry the values
//! the orchestrator injects for one particular capture.
use crate::error::CaptureError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracelab_core::protocol_stack::ProtocolStack;
use tracelab_core::tracker::DEFAULT_POLL_INTERVAL;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtensionType {
    Proxy,
    Tor,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyType {
    Mihomo,
    V2ray,
    Xray,
}

impl ProxyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyType::Mihomo => "mihomo",
            ProxyType::V2ray => "v2ray",
            ProxyType::Xray => "xray",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub binary_file_path: Option<PathBuf>,
    pub work_dir: Option<PathBuf>,
    pub node_config_dir: Option<PathBuf>,
    pub config_file_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionConfig {
    pub extension_type: ExtensionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_type: Option<ProxyType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol_stack: Option<ProtocolStack>,
    #[serde(default)]
    pub proxy_config: ProxyConfig,
}

impl ExtensionConfig {
    pub fn is_proxy(&self) -> bool {
        self.extension_type == ExtensionType::Proxy
    }

    pub fn validate(&self) -> Result<(), CaptureError> {
        match self.extension_type {
            ExtensionType::Proxy => {
                if self.proxy_type.is_none() {
                    return Err(CaptureError::config("proxy extension requires proxy_type"));
                }
                let stack = self.protocol_stack.as_ref().ok_or(CaptureError::config(
                    "proxy extension requires protocol_stack",
                ))?;
                stack.validate()?;
                Ok(())
            }
            other => Err(CaptureError::config(
                format!("unsupported extension type {:?}", other).as_str(),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    BrowserChromeSingleTab,
    Command,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestConfig {
    pub request_type: RequestType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary_path: Option<PathBuf>,
    /// Arguments of a `command` client, or extra browser switches.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

impl RequestConfig {
    pub fn validate(&self) -> Result<(), CaptureError> {
        if self.request_type == RequestType::Command && self.binary_path.is_none() {
            return Err(CaptureError::config(
                "command request requires binary_path",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnifferBackend {
    #[default]
    Auto,
    Tcpdump,
    Dumpcap,
    Libpcap,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

impl FilterParams {
    pub fn expression(&self) -> Option<String> {
        let mut parts = Vec::new();
        if let Some(host) = &self.host {
            parts.push(format!("host {host}"));
        }
        if let Some(port) = self.port {
            parts.push(format!("port {port}"));
        }
        (!parts.is_empty()).then(|| parts.join(" and "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub backend: SnifferBackend,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_interface: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_expr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<FilterParams>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binary_path: Option<PathBuf>,
    pub stop_grace_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            backend: SnifferBackend::Auto,
            network_interface: None,
            filter_expr: None,
            params: None,
            binary_path: None,
            stop_grace_ms: 3000,
        }
    }
}

impl CaptureConfig {
    /// Explicit expression first, then structured params, then the proxy node endpoint.
    pub fn filter_expression(&self, proxy_stack: Option<&ProtocolStack>) -> Option<String> {
        self.filter_expr
            .clone()
            .filter(|expr| !expr.trim().is_empty())
            .or_else(|| self.params.as_ref().and_then(FilterParams::expression))
            .or_else(|| proxy_stack.map(ProtocolStack::filter_expression))
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub enabled: bool,
    pub interval_ms: u64,
    pub include_children: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            include_children: true,
        }
    }
}

impl TrackerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnifferConfig {
    pub capture: CaptureConfig,
    pub connection_tracker: TrackerConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionParams {
    pub port: Option<u16>,
    pub output_dir: PathBuf,
    pub save_log: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchParams {
    pub url: String,
    pub timeout: Option<Duration>,
    pub proxy_port: Option<u16>,
    pub screenshot_dir: Option<PathBuf>,
    pub output_dir: PathBuf,
    pub save_log: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnifferParams {
    pub interface: Option<String>,
    pub filter_expression: Option<String>,
    pub output_path: PathBuf,
    pub log_path: Option<PathBuf>,
}
