//! Auxiliary processes loaded around a capture, currently local proxy clients.
use crate::config::{ExtensionConfig, ExtensionParams, ProxyConfig, ProxyType};
use crate::error::CaptureError;
use std::path::{Path, PathBuf};
use tracelab_core::protocol_stack::ProtocolStack;

pub mod mihomo;
pub mod xray;

pub use mihomo::MihomoProxy;
pub use xray::XrayProxy;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionInfo {
    pub process_id: u32,
    pub allocated_port: Option<u16>,
    pub protocol_stack: Option<ProtocolStack>,
}

pub trait Extension: Send {
    fn load(&mut self) -> Result<ExtensionInfo, CaptureError>;
    fn unload(&mut self) -> Result<(), CaptureError>;
}

pub fn build_extension(
    config: &ExtensionConfig,
    params: ExtensionParams,
) -> Result<Box<dyn Extension>, CaptureError> {
    config.validate()?;
    let (Some(proxy_type), Some(stack)) = (config.proxy_type, config.protocol_stack.clone())
    else {
        return Err(CaptureError::config("incomplete proxy extension configuration"));
    };
    let port = params.port.ok_or(CaptureError::config(
        "proxy extension requires an allocated port",
    ))?;
    Ok(match proxy_type {
        ProxyType::Mihomo => Box::new(MihomoProxy::new(&config.proxy_config, stack, port, params)?),
        ProxyType::V2ray | ProxyType::Xray => Box::new(XrayProxy::new(
            proxy_type,
            &config.proxy_config,
            stack,
            port,
            params,
        )?),
    })
}

/// Proxy binary from the configuration, or looked up on `PATH`.
fn proxy_binary(config: &ProxyConfig, proxy_type: ProxyType) -> Result<PathBuf, CaptureError> {
    match &config.binary_file_path {
        Some(path) => Ok(path.clone()),
        None => Ok(which::which(proxy_type.as_str())?),
    }
}

/// Node configuration: an explicit file, or `{node_config_dir}/{type}_config_{stack}.{ext}`.
fn node_config_path(
    config: &ProxyConfig,
    proxy_type: ProxyType,
    stack: &ProtocolStack,
    extension: &str,
) -> Result<PathBuf, CaptureError> {
    if let Some(path) = &config.config_file_path {
        return Ok(path.clone());
    }
    let dir = config.node_config_dir.as_ref().ok_or(CaptureError::config(
        "proxy_config needs config_file_path or node_config_dir",
    ))?;
    Ok(dir.join(format!("{}_config_{}.{}", proxy_type.as_str(), stack, extension)))
}

fn log_path(params: &ExtensionParams, proxy_type: ProxyType, stack: &ProtocolStack) -> Option<PathBuf> {
    params
        .save_log
        .then(|| params.output_dir.join(format!("{}_{}.log", proxy_type.as_str(), stack)))
}

fn runtime_config_path(output_dir: &Path, node_config: &Path, port: u16) -> PathBuf {
    let stem = node_config
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "proxy_config".to_owned());
    let extension = node_config
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_default();
    output_dir.join(format!("{stem}_{port}.{extension}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExtensionType;
    use tracelab_core::protocol_stack::{ControlProtocol, SecurityProtocol, TransportProtocol};

    fn stack() -> ProtocolStack {
        ProtocolStack::new(
            ControlProtocol::Vmess,
            SecurityProtocol::Tls,
            TransportProtocol::Websocket,
            "203.0.113.9",
            443,
        )
        .unwrap()
    }

    #[test]
    fn test_node_config_path() {
        let config = ProxyConfig {
            node_config_dir: Some(PathBuf::from("/etc/nodes")),
            ..ProxyConfig::default()
        };
        assert_eq!(
            node_config_path(&config, ProxyType::Mihomo, &stack(), "yaml").unwrap(),
            PathBuf::from("/etc/nodes/mihomo_config_vmess_tls_websocket.yaml")
        );
        assert!(node_config_path(&ProxyConfig::default(), ProxyType::Xray, &stack(), "json").is_err());
    }

    #[test]
    fn test_runtime_config_path() {
        assert_eq!(
            runtime_config_path(Path::new("/out"), Path::new("/etc/nodes/node.yaml"), 7890),
            PathBuf::from("/out/node_7890.yaml")
        );
    }

    #[test]
    fn test_build_rejects_unsupported() {
        let params = ExtensionParams {
            port: Some(7890),
            output_dir: PathBuf::from("/tmp"),
            save_log: false,
        };
        let tor = ExtensionConfig {
            extension_type: ExtensionType::Tor,
            proxy_type: None,
            protocol_stack: None,
            proxy_config: ProxyConfig::default(),
        };
        assert!(build_extension(&tor, params.clone()).err().unwrap().is_config_error());

        let no_port = ExtensionConfig {
            extension_type: ExtensionType::Proxy,
            proxy_type: Some(ProxyType::Mihomo),
            protocol_stack: Some(stack()),
            proxy_config: ProxyConfig::default(),
        };
        let params = ExtensionParams { port: None, ..params };
        assert!(build_extension(&no_port, params).err().unwrap().is_config_error());
    }
}
