use crate::config::{ExtensionParams, ProxyConfig, ProxyType};
use crate::error::{CaptureError, CaptureErrorKind};
use crate::extension::{
    Extension, ExtensionInfo, log_path, node_config_path, proxy_binary, runtime_config_path,
};
use crate::process::ExternalProcess;
use log::info;
use serde_json::Value;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;
use tracelab_core::protocol_stack::ProtocolStack;

const STOP_GRACE: Duration = Duration::from_secs(5);

/// Xray-core or V2Ray client; both read the same JSON layout and CLI.
pub struct XrayProxy {
    flavor: ProxyType,
    binary: PathBuf,
    node_config: PathBuf,
    runtime_config: PathBuf,
    stack: ProtocolStack,
    port: u16,
    log_path: Option<PathBuf>,
    process: Option<ExternalProcess>,
}

impl XrayProxy {
    pub fn new(
        flavor: ProxyType,
        config: &ProxyConfig,
        stack: ProtocolStack,
        port: u16,
        params: ExtensionParams,
    ) -> Result<Self, CaptureError> {
        let binary = proxy_binary(config, flavor)?;
        let node_config = node_config_path(config, flavor, &stack, "json")?;
        Ok(Self {
            flavor,
            binary,
            runtime_config: runtime_config_path(&params.output_dir, &node_config, port),
            log_path: log_path(&params, flavor, &stack),
            node_config,
            stack,
            port,
            process: None,
        })
    }

    /// Copies the node configuration with the first inbound bound to the allocated port.
    pub fn prepare_config(&self) -> Result<(), CaptureError> {
        let text = fs::read_to_string(&self.node_config).map_err(|e| {
            CaptureError::config(format!("cannot read {:?}: {e}", self.node_config).as_str())
        })?;
        let mut value: Value = serde_json::from_str(&text)?;
        let inbound = value
            .get_mut("inbounds")
            .and_then(Value::as_array_mut)
            .and_then(|inbounds| inbounds.first_mut())
            .and_then(Value::as_object_mut)
            .ok_or(CaptureError::config(
                "node configuration has no inbound to bind",
            ))?;
        inbound.insert("port".to_owned(), Value::from(self.port));
        if let Some(parent) = self.runtime_config.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.runtime_config, serde_json::to_vec_pretty(&value)?)?;
        Ok(())
    }

    pub fn build_command(&self) -> Command {
        let mut command = Command::new(&self.binary);
        command.arg("run").arg("-c").arg(&self.runtime_config);
        command
    }
}

impl Extension for XrayProxy {
    fn load(&mut self) -> Result<ExtensionInfo, CaptureError> {
        if self.process.is_some() {
            return Err(CaptureError::new(
                CaptureErrorKind::ExtensionError,
                format!("{} is already loaded", self.flavor.as_str()).as_str(),
            ));
        }
        self.prepare_config()?;
        let process = ExternalProcess::spawn(
            self.flavor.as_str(),
            self.build_command(),
            self.log_path.as_deref(),
            STOP_GRACE,
        )?;
        info!(
            "{} {} listening on port {} (pid {})",
            self.flavor.as_str(),
            self.stack,
            self.port,
            process.pid()
        );
        let info = ExtensionInfo {
            process_id: process.pid(),
            allocated_port: Some(self.port),
            protocol_stack: Some(self.stack.clone()),
        };
        self.process = Some(process);
        Ok(info)
    }

    fn unload(&mut self) -> Result<(), CaptureError> {
        if let Some(mut process) = self.process.take() {
            process.stop()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tracelab_core::protocol_stack::{ControlProtocol, SecurityProtocol, TransportProtocol};

    fn stack() -> ProtocolStack {
        ProtocolStack::new(
            ControlProtocol::Vless,
            SecurityProtocol::Reality,
            TransportProtocol::Grpc,
            "203.0.113.30",
            443,
        )
        .unwrap()
    }

    fn params(dir: &std::path::Path) -> ExtensionParams {
        ExtensionParams {
            port: Some(7900),
            output_dir: dir.join("out"),
            save_log: false,
        }
    }

    #[test]
    fn test_prepare_config_binds_first_inbound() {
        let dir = TempDir::new().unwrap();
        let node = dir.path().join("node.json");
        fs::write(
            &node,
            r#"{"inbounds":[{"port":1080,"protocol":"socks"},{"port":1081,"protocol":"http"}],"outbounds":[]}"#,
        )
        .unwrap();
        let config = ProxyConfig {
            binary_file_path: Some(PathBuf::from("/usr/local/bin/xray")),
            config_file_path: Some(node),
            ..ProxyConfig::default()
        };
        let proxy = XrayProxy::new(ProxyType::Xray, &config, stack(), 7900, params(dir.path())).unwrap();
        proxy.prepare_config().unwrap();
        let written: Value =
            serde_json::from_slice(&fs::read(dir.path().join("out").join("node_7900.json")).unwrap())
                .unwrap();
        assert_eq!(written["inbounds"][0]["port"], 7900);
        assert_eq!(written["inbounds"][1]["port"], 1081);
        let args: Vec<_> = proxy
            .build_command()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(args[..2], ["run", "-c"]);
    }

    #[test]
    fn test_prepare_config_without_inbounds() {
        let dir = TempDir::new().unwrap();
        let node = dir.path().join("node.json");
        fs::write(&node, r#"{"outbounds":[]}"#).unwrap();
        let config = ProxyConfig {
            binary_file_path: Some(PathBuf::from("v2ray")),
            config_file_path: Some(node),
            ..ProxyConfig::default()
        };
        let proxy = XrayProxy::new(ProxyType::V2ray, &config, stack(), 7900, params(dir.path())).unwrap();
        assert!(proxy.prepare_config().unwrap_err().is_config_error());
    }
}
