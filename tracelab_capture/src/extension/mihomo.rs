use crate::config::{ExtensionParams, ProxyConfig, ProxyType};
use crate::error::{CaptureError, CaptureErrorKind};
use crate::extension::{
    Extension, ExtensionInfo, log_path, node_config_path, proxy_binary, runtime_config_path,
};
use crate::process::ExternalProcess;
use log::info;
use serde_yaml::{Mapping, Value};
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;
use tracelab_core::protocol_stack::ProtocolStack;

const STOP_GRACE: Duration = Duration::from_secs(5);

/// mihomo (Clash.Meta) client exposing a mixed HTTP/SOCKS port.
pub struct MihomoProxy {
    binary: PathBuf,
    work_dir: PathBuf,
    node_config: PathBuf,
    runtime_config: PathBuf,
    stack: ProtocolStack,
    port: u16,
    log_path: Option<PathBuf>,
    process: Option<ExternalProcess>,
}

impl MihomoProxy {
    pub fn new(
        config: &ProxyConfig,
        stack: ProtocolStack,
        port: u16,
        params: ExtensionParams,
    ) -> Result<Self, CaptureError> {
        let binary = proxy_binary(config, ProxyType::Mihomo)?;
        let node_config = node_config_path(config, ProxyType::Mihomo, &stack, "yaml")?;
        let work_dir = config
            .work_dir
            .clone()
            .unwrap_or_else(|| params.output_dir.clone());
        Ok(Self {
            binary,
            work_dir,
            runtime_config: runtime_config_path(&params.output_dir, &node_config, port),
            log_path: log_path(&params, ProxyType::Mihomo, &stack),
            node_config,
            stack,
            port,
            process: None,
        })
    }

    /// Copies the node configuration with `mixed-port` pointing at the allocated port.
    pub fn prepare_config(&self) -> Result<(), CaptureError> {
        let text = fs::read_to_string(&self.node_config).map_err(|e| {
            CaptureError::config(format!("cannot read {:?}: {e}", self.node_config).as_str())
        })?;
        let mut value: Value = serde_yaml::from_str(&text)?;
        if value.is_null() {
            value = Value::Mapping(Mapping::new());
        }
        let mapping = value.as_mapping_mut().ok_or(CaptureError::config(
            "mihomo node configuration must be a mapping",
        ))?;
        mapping.insert(
            Value::String("mixed-port".to_owned()),
            Value::Number(u64::from(self.port).into()),
        );
        if let Some(parent) = self.runtime_config.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.runtime_config, serde_yaml::to_string(&value)?)?;
        Ok(())
    }

    pub fn build_command(&self) -> Command {
        let mut command = Command::new(&self.binary);
        command
            .arg("-d")
            .arg(&self.work_dir)
            .arg("-f")
            .arg(&self.runtime_config);
        command
    }
}

impl Extension for MihomoProxy {
    fn load(&mut self) -> Result<ExtensionInfo, CaptureError> {
        if self.process.is_some() {
            return Err(CaptureError::new(
                CaptureErrorKind::ExtensionError,
                "mihomo is already loaded",
            ));
        }
        self.prepare_config()?;
        let process = ExternalProcess::spawn(
            "mihomo",
            self.build_command(),
            self.log_path.as_deref(),
            STOP_GRACE,
        )?;
        info!(
            "mihomo {} listening on port {} (pid {})",
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
