use crate::config::{FetchParams, RequestConfig};
use crate::error::CaptureError;
use std::process::Command;

/// Replaces `{url}`, `{proxy_port}`, `{screenshot_dir}` and `{timeout}` in one argument.
pub fn expand_placeholders(arg: &str, params: &FetchParams) -> String {
    let proxy_port = params.proxy_port.map(|p| p.to_string()).unwrap_or_default();
    let screenshot_dir = params
        .screenshot_dir
        .as_ref()
        .map(|d| d.display().to_string())
        .unwrap_or_default();
    let timeout = params
        .timeout
        .map(|t| t.as_secs().to_string())
        .unwrap_or_else(|| "0".to_owned());
    arg.replace("{url}", &params.url)
        .replace("{proxy_port}", &proxy_port)
        .replace("{screenshot_dir}", &screenshot_dir)
        .replace("{timeout}", &timeout)
}

/// Generic client such as curl or a scripted browser. The URL is appended when
/// no argument references it; proxying is offered through the usual environment variables.
pub fn client_command(config: &RequestConfig, params: &FetchParams) -> Result<Command, CaptureError> {
    let binary = config
        .binary_path
        .as_ref()
        .ok_or(CaptureError::config("command request requires binary_path"))?;
    let mut command = Command::new(binary);
    command.args(config.args.iter().map(|arg| expand_placeholders(arg, params)));
    if !config.args.iter().any(|arg| arg.contains("{url}")) {
        command.arg(&params.url);
    }
    if let Some(port) = params.proxy_port {
        let proxy = format!("http://127.0.0.1:{port}");
        for key in ["http_proxy", "https_proxy", "all_proxy", "HTTP_PROXY", "HTTPS_PROXY", "ALL_PROXY"] {
            command.env(key, &proxy);
        }
    }
    Ok(command)
}
