use crate::config::{FetchParams, RequestConfig};
use crate::error::CaptureError;
use std::path::PathBuf;
use std::process::Command;

const CANDIDATES: [&str; 5] = [
    "google-chrome",
    "google-chrome-stable",
    "chromium",
    "chromium-browser",
    "chrome",
];
const MACOS_PATH: &str = "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome";

fn chrome_binary(config: &RequestConfig) -> Result<PathBuf, CaptureError> {
    if let Some(path) = &config.binary_path {
        return Ok(path.clone());
    }
    if let Some(path) = CANDIDATES.iter().find_map(|name| which::which(name).ok()) {
        return Ok(path);
    }
    let mac = PathBuf::from(MACOS_PATH);
    if mac.exists() {
        return Ok(mac);
    }
    Err(CaptureError::config(
        "no Chrome or Chromium binary found, set request_config.binary_path",
    ))
}

/// Headless single-tab visit that exits once the page is loaded and, if
/// requested, a screenshot is taken.
pub fn chrome_command(config: &RequestConfig, params: &FetchParams) -> Result<Command, CaptureError> {
    let mut command = Command::new(chrome_binary(config)?);
    command
        .arg("--headless=new")
        .arg("--disable-gpu")
        .arg("--no-first-run")
        .arg("--no-default-browser-check")
        .arg("--disable-background-networking")
        .arg("--disable-component-update")
        .arg(format!(
            "--user-data-dir={}",
            params.output_dir.join("chrome-profile").display()
        ));
    if let Some(port) = params.proxy_port {
        command.arg(format!("--proxy-server=http://127.0.0.1:{port}"));
    }
    if let Some(timeout) = params.timeout {
        command.arg(format!("--timeout={}", timeout.as_millis()));
    }
    match &params.screenshot_dir {
        Some(dir) => {
            command
                .arg("--window-size=1920,1080")
                .arg(format!("--screenshot={}", dir.join("screenshot.png").display()));
        }
        None => {
            command.arg("--dump-dom");
        }
    }
    command.args(&config.args).arg(&params.url);
    Ok(command)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RequestType;
    use std::time::Duration;

    fn args(command: &Command) -> Vec<String> {
        command
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_proxied_visit_with_screenshot() {
        let config = RequestConfig {
            request_type: RequestType::BrowserChromeSingleTab,
            binary_path: Some(PathBuf::from("/usr/bin/chromium")),
            args: vec!["--no-sandbox".to_owned()],
        };
        let params = FetchParams {
            url: "https://example.com/".to_owned(),
            timeout: Some(Duration::from_secs(30)),
            proxy_port: Some(7891),
            screenshot_dir: Some(PathBuf::from("/out/screenshot")),
            output_dir: PathBuf::from("/out"),
            save_log: false,
        };
        let command = chrome_command(&config, &params).unwrap();
        assert_eq!(command.get_program(), "/usr/bin/chromium");
        let args = args(&command);
        assert!(args.contains(&"--proxy-server=http://127.0.0.1:7891".to_owned()));
        assert!(args.contains(&"--timeout=30000".to_owned()));
        assert!(args.contains(&"--screenshot=/out/screenshot/screenshot.png".to_owned()));
        assert!(args.contains(&"--user-data-dir=/out/chrome-profile".to_owned()));
        assert!(!args.contains(&"--dump-dom".to_owned()));
        assert_eq!(args[args.len() - 2], "--no-sandbox");
        assert_eq!(args.last().unwrap(), "https://example.com/");
    }

    #[test]
    fn test_direct_visit_dumps_dom() {
        let config = RequestConfig {
            request_type: RequestType::BrowserChromeSingleTab,
            binary_path: Some(PathBuf::from("chrome")),
            args: Vec::new(),
        };
        let params = FetchParams {
            url: "https://example.org".to_owned(),
            timeout: None,
            proxy_port: None,
            screenshot_dir: None,
            output_dir: PathBuf::from("/out"),
            save_log: false,
        };
        let args = args(&chrome_command(&config, &params).unwrap());
        assert!(args.contains(&"--dump-dom".to_owned()));
        assert!(!args.iter().any(|a| a.starts_with("--proxy-server")));
        assert!(!args.iter().any(|a| a.starts_with("--timeout")));
    }
}
