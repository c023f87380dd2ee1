//! Small utilities and macros used across the workspace.
//!
//! - `retry!` - blocking retry macro with configurable attempts and interval (logs failures)
//! - `capture_timestamp` - timestamp fragment used in output directory and file names
//! - `main_domain` - host part of a target URL
//! - `sleep_unless_cancelled` - interruptible sleep for task loops
use chrono::{DateTime, Local};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S_%3f";

#[macro_export]
macro_rules! retry {
    ($f:expr, $count:expr, $interval:expr) => {{
        let mut retries = 1;
        let result = loop {
            let result = $f;
            if result.is_ok() {
                break result;
            } else if retries >= $count {
                ::log::error!("Failed; giving up after {} attempts", $count);
                break result;
            } else {
                if let Err(e) = &result {
                    ::log::error!("Failed: {}", e);
                }
                ::log::warn!("Attempt {} out of {}", retries, $count);
                retries += 1;
                ::std::thread::sleep($interval);
            }
        };
        result
    }};
    ($f:expr) => {
        retry!($f, 3, ::std::time::Duration::from_secs(1))
    };
}

pub fn capture_timestamp(time: &DateTime<Local>) -> String {
    time.format(TIMESTAMP_FORMAT).to_string()
}

/// Host part of a URL: scheme, path and query are stripped.
pub fn main_domain(url: &str) -> &str {
    let without_scheme = url.rsplit("//").next().unwrap_or(url);
    let host = without_scheme.split('/').next().unwrap_or(without_scheme);
    host.split('?').next().unwrap_or(host)
}

/// Returns `false` when cancelled before `duration` elapsed.
pub fn sleep_unless_cancelled(duration: Duration, cancel: &CancellationToken) -> bool {
    let until = Instant::now() + duration;
    loop {
        if cancel.is_cancelled() {
            return false;
        }
        let remaining = until.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return true;
        }
        std::thread::sleep(remaining.min(Duration::from_millis(100)));
    }
}
