//! One capture from start to finish.
//!
//! [`CaptureOrchestrator::capture`] brings up the extension, the fetcher, the
//! sniffer and the connection tracker in a fixed order, drives the fetch, then
//! tears everything down again and narrows the raw capture to the connections
//! the fetch used. Once a capture has started it is never abandoned halfway:
//! the cancellation token is only honoured while waiting for a proxy port.
//!
//! All components are obtained from a [`ComponentFactory`], so the sequence
//! can be exercised without external binaries or capture privileges.
use crate::config::{
    CaptureConfig, ExtensionConfig, ExtensionParams, FetchParams, RequestConfig, SnifferConfig,
    SnifferParams, TrackerConfig,
};
use crate::error::{CaptureError, CaptureErrorKind};
use crate::extension::{Extension, ExtensionInfo, build_extension};
use crate::fetcher::{Fetcher, build_fetcher};
use crate::sniffer::{Sniffer, build_sniffer};
use chrono::Local;
use log::{debug, error, info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracelab_core::connection::ConnectionRecord;
use tracelab_core::filter::{ConnectionsFilter, FilterOptions, FilterStats};
use tracelab_core::hostname::{DnsHostnameResolver, HostnameResolver};
use tracelab_core::port_pool::PortPool;
use tracelab_core::protocol_stack::ProtocolStack;
use tracelab_core::socket::{ProcfsSocketSource, SocketSource};
use tracelab_core::tracker::ConnectionTracker;
use tracelab_core::utils::{capture_timestamp, main_domain};

pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(3);

/// Everything a task knows about how its captures are performed.
#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub output_dir: PathBuf,
    pub extension: Option<ExtensionConfig>,
    pub request: Option<RequestConfig>,
    pub sniffer: SnifferConfig,
    pub timeout: Option<Duration>,
    pub save_log: bool,
    pub save_screenshot: bool,
}

impl CaptureSettings {
    pub fn validate(&self) -> Result<(), CaptureError> {
        if let Some(extension) = &self.extension {
            extension.validate()?;
        }
        match &self.request {
            Some(request) => request.validate(),
            None => Err(CaptureError::config(
                "a capture needs request_config to drive the fetch",
            )),
        }
    }

    fn proxy(&self) -> Option<&ExtensionConfig> {
        self.extension.as_ref().filter(|e| e.is_proxy())
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Wait after loading the extension before the fetch is launched.
    pub settle_delay: Duration,
    pub port_acquire_timeout: Option<Duration>,
    pub filter: FilterOptions,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            settle_delay: DEFAULT_SETTLE_DELAY,
            port_acquire_timeout: Some(Duration::from_secs(600)),
            filter: FilterOptions::default(),
        }
    }
}

/// Builds the components of a capture.
pub trait ComponentFactory: Send + Sync {
    fn extension(
        &self,
        config: &ExtensionConfig,
        params: ExtensionParams,
    ) -> Result<Box<dyn Extension>, CaptureError>;
    fn fetcher(
        &self,
        config: &RequestConfig,
        params: FetchParams,
    ) -> Result<Box<dyn Fetcher>, CaptureError>;
    fn sniffer(
        &self,
        config: &CaptureConfig,
        params: SnifferParams,
    ) -> Result<Box<dyn Sniffer>, CaptureError>;
    fn socket_source(&self, config: &TrackerConfig) -> Box<dyn SocketSource>;
    fn resolver(&self) -> Box<dyn HostnameResolver>;
}

/// Real processes, real capture devices, procfs and system DNS.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemComponents;

impl ComponentFactory for SystemComponents {
    fn extension(
        &self,
        config: &ExtensionConfig,
        params: ExtensionParams,
    ) -> Result<Box<dyn Extension>, CaptureError> {
        build_extension(config, params)
    }

    fn fetcher(
        &self,
        config: &RequestConfig,
        params: FetchParams,
    ) -> Result<Box<dyn Fetcher>, CaptureError> {
        build_fetcher(config, params)
    }

    fn sniffer(
        &self,
        config: &CaptureConfig,
        params: SnifferParams,
    ) -> Result<Box<dyn Sniffer>, CaptureError> {
        build_sniffer(config, params)
    }

    fn socket_source(&self, config: &TrackerConfig) -> Box<dyn SocketSource> {
        Box::new(ProcfsSocketSource::new(config.include_children))
    }

    fn resolver(&self) -> Box<dyn HostnameResolver> {
        Box::new(DnsHostnameResolver::new())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureReport {
    pub output_dir: PathBuf,
    pub pcap_path: PathBuf,
    pub snapshot_path: Option<PathBuf>,
    pub monitored_pid: u32,
    pub connections: usize,
    /// `None` when filtering was skipped or failed.
    pub filter: Option<FilterStats>,
}

/// `{base}/{domain}/proxy/{control}/{security}/{transport}/{timestamp}` or
/// `{base}/{domain}/direct/{timestamp}`.
pub fn capture_output_dir(
    base: &Path,
    url: &str,
    proxy_stack: Option<&ProtocolStack>,
    timestamp: &str,
) -> PathBuf {
    let mut dir = base.join(main_domain(url));
    match proxy_stack {
        Some(stack) => {
            dir.push("proxy");
            for fragment in stack.path_fragments() {
                dir.push(fragment);
            }
        }
        None => dir.push("direct"),
    }
    dir.join(timestamp)
}

pub struct CaptureOrchestrator {
    pool: Arc<PortPool>,
    components: Arc<dyn ComponentFactory>,
    options: OrchestratorOptions,
}

impl CaptureOrchestrator {
    pub fn new(
        pool: Arc<PortPool>,
        components: Arc<dyn ComponentFactory>,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            pool,
            components,
            options,
        }
    }

    pub fn options(&self) -> &OrchestratorOptions {
        &self.options
    }

    /// Performs a single capture of `url`. Blocks for the whole fetch.
    pub fn capture(
        &self,
        url: &str,
        settings: &CaptureSettings,
        cancel: &CancellationToken,
    ) -> Result<CaptureReport, CaptureError> {
        settings.validate()?;
        let timestamp = capture_timestamp(&Local::now());
        let domain = main_domain(url).to_owned();
        let proxy_stack = settings.proxy().and_then(|e| e.protocol_stack.as_ref());
        let output_dir = capture_output_dir(&settings.output_dir, url, proxy_stack, &timestamp);
        fs::create_dir_all(&output_dir)?;
        info!("Capturing {url} into {:?}", output_dir);

        let needs_filter =
            settings.proxy().is_none() && settings.sniffer.connection_tracker.enabled;
        let mut session = CaptureSession::new(self.pool.clone());
        let started = self.start(
            &mut session,
            url,
            settings,
            &output_dir,
            &domain,
            &timestamp,
            cancel,
        );
        let driven = started.and_then(|(pid, pcap_path)| {
            session.run_fetch()?;
            Ok((pid, pcap_path))
        });

        session.unload_extension();
        let records = session.stop_capture(needs_filter);
        session.cleanup();
        let (monitored_pid, pcap_path) = driven?;

        let filter = if needs_filter {
            self.filter_capture(&pcap_path, &records)
        } else {
            debug!("Skipping connection filtering of {:?}", pcap_path);
            None
        };
        Ok(CaptureReport {
            output_dir,
            pcap_path,
            snapshot_path: session.snapshot_path.take(),
            monitored_pid,
            connections: records.len(),
            filter,
        })
    }

    /// Steps up to the point where the fetch can be driven. Returns the
    /// monitored pid and the capture file.
    #[allow(clippy::too_many_arguments)]
    fn start(
        &self,
        session: &mut CaptureSession,
        url: &str,
        settings: &CaptureSettings,
        output_dir: &Path,
        domain: &str,
        timestamp: &str,
        cancel: &CancellationToken,
    ) -> Result<(u32, PathBuf), CaptureError> {
        let extension_info = match &settings.extension {
            Some(config) => Some(self.load_extension(session, config, settings, output_dir, cancel)?),
            None => None,
        };
        let proxy_info = extension_info
            .as_ref()
            .filter(|_| settings.proxy().is_some());

        let request = settings
            .request
            .as_ref()
            .ok_or(CaptureError::config("no fetcher configured for the capture"))?;
        let screenshot_dir = if settings.save_screenshot {
            let dir = output_dir.join("screenshot");
            fs::create_dir_all(&dir)?;
            Some(dir)
        } else {
            None
        };
        let fetch_params = FetchParams {
            url: url.to_owned(),
            timeout: settings.timeout,
            proxy_port: proxy_info.and_then(|info| info.allocated_port),
            screenshot_dir,
            output_dir: output_dir.to_path_buf(),
            save_log: settings.save_log,
        };
        let mut fetcher = self.components.fetcher(request, fetch_params)?;
        let fetch_setup = fetcher.setup();
        session.fetcher = Some(fetcher);
        let fetcher_info = fetch_setup?;
        let monitored_pid = proxy_info
            .map(|info| info.process_id)
            .unwrap_or(fetcher_info.process_id);
        debug!("Monitoring pid {monitored_pid}");

        let sniffer_config = &settings.sniffer;
        let sniffer_params = SnifferParams {
            interface: sniffer_config.capture.network_interface.clone(),
            filter_expression: sniffer_config
                .capture
                .filter_expression(proxy_info.and_then(|info| info.protocol_stack.as_ref())),
            output_path: output_dir.join(format!("{domain}_{timestamp}.pcap")),
            log_path: settings.save_log.then(|| output_dir.join("sniffer.log")),
        };
        let mut sniffer = self
            .components
            .sniffer(&sniffer_config.capture, sniffer_params)?;
        let pcap_path = sniffer.output_path().to_path_buf();
        let sniffer_start = sniffer.start();
        session.sniffer = Some(sniffer);
        sniffer_start?;

        let tracker_config = &sniffer_config.connection_tracker;
        if tracker_config.enabled {
            let snapshot_path =
                output_dir.join(format!("{domain}_{monitored_pid}_{timestamp}.json"));
            session.tracker = Some(ConnectionTracker::start(
                monitored_pid,
                self.components.socket_source(tracker_config),
                self.components.resolver(),
                tracker_config.interval(),
                &snapshot_path,
            )?);
            session.snapshot_path = Some(snapshot_path);
        }
        Ok((monitored_pid, pcap_path))
    }

    fn load_extension(
        &self,
        session: &mut CaptureSession,
        config: &ExtensionConfig,
        settings: &CaptureSettings,
        output_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<ExtensionInfo, CaptureError> {
        if config.is_proxy() {
            let deadline = self
                .options
                .port_acquire_timeout
                .map(|timeout| Instant::now() + timeout);
            let port = self.pool.acquire(deadline, cancel)?;
            debug!("Allocated proxy port {port}");
            session.port = Some(port);
        }
        let params = ExtensionParams {
            port: session.port,
            output_dir: output_dir.to_path_buf(),
            save_log: settings.save_log,
        };
        let mut extension = self.components.extension(config, params)?;
        let loaded = extension.load();
        session.extension = Some(extension);
        let info = loaded?;
        std::thread::sleep(self.options.settle_delay);
        Ok(info)
    }

    fn filter_capture(
        &self,
        pcap_path: &Path,
        records: &[ConnectionRecord],
    ) -> Option<FilterStats> {
        if records.is_empty() {
            warn!("No connections were tracked, {:?} will be emptied", pcap_path);
        }
        let filter = ConnectionsFilter::new(records).with_options(self.options.filter.clone());
        match filter.filter_file(pcap_path) {
            Ok(stats) => Some(stats),
            Err(e) => {
                error!("Filtering {:?} failed: {e}", pcap_path);
                None
            }
        }
    }
}

/// Components that are up and must be brought down again.
struct CaptureSession {
    pool: Arc<PortPool>,
    port: Option<u16>,
    extension: Option<Box<dyn Extension>>,
    fetcher: Option<Box<dyn Fetcher>>,
    sniffer: Option<Box<dyn Sniffer>>,
    tracker: Option<ConnectionTracker>,
    snapshot_path: Option<PathBuf>,
}

impl CaptureSession {
    fn new(pool: Arc<PortPool>) -> Self {
        Self {
            pool,
            port: None,
            extension: None,
            fetcher: None,
            sniffer: None,
            tracker: None,
            snapshot_path: None,
        }
    }

    fn run_fetch(&mut self) -> Result<(), CaptureError> {
        let fetcher = self.fetcher.as_mut().ok_or(CaptureError::new(
            CaptureErrorKind::ConfigError,
            "no fetcher was constructed",
        ))?;
        let info = fetcher.run()?;
        debug!("Fetch by pid {} completed", info.process_id);
        Ok(())
    }

    fn unload_extension(&mut self) {
        if let Some(mut extension) = self.extension.take() {
            if let Err(e) = extension.unload() {
                warn!("Unloading extension failed: {e}");
            }
        }
        if let Some(port) = self.port.take() {
            match self.pool.release(port) {
                Ok(()) => debug!("Released proxy port {port}"),
                Err(e) => error!("Releasing proxy port {port} failed: {e}"),
            }
        }
    }

    /// The tracker goes first when its table is needed for filtering.
    fn stop_capture(&mut self, tracker_first: bool) -> Vec<ConnectionRecord> {
        if tracker_first {
            let records = self.stop_tracker();
            self.stop_sniffer();
            records
        } else {
            self.stop_sniffer();
            self.stop_tracker()
        }
    }

    fn stop_sniffer(&mut self) {
        if let Some(mut sniffer) = self.sniffer.take() {
            if let Err(e) = sniffer.stop() {
                warn!("Stopping sniffer failed: {e}");
            }
        }
    }

    fn stop_tracker(&mut self) -> Vec<ConnectionRecord> {
        let Some(mut tracker) = self.tracker.take() else {
            return Vec::new();
        };
        tracker.stop().unwrap_or_else(|e| {
            warn!("Stopping connection tracker failed: {e}");
            Vec::new()
        })
    }

    fn cleanup(&mut self) {
        if let Some(mut fetcher) = self.fetcher.take() {
            if let Err(e) = fetcher.shutdown() {
                warn!("Fetcher shutdown failed: {e}");
            }
        }
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.unload_extension();
        self.stop_capture(true);
        self.cleanup();
    }
}
