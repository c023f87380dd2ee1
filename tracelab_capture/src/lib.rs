//! Capture components and their orchestration.
//!
//! Extensions (local proxy clients), fetchers (the clients performing the
//! visit) and sniffers (packet capture backends) are external processes or
//! threads started and stopped around a single capture by
//! [`orchestrator::CaptureOrchestrator`].
pub mod config;
pub mod error;
pub mod extension;
pub mod fetcher;
pub mod orchestrator;
pub mod process;
pub mod sniffer;
