//! Resumable capture tasks and their group scheduler.
pub mod config;
pub mod error;
pub mod group;
pub mod scheduler;
pub mod targets;
pub mod task;
