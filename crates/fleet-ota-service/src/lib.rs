//! Fleet OTA service daemon (`ota-serviced`)
//!
//! Serves the rollout core over HTTP: operators upload releases and drive
//! deployments, devices poll for updates, report progress and download
//! signed binaries.

#![deny(clippy::unwrap_used)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod api;
pub mod config;
pub mod daemon;
pub mod observability;

pub use api::{API_PREFIX, ApiError, AppState, router};
pub use config::ServiceConfig;
pub use daemon::{OtaDaemon, shutdown_signal};
pub use observability::{ApiMetrics, init_logging};
