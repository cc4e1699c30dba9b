//! Core types for the watchdog.
//!
//! - **IDs**: the opaque `TrackedId`
//! - **Errors**: application error types with thiserror derives
//! - **Config**: watchdog and observability configuration

mod config;
mod errors;
mod ids;

pub use config::{ChannelClosePolicy, Config, ObservabilityConfig, WatchdogConfig, PERIOD_ENV};
pub use errors::{Error, Result};
pub use ids::TrackedId;
