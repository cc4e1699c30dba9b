//! # Liveness Watchdog
//!
//! A detached process that keeps a set of work item IDs (containers, tasks)
//! on behalf of an owner and terminates itself when the owner stops proving
//! it is alive.
//!
//! - The owner spawns the watchdog with [`watchdog::Daemonizer`] and keeps a
//!   [`watchdog::WatchdogHandle`] on the write end of a pipe.
//! - It sends `add <id>;`, `rm <id>;`, `clear;`, `dump;`, `arm;`, `quit;`.
//! - The watchdog consumes the arm once per period. If a period passes
//!   without an arm after the previous one was consumed, it clears its IDs
//!   and exits with status 32.
//!
//! ## Architecture
//!
//! ```text
//!                    ┌──────────────────────────────────┐
//!   owner ── pipe ─▶ │           PipeWatchdog           │
//!                    │  ┌──────────┐   ┌────────────┐   │
//!                    │  │read loop │──▶│TrackedIdSet│   │
//!                    │  └──────────┘   └────────────┘   │
//!                    │  ┌──────────┐   ┌────────────┐   │
//!                    │  │ ArmTimer │──▶│  arm flag  │   │
//!                    │  └──────────┘   └────────────┘   │
//!                    └──────────────────────────────────┘
//! ```

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

pub mod ipc;
pub mod types;
pub mod watchdog;

// Internal utilities
pub mod observability;
pub mod validation;

pub use types::{Config, Error, Result, TrackedId, WatchdogConfig};
