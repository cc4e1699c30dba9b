//! The watchdog: tracked ids, arm timer, state machine and daemonizer.
//!
//! ```text
//!   owner process                      watchdog process (own session)
//!  ┌──────────────┐   add/rm/arm/...  ┌──────────────────────────────┐
//!  │WatchdogHandle│ ───── pipe ─────▶ │ read loop ─▶ TrackedIdSet    │
//!  └──────────────┘                   │ ArmTimer  ─▶ arm flag / trip │
//!                                     └──────────────────────────────┘
//! ```

pub mod daemon;
pub mod machine;
pub mod timer;
pub mod tracked;

pub use daemon::{
    detach_session, locate_program, spawn_watchdog, Daemonizer, WatchdogHandle, PROGRAM_ENV,
    PROGRAM_NAME, SERVE_SUBCOMMAND,
};
pub use machine::{PipeWatchdog, RunOutcome, TripAction, Watchdog, READ_RETRY_DELAY};
pub use timer::{schedule, ArmTimer, Dispatch, TimerFlow};
pub use tracked::TrackedIdSet;
