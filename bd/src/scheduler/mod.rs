//! Due-broadcast scheduler
//!
//! A fixed-interval loop that sweeps for due broadcasts, dispatches each one
//! and marks it sent. Sweeps never overlap: the next tick waits for the
//! current sweep to finish.

mod config;
mod core;

pub use config::SchedulerConfig;
pub use core::{BroadcastScheduler, SchedulerHandle, SweepReport};
