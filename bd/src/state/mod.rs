//! State management with actor pattern
//!
//! StateManager owns the BroadcastStore and processes messages via channels,
//! providing thread-safe access to recipients, segments and broadcasts. It is
//! also the Broadcast Repository: writes normalize broadcast times to the
//! minute and `due_broadcasts` is the scheduler's due query.

mod manager;
mod messages;

pub use manager::{StateManager, StoreStats};
pub use messages::{StateCommand, StateError, StateResponse};
