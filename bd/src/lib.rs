//! broadcastd - scheduled segmented broadcasts over a chat bot
//!
//! Operators register recipients into named segments, compose a broadcast
//! through a step-by-step chat dialog, and schedule it. A polling scheduler
//! delivers each due broadcast exactly once to every current member of its
//! target segment.
//!
//! # Modules
//!
//! - [`domain`] - Recipient, Segment and Broadcast records plus time helpers
//! - [`state`] - Actor over the record store (the broadcast repository)
//! - [`membership`] - Segment registry and membership operations
//! - [`dispatch`] - Bounded-concurrency fan-out of one message to a segment
//! - [`scheduler`] - Periodic due-broadcast sweep
//! - [`composer`] - Per-sender broadcast composition dialog
//! - [`transport`] - Chat API seam and the VK Teams client
//! - [`bot`] - Command parsing and per-sender message routing
//! - [`config`] - Configuration types and loading
//! - [`cli`] / [`daemon`] - Command-line interface and process management

pub mod bot;
pub mod cli;
pub mod composer;
pub mod config;
pub mod daemon;
pub mod dispatch;
pub mod domain;
pub mod membership;
pub mod scheduler;
pub mod state;
pub mod transport;

// Re-export commonly used types
pub use bot::{BotCommand, BotHandler, Router, RouterHandle};
pub use composer::{ComposeError, Composer, StageKind, StepOutcome};
pub use config::Config;
pub use dispatch::{DispatchError, DispatchReport, Dispatcher, PartialDispatchError};
pub use domain::{ALL_SEGMENT, Broadcast, DeliverySummary, Recipient, Segment};
pub use membership::MembershipStore;
pub use scheduler::{BroadcastScheduler, SchedulerConfig, SchedulerHandle, SweepReport};
pub use state::{StateError, StateManager, StoreStats};
pub use transport::{InboundMessage, SenderProfile, Transport, TransportError, VkTeamsClient};
