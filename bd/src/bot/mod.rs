//! Chat bot front end
//!
//! Parses slash commands, routes each inbound message to the composer or a
//! command, and replies through the transport.

mod command;
mod handler;
mod router;

pub use command::{BotCommand, HELP_TEXT};
pub use handler::BotHandler;
pub use router::{Router, RouterHandle};
