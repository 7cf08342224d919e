//! Per-message handling: cancel, active composition, commands, fallback

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::composer::{ComposeError, Composer};
use crate::domain::schedule::format_local;
use crate::domain::{ALL_SEGMENT, Recipient};
use crate::membership::MembershipStore;
use crate::state::{StateError, StateManager};
use crate::transport::{InboundMessage, Transport};

use super::command::{BotCommand, HELP_TEXT};

const REGISTER_FIRST: &str = "Please register with /start first.";
const NOT_UNDERSTOOD: &str = "I did not understand that. Use /help to see the commands.";
const TRY_AGAIN: &str = "Something went wrong. Please try again.";
const WELCOME: &str = "Welcome! You are registered and will receive broadcasts.\nUse /help to see the commands.";
const ALREADY_REGISTERED: &str = "You are already registered. Use /help to see the commands.";

/// Turns one inbound message into one reply
pub struct BotHandler {
    state: StateManager,
    membership: MembershipStore,
    composer: Composer,
    transport: Arc<dyn Transport>,
}

impl BotHandler {
    pub fn new(state: StateManager, composer: Composer, transport: Arc<dyn Transport>) -> Self {
        Self {
            membership: MembershipStore::new(state.clone()),
            state,
            composer,
            transport,
        }
    }

    pub fn composer(&self) -> &Composer {
        &self.composer
    }

    /// Handle a message and send the reply back to its chat
    ///
    /// A failed reply is logged and otherwise ignored.
    pub async fn handle(&self, message: &InboundMessage) {
        let reply = self.reply_to(message).await;
        if let Err(e) = self.transport.send_text(&message.chat_id, &reply).await {
            warn!(chat_id = %message.chat_id, error = %e, "Failed to send reply");
        }
    }

    /// Compute the reply for a message
    pub async fn reply_to(&self, message: &InboundMessage) -> String {
        let chat_id = message.chat_id.as_str();
        let command = BotCommand::parse(&message.text);
        debug!(%chat_id, ?command, "reply_to: called");

        if command == Some(BotCommand::Cancel) {
            return if self.composer.cancel(chat_id).await {
                "Broadcast creation cancelled.".to_string()
            } else {
                "Nothing to cancel.".to_string()
            };
        }

        match self.composer.handle_input(chat_id, &message.text).await {
            Ok(Some(outcome)) => return self.composer.reply_for(&outcome),
            Ok(None) => {}
            Err(ComposeError::Store(e)) => {
                warn!(%chat_id, error = %e, "Composition step failed");
                return "Could not save the broadcast. Send the message text again, or /cancel.".to_string();
            }
        }

        let Some(command) = command else {
            return NOT_UNDERSTOOD.to_string();
        };

        match self.run_command(command, message).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(%chat_id, error = %e, transient = e.is_transient(), "Command failed");
                TRY_AGAIN.to_string()
            }
        }
    }

    async fn run_command(&self, command: BotCommand, message: &InboundMessage) -> Result<String, StateError> {
        let chat_id = message.chat_id.as_str();
        info!(%chat_id, %command, "Received command");

        let recipient = self.state.get_recipient_by_chat_id(chat_id).await?;
        if recipient.is_none() && !command.allowed_unregistered() {
            debug!(%chat_id, "run_command: sender not registered");
            return Ok(REGISTER_FIRST.to_string());
        }

        match (command, recipient) {
            (BotCommand::Start, Some(_)) => Ok(ALREADY_REGISTERED.to_string()),
            (BotCommand::Start, None) => self.register(message).await,
            (BotCommand::Help, _) => Ok(HELP_TEXT.to_string()),
            (BotCommand::Cancel, _) => Ok("Nothing to cancel.".to_string()),
            (BotCommand::Unknown(name), _) => Ok(format!("Unknown command /{}. Use /help to see the commands.", name)),
            (_, None) => Ok(REGISTER_FIRST.to_string()),
            (BotCommand::CreateBroadcast, Some(_)) => Ok(self.composer.begin(chat_id).await),
            (BotCommand::ListBroadcasts, Some(_)) => self.list_broadcasts().await,
            (BotCommand::Join(None), Some(_)) => self.available_segments().await,
            (BotCommand::Join(Some(segment)), Some(recipient)) => self.join(&recipient, &segment).await,
            (BotCommand::Leave(None), Some(recipient)) => Ok(own_segments(&recipient)),
            (BotCommand::Leave(Some(segment)), Some(recipient)) => self.leave(&recipient, &segment).await,
            (BotCommand::Segments, Some(recipient)) => self.segments_for(&recipient).await,
        }
    }

    async fn register(&self, message: &InboundMessage) -> Result<String, StateError> {
        let recipient = Recipient::register(
            &message.chat_id,
            &message.sender.first_name,
            &message.sender.last_name,
        );
        match self.state.create_recipient(recipient).await {
            Ok(id) => {
                info!(chat_id = %message.chat_id, %id, "Recipient registered");
                Ok(WELCOME.to_string())
            }
            Err(StateError::Conflict(_)) => Ok(ALREADY_REGISTERED.to_string()),
            Err(e) => Err(e),
        }
    }

    async fn list_broadcasts(&self) -> Result<String, StateError> {
        let broadcasts = self.state.list_broadcasts(None).await?;
        if broadcasts.is_empty() {
            return Ok("There are no broadcasts.".to_string());
        }

        let tz = self.composer.timezone();
        let mut reply = String::from("Broadcasts:\n");
        for broadcast in broadcasts {
            reply.push_str(&format!(
                "\n{}\nSegment: {}\nDate: {}\nStatus: {}\n",
                broadcast.name,
                broadcast.segment,
                format_local(broadcast.scheduled_at, tz),
                broadcast.status_label()
            ));
        }
        Ok(reply)
    }

    async fn available_segments(&self) -> Result<String, StateError> {
        let segments = self.membership.list_segments().await?;
        let mut reply = String::from("Available segments:\n");
        for segment in &segments {
            reply.push_str(&format!(" - {}\n", segment.name));
        }
        reply.push_str("Use: /join <segment>");
        Ok(reply)
    }

    async fn join(&self, recipient: &Recipient, segment: &str) -> Result<String, StateError> {
        self.membership.ensure_segment(segment).await?;
        if self.membership.add_member(&recipient.id, segment).await? {
            Ok(format!("You joined '{}'.", segment))
        } else {
            Ok(format!("You are already in '{}'.", segment))
        }
    }

    async fn leave(&self, recipient: &Recipient, segment: &str) -> Result<String, StateError> {
        if segment == ALL_SEGMENT {
            return Ok(format!("Every registered user receives '{}' broadcasts.", ALL_SEGMENT));
        }
        if self.membership.remove_member(&recipient.id, segment).await? {
            Ok(format!("You left '{}'.", segment))
        } else {
            Ok(format!("You are not in '{}'.", segment))
        }
    }

    async fn segments_for(&self, recipient: &Recipient) -> Result<String, StateError> {
        let segments = self.membership.list_segments().await?;
        if segments.is_empty() {
            return Ok("There are no segments yet.".to_string());
        }

        let mut reply = String::from("Segments:\n");
        for segment in &segments {
            let mark = if recipient.is_member(&segment.name) || segment.is_all() {
                "member"
            } else {
                "not a member"
            };
            reply.push_str(&format!(" - {} ({})\n", segment.name, mark));
        }
        Ok(reply)
    }
}

fn own_segments(recipient: &Recipient) -> String {
    let mut reply = String::from("Your segments:\n");
    for segment in &recipient.segments {
        reply.push_str(&format!(" - {}\n", segment));
    }
    reply.push_str("Use: /leave <segment>");
    reply
}
