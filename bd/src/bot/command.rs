//! Bot command parsing

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

/// A slash command sent to the bot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotCommand {
    Start,
    Help,
    CreateBroadcast,
    ListBroadcasts,
    Join(Option<String>),
    Leave(Option<String>),
    Segments,
    Cancel,
    Unknown(String),
}

impl BotCommand {
    /// Parse `text` if it looks like a command (`/name args...`)
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if !text.starts_with('/') {
            return None;
        }
        text.parse().ok()
    }

    /// Whether the command may be used before registering
    pub fn allowed_unregistered(&self) -> bool {
        matches!(self, Self::Start | Self::Help | Self::Cancel)
    }
}

impl FromStr for BotCommand {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().splitn(2, char::is_whitespace);
        let head = parts.next().unwrap_or_default().trim_start_matches('/');
        // Group chats address commands as /name@botnick
        let name = head.split('@').next().unwrap_or_default().to_lowercase();
        let arg = parts
            .next()
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(str::to_string);

        Ok(match name.as_str() {
            "start" => Self::Start,
            "help" => Self::Help,
            "create_broadcast" => Self::CreateBroadcast,
            "list_broadcasts" => Self::ListBroadcasts,
            "join" => Self::Join(arg),
            "leave" => Self::Leave(arg),
            "segments" => Self::Segments,
            "cancel" => Self::Cancel,
            _ => Self::Unknown(name),
        })
    }
}

impl fmt::Display for BotCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "/start"),
            Self::Help => write!(f, "/help"),
            Self::CreateBroadcast => write!(f, "/create_broadcast"),
            Self::ListBroadcasts => write!(f, "/list_broadcasts"),
            Self::Join(_) => write!(f, "/join"),
            Self::Leave(_) => write!(f, "/leave"),
            Self::Segments => write!(f, "/segments"),
            Self::Cancel => write!(f, "/cancel"),
            Self::Unknown(name) => write!(f, "/{}", name),
        }
    }
}

/// Text shown for /help
pub const HELP_TEXT: &str = "Commands:
/start - register to receive broadcasts
/join <segment> - join a segment (no argument lists segments)
/leave <segment> - leave a segment (no argument lists your segments)
/segments - list segments
/create_broadcast - compose a scheduled broadcast
/list_broadcasts - list broadcasts and their status
/cancel - abandon the broadcast being composed
/help - show this message";
