//! State manager messages
//!
//! Commands and responses for the actor pattern.

use chrono::{DateTime, Utc};
use broadcaststore::StoreError;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::domain::{Broadcast, Recipient, Segment};

/// Errors from state operations
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Record already exists: {0}")]
    Conflict(String),

    #[error("Channel error")]
    ChannelError,
}

impl StateError {
    /// Store unavailable or actor gone; the operation may succeed later
    pub fn is_transient(&self) -> bool {
        matches!(self, StateError::StoreError(_) | StateError::ChannelError)
    }
}

impl From<StoreError> for StateError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { collection, id } => StateError::NotFound(format!("{}/{}", collection, id)),
            StoreError::AlreadyExists { collection, id } => StateError::Conflict(format!("{}/{}", collection, id)),
            other => StateError::StoreError(other.to_string()),
        }
    }
}

/// Response from state operations
pub type StateResponse<T> = Result<T, StateError>;

/// Commands sent to the StateManager actor
#[derive(Debug)]
pub enum StateCommand {
    // Recipient operations
    CreateRecipient {
        recipient: Recipient,
        reply: oneshot::Sender<StateResponse<String>>,
    },
    GetRecipient {
        id: String,
        reply: oneshot::Sender<StateResponse<Option<Recipient>>>,
    },
    GetRecipientByChatId {
        chat_id: String,
        reply: oneshot::Sender<StateResponse<Option<Recipient>>>,
    },
    UpdateRecipient {
        recipient: Recipient,
        reply: oneshot::Sender<StateResponse<()>>,
    },
    ListRecipients {
        segment_filter: Option<String>,
        reply: oneshot::Sender<StateResponse<Vec<Recipient>>>,
    },

    // Segment operations
    CreateSegment {
        segment: Segment,
        reply: oneshot::Sender<StateResponse<String>>,
    },
    GetSegment {
        name: String,
        reply: oneshot::Sender<StateResponse<Option<Segment>>>,
    },
    ListSegments {
        reply: oneshot::Sender<StateResponse<Vec<Segment>>>,
    },

    // Broadcast operations
    CreateBroadcast {
        broadcast: Broadcast,
        reply: oneshot::Sender<StateResponse<String>>,
    },
    GetBroadcast {
        id: String,
        reply: oneshot::Sender<StateResponse<Option<Broadcast>>>,
    },
    UpdateBroadcast {
        broadcast: Broadcast,
        reply: oneshot::Sender<StateResponse<()>>,
    },
    ListBroadcasts {
        sent_filter: Option<bool>,
        reply: oneshot::Sender<StateResponse<Vec<Broadcast>>>,
    },
    DueBroadcasts {
        now: DateTime<Utc>,
        reply: oneshot::Sender<StateResponse<Vec<Broadcast>>>,
    },

    // Maintenance
    RebuildIndexes {
        reply: oneshot::Sender<StateResponse<usize>>,
    },

    // Shutdown
    Shutdown,
}
