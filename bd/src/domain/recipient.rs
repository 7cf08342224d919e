//! Recipient domain type
//!
//! Membership is denormalized onto the recipient as an ordered list of
//! segment names, indexed so that segment lookups run in the store.

use broadcaststore::{IndexValue, Record};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use super::id::generate_id;
use super::schedule::truncate_to_minute;
use super::segment::ALL_SEGMENT;

/// A registered chat user that broadcasts are delivered to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub id: String,

    /// Transport-level identity (the chat id messages are sent to)
    pub chat_id: String,

    pub first_name: String,

    #[serde(default)]
    pub last_name: String,

    /// Segment names, in join order, without duplicates
    #[serde(default)]
    pub segments: Vec<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Recipient {
    /// Create a new recipient with no memberships
    pub fn new(chat_id: impl Into<String>, first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        let now = truncate_to_minute(Utc::now());
        Self {
            id: generate_id("rcp"),
            chat_id: chat_id.into(),
            first_name: first_name.into(),
            last_name: last_name.into(),
            segments: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Create a newly registered recipient, enrolled in `all`
    pub fn register(chat_id: impl Into<String>, first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        let mut recipient = Self::new(chat_id, first_name, last_name);
        recipient.join(ALL_SEGMENT);
        recipient
    }

    /// Display name for replies and listings
    pub fn display_name(&self) -> String {
        if self.last_name.is_empty() {
            self.first_name.clone()
        } else {
            format!("{} {}", self.first_name, self.last_name)
        }
    }

    /// Check explicit membership in a segment
    pub fn is_member(&self, segment: &str) -> bool {
        self.segments.iter().any(|s| s == segment)
    }

    /// Add a membership; returns false if already a member
    pub fn join(&mut self, segment: &str) -> bool {
        if self.is_member(segment) {
            debug!(recipient = %self.id, %segment, "Recipient::join: already a member");
            return false;
        }
        self.segments.push(segment.to_string());
        self.touch();
        true
    }

    /// Remove a membership; returns false if not a member
    pub fn leave(&mut self, segment: &str) -> bool {
        if !self.is_member(segment) {
            debug!(recipient = %self.id, %segment, "Recipient::leave: not a member");
            return false;
        }
        self.segments.retain(|s| s != segment);
        self.touch();
        true
    }

    fn touch(&mut self) {
        self.updated_at = truncate_to_minute(Utc::now());
    }
}

impl Record for Recipient {
    fn id(&self) -> &str {
        &self.id
    }

    fn collection_name() -> &'static str {
        "recipients"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("chat_id".to_string(), IndexValue::String(self.chat_id.clone()));
        fields.insert("segments".to_string(), IndexValue::List(self.segments.clone()));
        fields
    }
}
