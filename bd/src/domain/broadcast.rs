//! Broadcast domain type
//!
//! A scheduled message to every member of one segment. `sent` flips to true
//! exactly once, after the scheduler's dispatch attempt; the due query never
//! returns a sent broadcast.

use broadcaststore::{IndexValue, Record};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use super::id::generate_id;
use super::schedule::truncate_to_minute;

/// Outcome of the single dispatch attempt, recorded when marking sent
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliverySummary {
    /// Sends attempted (one per resolved member)
    pub attempted: usize,
    /// Sends the transport accepted
    pub delivered: usize,
    /// Chat ids whose send failed
    #[serde(default)]
    pub failed: Vec<String>,
}

impl DeliverySummary {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Broadcast {
    pub id: String,
    pub name: String,
    pub body: String,

    /// Target segment name
    pub segment: String,

    /// Delivery minute (UTC, seconds always zero once persisted)
    pub scheduled_at: DateTime<Utc>,

    #[serde(default)]
    pub sent: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery: Option<DeliverySummary>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Broadcast {
    /// Create a new, unsent broadcast
    pub fn new(
        name: impl Into<String>,
        segment: impl Into<String>,
        body: impl Into<String>,
        scheduled_at: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: generate_id("bc"),
            name: name.into(),
            body: body.into(),
            segment: segment.into(),
            scheduled_at: truncate_to_minute(scheduled_at),
            sent: false,
            delivery: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Truncate all instants to minute granularity
    pub fn normalize(&mut self) {
        self.scheduled_at = truncate_to_minute(self.scheduled_at);
        self.created_at = truncate_to_minute(self.created_at);
        self.updated_at = truncate_to_minute(self.updated_at);
    }

    /// Whether the broadcast should go out at `now`
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.sent && self.scheduled_at <= truncate_to_minute(now)
    }

    /// Mark as sent, recording the delivery outcome
    pub fn mark_sent(&mut self, summary: DeliverySummary) {
        debug!(
            id = %self.id,
            attempted = summary.attempted,
            failed = summary.failed.len(),
            "Broadcast::mark_sent: called"
        );
        self.sent = true;
        self.delivery = Some(summary);
        self.updated_at = Utc::now();
    }

    /// Human-readable status for listings
    pub fn status_label(&self) -> &'static str {
        match (&self.sent, &self.delivery) {
            (false, _) => "pending",
            (true, Some(summary)) if !summary.is_complete() => "sent (partial)",
            (true, _) => "sent",
        }
    }
}

impl Record for Broadcast {
    fn id(&self) -> &str {
        &self.id
    }

    fn collection_name() -> &'static str {
        "broadcasts"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("segment".to_string(), IndexValue::String(self.segment.clone()));
        fields.insert(
            "scheduled_at".to_string(),
            IndexValue::Int(self.scheduled_at.timestamp_millis()),
        );
        fields.insert("sent".to_string(), IndexValue::Bool(self.sent));
        fields
    }
}
