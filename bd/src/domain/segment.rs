//! Segment domain type

use broadcaststore::{IndexValue, Record};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::schedule::truncate_to_minute;

/// Segment that implicitly contains every recipient
pub const ALL_SEGMENT: &str = "all";

/// A named group of recipients
///
/// The name is the record id, so names are unique and case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Segment {
    /// Create a new segment
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let now = truncate_to_minute(Utc::now());
        Self {
            id: name.clone(),
            name,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether this is the implicit every-recipient segment
    pub fn is_all(&self) -> bool {
        self.name == ALL_SEGMENT
    }
}

impl Record for Segment {
    fn id(&self) -> &str {
        &self.id
    }

    fn collection_name() -> &'static str {
        "segments"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        HashMap::new()
    }
}
