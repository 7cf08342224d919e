//! Composition sessions
//!
//! One session per sender, holding the typed stage of an in-progress
//! broadcast. The registry is owned by the composer; nothing is persisted.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::debug;

/// Wizard stage together with the fields collected so far
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    CollectingName,
    CollectingSegment {
        name: String,
    },
    CollectingDate {
        name: String,
        segment: String,
    },
    CollectingBody {
        name: String,
        segment: String,
        scheduled_at: DateTime<Utc>,
    },
}

impl Stage {
    pub fn kind(&self) -> StageKind {
        match self {
            Stage::CollectingName => StageKind::CollectingName,
            Stage::CollectingSegment { .. } => StageKind::CollectingSegment,
            Stage::CollectingDate { .. } => StageKind::CollectingDate,
            Stage::CollectingBody { .. } => StageKind::CollectingBody,
        }
    }
}

/// Field-less stage tag, including the terminal stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    CollectingName,
    CollectingSegment,
    CollectingDate,
    CollectingBody,
    Complete,
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CollectingName => write!(f, "collecting_name"),
            Self::CollectingSegment => write!(f, "collecting_segment"),
            Self::CollectingDate => write!(f, "collecting_date"),
            Self::CollectingBody => write!(f, "collecting_body"),
            Self::Complete => write!(f, "complete"),
        }
    }
}

#[derive(Debug)]
struct Session {
    generation: u64,
    stage: Stage,
}

#[derive(Debug, Default)]
struct Inner {
    sessions: HashMap<String, Session>,
    next_generation: u64,
}

/// Per-sender session table
///
/// Every session gets a fresh generation number. Writes that carry a stale
/// generation (the session was replaced or cancelled since it was read) are
/// dropped.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    inner: Mutex<Inner>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a session at `CollectingName`, replacing any existing one
    pub async fn begin(&self, sender: &str) -> u64 {
        let mut inner = self.inner.lock().await;
        inner.next_generation += 1;
        let generation = inner.next_generation;
        let replaced = inner
            .sessions
            .insert(
                sender.to_string(),
                Session {
                    generation,
                    stage: Stage::CollectingName,
                },
            )
            .is_some();
        debug!(%sender, generation, replaced, "SessionRegistry::begin: called");
        generation
    }

    /// Current generation and stage for `sender`
    pub async fn snapshot(&self, sender: &str) -> Option<(u64, Stage)> {
        let inner = self.inner.lock().await;
        inner
            .sessions
            .get(sender)
            .map(|s| (s.generation, s.stage.clone()))
    }

    /// Store a new stage if the session is still at `generation`
    pub async fn commit(&self, sender: &str, generation: u64, stage: Stage) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.sessions.get_mut(sender) {
            Some(session) if session.generation == generation => {
                debug!(%sender, generation, stage = %stage.kind(), "SessionRegistry::commit: advanced");
                session.stage = stage;
                true
            }
            _ => {
                debug!(%sender, generation, "SessionRegistry::commit: stale generation");
                false
            }
        }
    }

    /// Remove the session if it is still at `generation`
    pub async fn finish(&self, sender: &str, generation: u64) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.sessions.get(sender).is_some_and(|s| s.generation == generation) {
            inner.sessions.remove(sender);
            return true;
        }
        false
    }

    /// Remove the session unconditionally; returns whether one existed
    pub async fn cancel(&self, sender: &str) -> bool {
        let removed = self.inner.lock().await.sessions.remove(sender).is_some();
        debug!(%sender, removed, "SessionRegistry::cancel: called");
        removed
    }

    pub async fn stage_of(&self, sender: &str) -> Option<StageKind> {
        self.inner.lock().await.sessions.get(sender).map(|s| s.stage.kind())
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.sessions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
