//! Broadcast composition wizard
//!
//! Collects a broadcast's fields one inbound message at a time:
//! name, then target segment, then delivery time, then body. Completing the
//! body step persists the broadcast and ends the session. Invalid input is
//! rejected with a reason and leaves the session where it was.

mod session;

pub use session::{SessionRegistry, Stage, StageKind};

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::domain::schedule::{format_local, parse_schedule};
use crate::domain::{ALL_SEGMENT, Broadcast};
use crate::membership::MembershipStore;
use crate::state::{StateError, StateManager};

/// Composition failed for a reason outside the sender's input
#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("Store unavailable: {0}")]
    Store(#[from] StateError),
}

/// Result of feeding one message to an active session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Input accepted; the session moved to `stage`
    Advanced { stage: StageKind, prompt: String },
    /// Input rejected; the session stays at `stage`
    Rejected { stage: StageKind, reason: String },
    /// Body accepted; the broadcast was persisted and the session cleared
    Completed(Broadcast),
}

/// Per-sender composition state machine
pub struct Composer {
    sessions: SessionRegistry,
    state: StateManager,
    membership: MembershipStore,
    tz: Tz,
}

impl Composer {
    pub fn new(state: StateManager, membership: MembershipStore, tz: Tz) -> Self {
        Self {
            sessions: SessionRegistry::new(),
            state,
            membership,
            tz,
        }
    }

    /// Reference zone for dates typed by senders
    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// Start (or restart) a session for `sender`; returns the first prompt
    pub async fn begin(&self, sender: &str) -> String {
        debug!(%sender, "begin: called");
        self.sessions.begin(sender).await;
        "Creating a new broadcast. Send its name (or /cancel to stop).".to_string()
    }

    /// Discard the sender's session; returns whether one existed
    pub async fn cancel(&self, sender: &str) -> bool {
        debug!(%sender, "cancel: called");
        let cancelled = self.sessions.cancel(sender).await;
        if cancelled {
            info!(%sender, "Composition cancelled");
        }
        cancelled
    }

    /// Current stage for `sender`, if a session is active
    pub async fn stage(&self, sender: &str) -> Option<StageKind> {
        self.sessions.stage_of(sender).await
    }

    pub async fn is_active(&self, sender: &str) -> bool {
        self.stage(sender).await.is_some()
    }

    /// Feed one message to the sender's session
    ///
    /// Returns `Ok(None)` when the sender has no active session (the message
    /// was not consumed).
    pub async fn handle_input(&self, sender: &str, text: &str) -> Result<Option<StepOutcome>, ComposeError> {
        self.handle_input_at(sender, text, Utc::now()).await
    }

    /// `handle_input` with an explicit current instant
    pub async fn handle_input_at(
        &self,
        sender: &str,
        text: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<StepOutcome>, ComposeError> {
        let Some((generation, stage)) = self.sessions.snapshot(sender).await else {
            return Ok(None);
        };
        debug!(%sender, generation, stage = %stage.kind(), "handle_input_at: called");

        let (next, prompt) = match stage {
            Stage::CollectingName => {
                if text.trim().is_empty() {
                    return Ok(Some(rejected(StageKind::CollectingName, "The name cannot be empty. Send a name.")));
                }
                let prompt = self.segment_prompt().await;
                (Stage::CollectingSegment { name: text.to_string() }, prompt)
            }

            Stage::CollectingSegment { name } => {
                let segment = text.trim();
                if !self.membership.segment_exists(segment).await? {
                    debug!(%sender, %segment, "handle_input_at: unknown segment");
                    let reason = format!(
                        "Segment '{}' does not exist. Send \"{}\" or an existing segment name.",
                        segment, ALL_SEGMENT
                    );
                    return Ok(Some(rejected(StageKind::CollectingSegment, reason)));
                }
                let prompt = format!(
                    "Segment: {}. When should it go out? Use DD.MM.YYYY HH:MM ({}).",
                    segment, self.tz
                );
                (
                    Stage::CollectingDate {
                        name,
                        segment: segment.to_string(),
                    },
                    prompt,
                )
            }

            Stage::CollectingDate { name, segment } => {
                let scheduled_at = match parse_schedule(text, self.tz) {
                    Ok(t) => t,
                    Err(e) => {
                        debug!(%sender, error = %e, "handle_input_at: date parse failed");
                        return Ok(Some(rejected(
                            StageKind::CollectingDate,
                            "Could not read that date. Use DD.MM.YYYY HH:MM, for example 25.12.2030 10:00.",
                        )));
                    }
                };
                if scheduled_at <= now {
                    debug!(%sender, %scheduled_at, %now, "handle_input_at: date not in the future");
                    return Ok(Some(rejected(
                        StageKind::CollectingDate,
                        "The date must be in the future. Send a later date.",
                    )));
                }
                let prompt = format!(
                    "Scheduled for {}. Now send the message text.",
                    format_local(scheduled_at, self.tz)
                );
                (
                    Stage::CollectingBody {
                        name,
                        segment,
                        scheduled_at,
                    },
                    prompt,
                )
            }

            Stage::CollectingBody {
                name,
                segment,
                scheduled_at,
            } => {
                let mut broadcast = Broadcast::new(name, segment, text, scheduled_at);
                if let Err(e) = self.state.create_broadcast(broadcast.clone()).await {
                    // Session stays at CollectingBody so the body can be resent
                    warn!(%sender, error = %e, "Failed to persist composed broadcast");
                    return Err(e.into());
                }
                broadcast.normalize();
                self.sessions.finish(sender, generation).await;
                info!(
                    %sender,
                    id = %broadcast.id,
                    segment = %broadcast.segment,
                    scheduled_at = %broadcast.scheduled_at,
                    "Broadcast composed"
                );
                return Ok(Some(StepOutcome::Completed(broadcast)));
            }
        };

        let kind = next.kind();
        if !self.sessions.commit(sender, generation, next).await {
            debug!(%sender, "handle_input_at: session superseded");
            return Ok(None);
        }
        Ok(Some(StepOutcome::Advanced { stage: kind, prompt }))
    }

    /// Reply text for a step outcome
    pub fn reply_for(&self, outcome: &StepOutcome) -> String {
        match outcome {
            StepOutcome::Advanced { prompt, .. } => prompt.clone(),
            StepOutcome::Rejected { reason, .. } => reason.clone(),
            StepOutcome::Completed(broadcast) => format!(
                "Broadcast created.\nName: {}\nSegment: {}\nDate: {}",
                broadcast.name,
                broadcast.segment,
                format_local(broadcast.scheduled_at, self.tz)
            ),
        }
    }

    async fn segment_prompt(&self) -> String {
        let base = format!("Which segment should receive it? Send \"{}\" or a segment name.", ALL_SEGMENT);
        match self.membership.list_segments().await {
            Ok(segments) if !segments.is_empty() => {
                let names: Vec<&str> = segments.iter().map(|s| s.name.as_str()).collect();
                format!("{}\nAvailable: {}", base, names.join(", "))
            }
            Ok(_) => base,
            Err(e) => {
                debug!(error = %e, "segment_prompt: listing segments failed");
                base
            }
        }
    }
}

fn rejected(stage: StageKind, reason: impl Into<String>) -> StepOutcome {
    StepOutcome::Rejected {
        stage,
        reason: reason.into(),
    }
}
