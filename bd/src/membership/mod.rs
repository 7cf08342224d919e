//! Segment membership
//!
//! Membership lives on each Recipient as a list of segment names; the
//! segment registry holds the names operators can target. Every mutation is
//! a whole-record replace, and every operation here is idempotent so callers
//! can retry freely.

use tracing::{debug, info};

use crate::domain::{ALL_SEGMENT, Recipient, Segment};
use crate::state::{StateError, StateManager};

/// Membership operations over the state actor
#[derive(Clone)]
pub struct MembershipStore {
    state: StateManager,
}

impl MembershipStore {
    pub fn new(state: StateManager) -> Self {
        Self { state }
    }

    /// Create the segment if absent; an existing segment is not an error
    ///
    /// Returns true if the segment was created by this call.
    pub async fn ensure_segment(&self, name: &str) -> Result<bool, StateError> {
        debug!(%name, "ensure_segment: called");
        match self.state.create_segment(Segment::new(name)).await {
            Ok(_) => {
                info!(%name, "Segment created");
                Ok(true)
            }
            Err(StateError::Conflict(_)) => {
                debug!(%name, "ensure_segment: already exists");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Add `segment` to the recipient's memberships
    ///
    /// Returns true if membership changed. The segment record is not required
    /// to exist.
    pub async fn add_member(&self, recipient_id: &str, segment: &str) -> Result<bool, StateError> {
        debug!(%recipient_id, %segment, "add_member: called");
        let mut recipient = self.state.get_recipient_required(recipient_id).await?;
        if !recipient.join(segment) {
            return Ok(false);
        }
        self.state.update_recipient(recipient).await?;
        info!(%recipient_id, %segment, "Member added");
        Ok(true)
    }

    /// Remove `segment` from the recipient's memberships
    ///
    /// Returns true if membership changed.
    pub async fn remove_member(&self, recipient_id: &str, segment: &str) -> Result<bool, StateError> {
        debug!(%recipient_id, %segment, "remove_member: called");
        let mut recipient = self.state.get_recipient_required(recipient_id).await?;
        if !recipient.leave(segment) {
            return Ok(false);
        }
        self.state.update_recipient(recipient).await?;
        info!(%recipient_id, %segment, "Member removed");
        Ok(true)
    }

    /// Current members of a segment
    ///
    /// `all` resolves to every recipient regardless of stored memberships.
    pub async fn members_of(&self, segment: &str) -> Result<Vec<Recipient>, StateError> {
        debug!(%segment, "members_of: called");
        if segment == ALL_SEGMENT {
            debug!("members_of: resolving all recipients");
            return self.state.list_recipients().await;
        }
        self.state.list_recipients_in_segment(segment).await
    }

    /// Whether a segment can be targeted by a broadcast
    pub async fn segment_exists(&self, name: &str) -> Result<bool, StateError> {
        debug!(%name, "segment_exists: called");
        if name == ALL_SEGMENT {
            return Ok(true);
        }
        Ok(self.state.get_segment(name).await?.is_some())
    }

    /// All registered segments, ordered by name
    pub async fn list_segments(&self) -> Result<Vec<Segment>, StateError> {
        debug!("list_segments: called");
        self.state.list_segments().await
    }
}
