//! StateManager - actor that owns BroadcastStore
//!
//! Processes commands via channels for thread-safe access to persistent state.

use std::path::Path;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::domain::schedule::truncate_to_minute;
use crate::domain::{Broadcast, DeliverySummary, Filter, FilterOp, IndexValue, Recipient, Segment, Store};

use super::messages::{StateCommand, StateError, StateResponse};

/// Record counts for status output
#[derive(Debug, Default, serde::Serialize)]
pub struct StoreStats {
    pub recipients: u64,
    pub segments: u64,
    pub broadcasts_pending: u64,
    pub broadcasts_sent: u64,
    /// Sent broadcasts where at least one member was not reached
    pub broadcasts_partial: u64,
}

/// Handle to send commands to the StateManager
#[derive(Clone)]
pub struct StateManager {
    tx: mpsc::Sender<StateCommand>,
}

impl StateManager {
    /// Spawn a new StateManager actor over the store in `store_path`
    pub fn spawn(store_path: impl AsRef<Path>) -> eyre::Result<Self> {
        debug!(store_path = %store_path.as_ref().display(), "spawn: called");
        let store = Store::open(store_path.as_ref())?;
        Self::with_store(store)
    }

    /// Spawn a StateManager actor over an already opened store
    pub fn with_store(mut store: Store) -> eyre::Result<Self> {
        debug!("with_store: called");

        // Index layout may have changed between versions
        let recipient_count = store.rebuild_indexes::<Recipient>()?;
        let broadcast_count = store.rebuild_indexes::<Broadcast>()?;
        info!(recipient_count, broadcast_count, "Rebuilt indexes for Recipient and Broadcast records");

        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(actor_loop(store, rx));

        info!("StateManager spawned");
        Ok(Self { tx })
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<StateResponse<T>>) -> StateCommand,
    ) -> StateResponse<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| StateError::ChannelError)?;
        reply_rx.await.map_err(|_| StateError::ChannelError)?
    }

    // === Recipient operations ===

    /// Create a new Recipient
    pub async fn create_recipient(&self, recipient: Recipient) -> StateResponse<String> {
        debug!(recipient_id = %recipient.id, chat_id = %recipient.chat_id, "create_recipient: called");
        self.request(|reply| StateCommand::CreateRecipient { recipient, reply })
            .await
    }

    /// Get a Recipient by ID
    pub async fn get_recipient(&self, id: &str) -> StateResponse<Option<Recipient>> {
        debug!(%id, "get_recipient: called");
        let id = id.to_string();
        self.request(|reply| StateCommand::GetRecipient { id, reply }).await
    }

    /// Get a Recipient by transport chat id
    pub async fn get_recipient_by_chat_id(&self, chat_id: &str) -> StateResponse<Option<Recipient>> {
        debug!(%chat_id, "get_recipient_by_chat_id: called");
        let chat_id = chat_id.to_string();
        self.request(|reply| StateCommand::GetRecipientByChatId { chat_id, reply })
            .await
    }

    /// Get a Recipient by ID, returning error if not found
    pub async fn get_recipient_required(&self, id: &str) -> StateResponse<Recipient> {
        debug!(%id, "get_recipient_required: called");
        self.get_recipient(id)
            .await?
            .ok_or_else(|| StateError::NotFound(format!("Recipient {}", id)))
    }

    /// Replace a Recipient record
    pub async fn update_recipient(&self, recipient: Recipient) -> StateResponse<()> {
        debug!(recipient_id = %recipient.id, segments = ?recipient.segments, "update_recipient: called");
        self.request(|reply| StateCommand::UpdateRecipient { recipient, reply })
            .await
    }

    /// List every Recipient
    pub async fn list_recipients(&self) -> StateResponse<Vec<Recipient>> {
        debug!("list_recipients: called");
        self.request(|reply| StateCommand::ListRecipients {
            segment_filter: None,
            reply,
        })
        .await
    }

    /// List Recipients whose membership list contains `segment`
    ///
    /// Explicit membership only; `all` is not special-cased here.
    pub async fn list_recipients_in_segment(&self, segment: &str) -> StateResponse<Vec<Recipient>> {
        debug!(%segment, "list_recipients_in_segment: called");
        let segment_filter = Some(segment.to_string());
        self.request(|reply| StateCommand::ListRecipients { segment_filter, reply })
            .await
    }

    // === Segment operations ===

    /// Create a new Segment; `Conflict` if the name is taken
    pub async fn create_segment(&self, segment: Segment) -> StateResponse<String> {
        debug!(name = %segment.name, "create_segment: called");
        self.request(|reply| StateCommand::CreateSegment { segment, reply })
            .await
    }

    /// Get a Segment by name
    pub async fn get_segment(&self, name: &str) -> StateResponse<Option<Segment>> {
        debug!(%name, "get_segment: called");
        let name = name.to_string();
        self.request(|reply| StateCommand::GetSegment { name, reply }).await
    }

    /// List all Segments, ordered by name
    pub async fn list_segments(&self) -> StateResponse<Vec<Segment>> {
        debug!("list_segments: called");
        self.request(|reply| StateCommand::ListSegments { reply }).await
    }

    // === Broadcast operations ===

    /// Create a new Broadcast (times truncated to the minute)
    pub async fn create_broadcast(&self, mut broadcast: Broadcast) -> StateResponse<String> {
        debug!(
            broadcast_id = %broadcast.id,
            segment = %broadcast.segment,
            scheduled_at = %broadcast.scheduled_at,
            "create_broadcast: called"
        );
        broadcast.normalize();
        self.request(|reply| StateCommand::CreateBroadcast { broadcast, reply })
            .await
    }

    /// Get a Broadcast by ID
    pub async fn get_broadcast(&self, id: &str) -> StateResponse<Option<Broadcast>> {
        debug!(%id, "get_broadcast: called");
        let id = id.to_string();
        self.request(|reply| StateCommand::GetBroadcast { id, reply }).await
    }

    /// Replace a Broadcast record (times truncated to the minute)
    pub async fn update_broadcast(&self, mut broadcast: Broadcast) -> StateResponse<()> {
        debug!(broadcast_id = %broadcast.id, sent = broadcast.sent, "update_broadcast: called");
        broadcast.normalize();
        self.request(|reply| StateCommand::UpdateBroadcast { broadcast, reply })
            .await
    }

    /// List Broadcasts, optionally by sent flag
    pub async fn list_broadcasts(&self, sent_filter: Option<bool>) -> StateResponse<Vec<Broadcast>> {
        debug!(?sent_filter, "list_broadcasts: called");
        self.request(|reply| StateCommand::ListBroadcasts { sent_filter, reply })
            .await
    }

    /// Unsent Broadcasts scheduled at or before the minute containing `now`
    pub async fn due_broadcasts(&self, now: DateTime<Utc>) -> StateResponse<Vec<Broadcast>> {
        debug!(%now, "due_broadcasts: called");
        self.request(|reply| StateCommand::DueBroadcasts { now, reply }).await
    }

    /// Flag a Broadcast sent and record its delivery outcome
    pub async fn mark_broadcast_sent(&self, mut broadcast: Broadcast, summary: DeliverySummary) -> StateResponse<()> {
        debug!(broadcast_id = %broadcast.id, "mark_broadcast_sent: called");
        broadcast.mark_sent(summary);
        self.update_broadcast(broadcast).await
    }

    /// Rebuild indexes for all record types
    pub async fn rebuild_indexes(&self) -> StateResponse<usize> {
        debug!("rebuild_indexes: called");
        self.request(|reply| StateCommand::RebuildIndexes { reply }).await
    }

    /// Shutdown the StateManager
    pub async fn shutdown(&self) -> Result<(), StateError> {
        debug!("shutdown: called");
        self.tx
            .send(StateCommand::Shutdown)
            .await
            .map_err(|_| StateError::ChannelError)
    }

    // === Convenience methods ===

    /// Count records for status output
    pub async fn stats(&self) -> StateResponse<StoreStats> {
        debug!("stats: called");
        let mut stats = StoreStats {
            recipients: self.list_recipients().await?.len() as u64,
            segments: self.list_segments().await?.len() as u64,
            ..Default::default()
        };

        for broadcast in self.list_broadcasts(None).await? {
            if !broadcast.sent {
                stats.broadcasts_pending += 1;
                continue;
            }
            stats.broadcasts_sent += 1;
            if broadcast.delivery.as_ref().is_some_and(|d| !d.is_complete()) {
                stats.broadcasts_partial += 1;
            }
        }

        Ok(stats)
    }
}

/// The actor loop that owns the Store and processes commands
async fn actor_loop(mut store: Store, mut rx: mpsc::Receiver<StateCommand>) {
    debug!("StateManager actor started");

    while let Some(cmd) = rx.recv().await {
        match cmd {
            StateCommand::CreateRecipient { recipient, reply } => {
                debug!(recipient_id = %recipient.id, "actor_loop: CreateRecipient command");
                let result = create_recipient_unique(&mut store, recipient);
                let _ = reply.send(result);
            }

            StateCommand::GetRecipient { id, reply } => {
                debug!(%id, "actor_loop: GetRecipient command");
                let _ = reply.send(store.get(&id).map_err(StateError::from));
            }

            StateCommand::GetRecipientByChatId { chat_id, reply } => {
                debug!(%chat_id, "actor_loop: GetRecipientByChatId command");
                let _ = reply.send(store.get_by_field("chat_id", chat_id).map_err(StateError::from));
            }

            StateCommand::UpdateRecipient { recipient, reply } => {
                debug!(recipient_id = %recipient.id, "actor_loop: UpdateRecipient command");
                let _ = reply.send(store.update(recipient).map_err(StateError::from));
            }

            StateCommand::ListRecipients { segment_filter, reply } => {
                debug!(?segment_filter, "actor_loop: ListRecipients command");
                let mut filters = Vec::new();
                if let Some(segment) = segment_filter {
                    filters.push(Filter::new("segments", FilterOp::Contains, segment));
                }
                let _ = reply.send(store.list(&filters).map_err(StateError::from));
            }

            StateCommand::CreateSegment { segment, reply } => {
                debug!(name = %segment.name, "actor_loop: CreateSegment command");
                let _ = reply.send(store.create(segment).map_err(StateError::from));
            }

            StateCommand::GetSegment { name, reply } => {
                debug!(%name, "actor_loop: GetSegment command");
                let _ = reply.send(store.get(&name).map_err(StateError::from));
            }

            StateCommand::ListSegments { reply } => {
                debug!("actor_loop: ListSegments command");
                let _ = reply.send(store.list(&[]).map_err(StateError::from));
            }

            StateCommand::CreateBroadcast { broadcast, reply } => {
                debug!(broadcast_id = %broadcast.id, "actor_loop: CreateBroadcast command");
                let _ = reply.send(store.create(broadcast).map_err(StateError::from));
            }

            StateCommand::GetBroadcast { id, reply } => {
                debug!(%id, "actor_loop: GetBroadcast command");
                let _ = reply.send(store.get(&id).map_err(StateError::from));
            }

            StateCommand::UpdateBroadcast { broadcast, reply } => {
                debug!(broadcast_id = %broadcast.id, "actor_loop: UpdateBroadcast command");
                let _ = reply.send(store.update(broadcast).map_err(StateError::from));
            }

            StateCommand::ListBroadcasts { sent_filter, reply } => {
                debug!(?sent_filter, "actor_loop: ListBroadcasts command");
                let mut filters = Vec::new();
                if let Some(sent) = sent_filter {
                    filters.push(Filter::eq("sent", IndexValue::Bool(sent)));
                }
                let _ = reply.send(store.list(&filters).map_err(StateError::from));
            }

            StateCommand::DueBroadcasts { now, reply } => {
                let cutoff = truncate_to_minute(now);
                debug!(%cutoff, "actor_loop: DueBroadcasts command");
                let filters = [
                    Filter::new("scheduled_at", FilterOp::Lte, cutoff.timestamp_millis()),
                    Filter::eq("sent", false),
                ];
                let _ = reply.send(store.list(&filters).map_err(StateError::from));
            }

            StateCommand::RebuildIndexes { reply } => {
                debug!("actor_loop: RebuildIndexes command");
                let result = store
                    .rebuild_indexes::<Recipient>()
                    .and_then(|r| Ok(r + store.rebuild_indexes::<Broadcast>()?))
                    .map_err(StateError::from);
                let _ = reply.send(result);
            }

            StateCommand::Shutdown => {
                info!("StateManager shutting down");
                break;
            }
        }
    }

    debug!("StateManager actor stopped");
}

/// Create a recipient unless one already exists for its chat id
fn create_recipient_unique(store: &mut Store, recipient: Recipient) -> StateResponse<String> {
    let existing: Option<Recipient> = store.get_by_field("chat_id", recipient.chat_id.clone())?;
    if let Some(existing) = existing {
        warn!(chat_id = %recipient.chat_id, existing = %existing.id, "Recipient already registered");
        return Err(StateError::Conflict(format!("recipient chat {}", recipient.chat_id)));
    }
    Ok(store.create(recipient)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use tempfile::tempdir;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 3, 1, h, m, s).unwrap()
    }

    #[tokio::test]
    async fn test_state_manager_recipient_crud() {
        let temp = tempdir().unwrap();
        let manager = StateManager::spawn(temp.path()).unwrap();

        let recipient = Recipient::register("chat-1", "Ann", "");
        let id = manager.create_recipient(recipient.clone()).await.unwrap();
        assert_eq!(id, recipient.id);

        let by_chat = manager.get_recipient_by_chat_id("chat-1").await.unwrap().unwrap();
        assert_eq!(by_chat.id, id);

        let mut updated = by_chat.clone();
        updated.join("clients");
        manager.update_recipient(updated).await.unwrap();

        let clients = manager.list_recipients_in_segment("clients").await.unwrap();
        assert_eq!(clients.len(), 1);
        assert!(manager.list_recipients_in_segment("workers").await.unwrap().is_empty());

        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_chat_id_is_conflict() {
        let temp = tempdir().unwrap();
        let manager = StateManager::spawn(temp.path()).unwrap();

        manager
            .create_recipient(Recipient::register("chat-1", "Ann", ""))
            .await
            .unwrap();
        let result = manager.create_recipient(Recipient::register("chat-1", "Ann", "")).await;
        assert!(matches!(result, Err(StateError::Conflict(_))));

        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_get_recipient_required_not_found() {
        let temp = tempdir().unwrap();
        let manager = StateManager::spawn(temp.path()).unwrap();

        let result = manager.get_recipient_required("rcp-missing").await;
        assert!(matches!(result, Err(StateError::NotFound(_))));

        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_segment_create_conflict() {
        let temp = tempdir().unwrap();
        let manager = StateManager::spawn(temp.path()).unwrap();

        manager.create_segment(Segment::new("clients")).await.unwrap();
        let result = manager.create_segment(Segment::new("clients")).await;
        assert!(matches!(result, Err(StateError::Conflict(_))));
        assert!(manager.get_segment("clients").await.unwrap().is_some());
        assert!(manager.get_segment("Clients").await.unwrap().is_none());

        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_broadcast_writes_truncate_to_minute() {
        let temp = tempdir().unwrap();
        let manager = StateManager::spawn(temp.path()).unwrap();

        let mut broadcast = Broadcast::new("Sale", "all", "Hello", at(10, 0, 0));
        broadcast.scheduled_at = at(10, 0, 42);
        let id = manager.create_broadcast(broadcast).await.unwrap();

        let stored = manager.get_broadcast(&id).await.unwrap().unwrap();
        assert_eq!(stored.scheduled_at, at(10, 0, 0));
        assert_eq!(stored.created_at.timestamp() % 60, 0);

        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_due_broadcasts_window() {
        let temp = tempdir().unwrap();
        let manager = StateManager::spawn(temp.path()).unwrap();

        let early = Broadcast::new("early", "all", "a", at(9, 0, 0));
        let on_time = Broadcast::new("on-time", "all", "b", at(10, 0, 0));
        let later = Broadcast::new("later", "all", "c", at(10, 1, 0));
        for b in [early.clone(), on_time.clone(), later.clone()] {
            manager.create_broadcast(b).await.unwrap();
        }

        // 10:00:59 is still minute 10:00
        let due = manager.due_broadcasts(at(10, 0, 59)).await.unwrap();
        let mut ids: Vec<_> = due.iter().map(|b| b.id.clone()).collect();
        ids.sort();
        let mut expected = vec![early.id.clone(), on_time.id.clone()];
        expected.sort();
        assert_eq!(ids, expected);

        assert!(manager.due_broadcasts(at(8, 59, 59)).await.unwrap().is_empty());

        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_sent_broadcast_never_due() {
        let temp = tempdir().unwrap();
        let manager = StateManager::spawn(temp.path()).unwrap();

        let broadcast = Broadcast::new("Sale", "all", "Hello", at(10, 0, 0));
        manager.create_broadcast(broadcast.clone()).await.unwrap();
        manager
            .mark_broadcast_sent(broadcast.clone(), DeliverySummary::default())
            .await
            .unwrap();

        assert!(
            manager
                .due_broadcasts(at(10, 0, 0) + Duration::days(1))
                .await
                .unwrap()
                .is_empty()
        );
        let sent = manager.list_broadcasts(Some(true)).await.unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].delivery, Some(DeliverySummary::default()));
        assert!(manager.list_broadcasts(Some(false)).await.unwrap().is_empty());

        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_update_missing_broadcast_not_found() {
        let temp = tempdir().unwrap();
        let manager = StateManager::spawn(temp.path()).unwrap();

        let result = manager
            .update_broadcast(Broadcast::new("ghost", "all", "x", at(10, 0, 0)))
            .await;
        assert!(matches!(result, Err(StateError::NotFound(_))));

        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_stats_and_rebuild() {
        let temp = tempdir().unwrap();
        let manager = StateManager::spawn(temp.path()).unwrap();

        manager
            .create_recipient(Recipient::register("chat-1", "Ann", ""))
            .await
            .unwrap();
        manager.create_segment(Segment::new("all")).await.unwrap();
        let sent = Broadcast::new("a", "all", "x", at(10, 0, 0));
        manager.create_broadcast(sent.clone()).await.unwrap();
        manager
            .mark_broadcast_sent(
                sent,
                DeliverySummary {
                    attempted: 1,
                    delivered: 0,
                    failed: vec!["chat-1".to_string()],
                },
            )
            .await
            .unwrap();
        manager
            .create_broadcast(Broadcast::new("b", "all", "y", at(11, 0, 0)))
            .await
            .unwrap();

        let stats = manager.stats().await.unwrap();
        assert_eq!(stats.recipients, 1);
        assert_eq!(stats.segments, 1);
        assert_eq!(stats.broadcasts_pending, 1);
        assert_eq!(stats.broadcasts_sent, 1);
        assert_eq!(stats.broadcasts_partial, 1);

        assert_eq!(manager.rebuild_indexes().await.unwrap(), 3);

        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_calls_after_shutdown_are_channel_errors() {
        let temp = tempdir().unwrap();
        let manager = StateManager::spawn(temp.path()).unwrap();
        manager.shutdown().await.unwrap();

        // Give the actor a moment to exit
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let result = manager.list_segments().await;
        assert!(matches!(result, Err(StateError::ChannelError)));
    }
}
