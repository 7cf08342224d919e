//! Scheduler implementation

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::dispatch::Dispatcher;
use crate::state::{StateError, StateManager};

use super::config::SchedulerConfig;

/// Counts from one sweep
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// Broadcasts returned by the due query
    pub due: usize,
    /// Broadcasts whose fan-out ran (possibly with member failures)
    pub dispatched: usize,
    /// Broadcasts persisted as sent
    pub marked: usize,
    /// Broadcasts left unsent for the next sweep
    pub failed: usize,
}

/// Polls the repository for due broadcasts and delivers them
pub struct BroadcastScheduler {
    config: SchedulerConfig,
    state: StateManager,
    dispatcher: Dispatcher,
}

/// Handle to a running scheduler loop
pub struct SchedulerHandle {
    shutdown_tx: mpsc::Sender<()>,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop future ticks and wait for an in-flight sweep to finish
    pub async fn stop(self) {
        debug!("SchedulerHandle::stop: called");
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.join.await {
            error!(error = %e, "Scheduler task panicked");
        }
    }
}

impl BroadcastScheduler {
    pub fn new(config: SchedulerConfig, state: StateManager, dispatcher: Dispatcher) -> Self {
        debug!(?config, "BroadcastScheduler::new: called");
        Self {
            config,
            state,
            dispatcher,
        }
    }

    /// Spawn the polling loop
    pub fn start(self) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let join = tokio::spawn(self.run(shutdown_rx));
        SchedulerHandle { shutdown_tx, join }
    }

    async fn run(self, mut shutdown_rx: mpsc::Receiver<()>) {
        info!(interval_secs = self.config.poll_interval_secs, "Scheduler starting");

        let mut interval = tokio::time::interval(self.config.poll_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    // The sweep is awaited here, so shutdown waits for it
                    let report = self.sweep_at(Utc::now()).await;
                    if report.due > 0 {
                        info!(?report, "Sweep complete");
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        info!("Scheduler stopped");
    }

    /// Run one sweep as of `now`
    ///
    /// Each due broadcast is dispatched and then marked sent, whether or not
    /// every member was reached. A broadcast is left unsent (and retried next
    /// sweep) only if its members could not be resolved or the sent flag
    /// could not be persisted.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> SweepReport {
        debug!(%now, "sweep_at: called");
        let mut report = SweepReport::default();

        let due = match self.state.due_broadcasts(now).await {
            Ok(due) => due,
            Err(e) => {
                warn!(error = %e, "Due query failed, retrying next tick");
                return report;
            }
        };
        report.due = due.len();

        for broadcast in due {
            debug!(id = %broadcast.id, segment = %broadcast.segment, "sweep_at: dispatching");
            let dispatch = match self.dispatcher.send_to_segment(&broadcast.segment, &broadcast.body).await {
                Ok(dispatch) => dispatch,
                Err(e) => {
                    warn!(id = %broadcast.id, error = %e, "Dispatch failed, broadcast stays pending");
                    report.failed += 1;
                    continue;
                }
            };
            report.dispatched += 1;

            if let Some(partial) = dispatch.partial_error() {
                warn!(id = %broadcast.id, error = %partial, "Broadcast partially delivered");
            }

            let id = broadcast.id.clone();
            match self.state.mark_broadcast_sent(broadcast, dispatch.summary()).await {
                Ok(()) => {
                    info!(%id, delivered = dispatch.delivered, attempted = dispatch.attempted, "Broadcast sent");
                    report.marked += 1;
                }
                Err(e) => {
                    // Next sweep will dispatch the whole segment again
                    log_mark_failure(&id, &e);
                    report.failed += 1;
                }
            }
        }

        report
    }
}

fn log_mark_failure(id: &str, e: &StateError) {
    error!(%id, error = %e, transient = e.is_transient(), "Failed to mark broadcast sent; it will be re-dispatched");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Broadcast, Recipient};
    use crate::membership::MembershipStore;
    use crate::transport::mock::MockTransport;
    use crate::transport::{InboundBatch, Transport, TransportError};
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use std::sync::{Arc, Mutex};
    use tempfile::tempdir;

    struct Fixture {
        _temp: tempfile::TempDir,
        state: StateManager,
        transport: Arc<MockTransport>,
        scheduler: BroadcastScheduler,
    }

    async fn fixture(config: SchedulerConfig) -> Fixture {
        let temp = tempdir().unwrap();
        let state = StateManager::spawn(temp.path()).unwrap();
        let transport = Arc::new(MockTransport::new());
        let dispatcher = Dispatcher::new(
            MembershipStore::new(state.clone()),
            transport.clone(),
            config.max_concurrent_sends,
        );
        let scheduler = BroadcastScheduler::new(config, state.clone(), dispatcher);
        Fixture {
            _temp: temp,
            state,
            transport,
            scheduler,
        }
    }

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 6, 1, h, m, s).unwrap()
    }

    async fn add_member(state: &StateManager, chat: &str, segment: &str) {
        let mut recipient = Recipient::register(chat, "T", "");
        recipient.join(segment);
        state.create_recipient(recipient).await.unwrap();
    }

    #[tokio::test]
    async fn test_sweep_before_minute_sends_nothing() {
        let f = fixture(SchedulerConfig::default()).await;
        add_member(&f.state, "r1", "clients").await;
        let broadcast = Broadcast::new("Sale", "clients", "Hi", at(12, 0, 0));
        f.state.create_broadcast(broadcast).await.unwrap();

        let report = f.scheduler.sweep_at(at(11, 59, 59)).await;
        assert_eq!(report, SweepReport::default());
        assert!(f.transport.sent().is_empty());

        f.state.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_sweep_delivers_once_and_marks_sent() {
        let f = fixture(SchedulerConfig::default()).await;
        add_member(&f.state, "r1", "clients").await;
        let broadcast = Broadcast::new("Sale", "clients", "Hi", at(12, 0, 0));
        let id = f.state.create_broadcast(broadcast).await.unwrap();

        let report = f.scheduler.sweep_at(at(12, 0, 30)).await;
        assert_eq!(
            report,
            SweepReport {
                due: 1,
                dispatched: 1,
                marked: 1,
                failed: 0
            }
        );

        // Later sweeps do not re-send
        let report = f.scheduler.sweep_at(at(12, 1, 0)).await;
        assert_eq!(report.due, 0);
        assert_eq!(f.transport.sent_to("r1"), vec!["Hi"]);

        let stored = f.state.get_broadcast(&id).await.unwrap().unwrap();
        assert!(stored.sent);
        assert_eq!(stored.delivery.unwrap().delivered, 1);

        f.state.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_partial_failure_still_marks_sent() {
        let f = fixture(SchedulerConfig::default()).await;
        for chat in ["r1", "r2", "r3"] {
            add_member(&f.state, chat, "clients").await;
        }
        f.transport.fail_for("r2");
        let broadcast = Broadcast::new("Sale", "clients", "Hi", at(12, 0, 0));
        let id = f.state.create_broadcast(broadcast).await.unwrap();

        let report = f.scheduler.sweep_at(at(12, 5, 0)).await;
        assert_eq!(report.marked, 1);
        assert_eq!(f.transport.sent().len(), 2);

        let stored = f.state.get_broadcast(&id).await.unwrap().unwrap();
        assert!(stored.sent);
        assert_eq!(stored.delivery.unwrap().failed, vec!["r2".to_string()]);

        // The unreachable member is not retried
        f.scheduler.sweep_at(at(12, 6, 0)).await;
        assert_eq!(f.transport.sent().len(), 2);

        f.state.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_each_due_broadcast_dispatched_independently() {
        let f = fixture(SchedulerConfig::default()).await;
        add_member(&f.state, "r1", "clients").await;
        add_member(&f.state, "r2", "workers").await;
        f.state
            .create_broadcast(Broadcast::new("a", "clients", "to clients", at(9, 0, 0)))
            .await
            .unwrap();
        f.state
            .create_broadcast(Broadcast::new("b", "workers", "to workers", at(10, 0, 0)))
            .await
            .unwrap();
        f.state
            .create_broadcast(Broadcast::new("c", "all", "to all", at(10, 0, 0) + Duration::days(1)))
            .await
            .unwrap();

        let report = f.scheduler.sweep_at(at(10, 0, 0)).await;
        assert_eq!(report.due, 2);
        assert_eq!(report.marked, 2);
        assert_eq!(f.transport.sent_to("r1"), vec!["to clients"]);
        assert_eq!(f.transport.sent_to("r2"), vec!["to workers"]);

        f.state.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_store_unavailable_sweep_is_noop() {
        let f = fixture(SchedulerConfig::default()).await;
        f.state.shutdown().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let report = f.scheduler.sweep_at(at(12, 0, 0)).await;
        assert_eq!(report, SweepReport::default());
    }

    /// Delivers, then takes the store down before the sweep can mark the broadcast
    struct StoreKillingTransport {
        state: StateManager,
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Transport for StoreKillingTransport {
        async fn send_text(&self, chat_id: &str, _text: &str) -> Result<(), TransportError> {
            self.sent.lock().unwrap().push(chat_id.to_string());
            let _ = self.state.shutdown().await;
            Ok(())
        }

        async fn poll_events(&self, cursor: u64) -> Result<InboundBatch, TransportError> {
            Ok(InboundBatch {
                messages: Vec::new(),
                cursor,
            })
        }
    }

    #[tokio::test]
    async fn test_mark_failure_leaves_broadcast_pending() {
        let temp = tempdir().unwrap();
        let state = StateManager::spawn(temp.path()).unwrap();
        add_member(&state, "r1", "clients").await;
        let id = state
            .create_broadcast(Broadcast::new("Sale", "clients", "Hi", at(12, 0, 0)))
            .await
            .unwrap();

        let transport = Arc::new(StoreKillingTransport {
            state: state.clone(),
            sent: Mutex::new(Vec::new()),
        });
        let dispatcher = Dispatcher::new(MembershipStore::new(state.clone()), transport.clone(), 1);
        let scheduler = BroadcastScheduler::new(SchedulerConfig::default(), state.clone(), dispatcher);

        let report = scheduler.sweep_at(at(12, 0, 30)).await;
        assert_eq!(
            report,
            SweepReport {
                due: 1,
                dispatched: 1,
                marked: 0,
                failed: 1
            }
        );
        assert_eq!(*transport.sent.lock().unwrap(), vec!["r1".to_string()]);

        // Reopened store still sees the broadcast as due
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let reopened = StateManager::spawn(temp.path()).unwrap();
        let stored = reopened.get_broadcast(&id).await.unwrap().unwrap();
        assert!(!stored.sent);
        let due = reopened.due_broadcasts(at(12, 1, 0)).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, id);

        reopened.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_resolve_failure_leaves_broadcast_pending() {
        let f = fixture(SchedulerConfig::default()).await;
        let id = f
            .state
            .create_broadcast(Broadcast::new("Sale", "clients", "Hi", at(12, 0, 0)))
            .await
            .unwrap();

        // Membership lookups go to a store that is already gone
        let dead_dir = tempdir().unwrap();
        let dead = StateManager::spawn(dead_dir.path()).unwrap();
        dead.shutdown().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let dispatcher = Dispatcher::new(MembershipStore::new(dead), f.transport.clone(), 4);
        let scheduler = BroadcastScheduler::new(SchedulerConfig::default(), f.state.clone(), dispatcher);

        let report = scheduler.sweep_at(at(12, 0, 30)).await;
        assert_eq!(
            report,
            SweepReport {
                due: 1,
                dispatched: 0,
                marked: 0,
                failed: 1
            }
        );
        assert!(f.transport.sent().is_empty());

        let stored = f.state.get_broadcast(&id).await.unwrap().unwrap();
        assert!(!stored.sent);
        assert_eq!(f.state.due_broadcasts(at(12, 1, 0)).await.unwrap().len(), 1);

        f.state.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_loop_ticks_and_stops() {
        let config = SchedulerConfig {
            poll_interval_secs: 1,
            ..Default::default()
        };
        let f = fixture(config).await;
        add_member(&f.state, "r1", "clients").await;
        let past = Utc::now() - Duration::minutes(5);
        let id = f
            .state
            .create_broadcast(Broadcast::new("Now", "clients", "Ping", past))
            .await
            .unwrap();

        let state = f.state.clone();
        let transport = f.transport.clone();
        let handle = f.scheduler.start();

        // The first tick fires immediately
        let mut sent = false;
        for _ in 0..50 {
            if state.get_broadcast(&id).await.unwrap().unwrap().sent {
                sent = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert!(sent);
        assert_eq!(transport.sent_to("r1"), vec!["Ping"]);

        tokio::time::timeout(std::time::Duration::from_secs(2), handle.stop())
            .await
            .unwrap();
        state.shutdown().await.unwrap();
    }
}
