//! Inbound message router
//!
//! Messages from one sender are handled strictly in arrival order on that
//! sender's lane; different senders run concurrently. Routing never waits on
//! a lane: a slow sender only backs up its own queue. A lane that sits idle
//! exits on its own, and a replacement lane for the same sender holds its
//! queue until the old one has drained.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::RouterConfig;
use crate::transport::InboundMessage;

use super::handler::BotHandler;

/// One sender's queue and worker
struct Lane {
    tx: mpsc::UnboundedSender<InboundMessage>,
    join: JoinHandle<()>,
}

/// Fans inbound messages out to per-sender lanes
pub struct Router {
    handler: Arc<BotHandler>,
    config: RouterConfig,
    lanes: HashMap<String, Lane>,
}

/// Handle to a running router
pub struct RouterHandle {
    shutdown_tx: mpsc::Sender<()>,
    join: JoinHandle<()>,
}

impl RouterHandle {
    /// Stop intake, then wait for queued messages to be handled
    pub async fn stop(self) {
        debug!("RouterHandle::stop: called");
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.join.await {
            error!(error = %e, "Router task panicked");
        }
    }
}

impl Router {
    pub fn new(handler: Arc<BotHandler>, config: RouterConfig) -> Self {
        debug!(?config, "Router::new: called");
        Self {
            handler,
            config,
            lanes: HashMap::new(),
        }
    }

    /// Spawn the routing loop over `inbound`
    pub fn start(self, inbound: mpsc::Receiver<InboundMessage>) -> RouterHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let join = tokio::spawn(self.run(inbound, shutdown_rx));
        RouterHandle { shutdown_tx, join }
    }

    async fn run(mut self, mut inbound: mpsc::Receiver<InboundMessage>, mut shutdown_rx: mpsc::Receiver<()>) {
        info!("Router starting");

        loop {
            tokio::select! {
                // Messages already received are routed before a pending shutdown
                biased;
                message = inbound.recv() => match message {
                    Some(message) => self.route(message),
                    None => {
                        info!("Inbound stream ended");
                        break;
                    }
                },
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        self.drain().await;
        info!("Router stopped");
    }

    /// Queue a message on its sender's lane
    fn route(&mut self, message: InboundMessage) {
        self.lanes.retain(|_, lane| !lane.join.is_finished());

        let sender = message.chat_id.clone();
        let mut message = message;

        if let Some(lane) = self.lanes.get(&sender) {
            match lane.tx.send(message) {
                Ok(()) => return,
                Err(mpsc::error::SendError(returned)) => message = returned,
            }
        }

        // A closing lane is chained behind, not awaited here
        let previous = self.lanes.remove(&sender).map(|lane| lane.join);
        if previous.is_some() {
            debug!(%sender, "route: lane closing, queueing behind it");
        }

        let lane = self.spawn_lane(&sender, previous);
        if lane.tx.send(message).is_err() {
            error!(%sender, "New lane closed before first message");
        }
        self.lanes.insert(sender, lane);
    }

    fn spawn_lane(&self, sender: &str, previous: Option<JoinHandle<()>>) -> Lane {
        debug!(%sender, lanes = self.lanes.len(), "spawn_lane: called");
        let (tx, rx) = mpsc::unbounded_channel();
        let join = tokio::spawn(run_lane(
            sender.to_string(),
            self.handler.clone(),
            rx,
            self.config.lane_idle(),
            previous,
        ));
        Lane { tx, join }
    }

    /// Close every lane and wait for queued messages
    async fn drain(&mut self) {
        debug!(lanes = self.lanes.len(), "drain: called");
        for (sender, lane) in self.lanes.drain() {
            drop(lane.tx);
            if let Err(e) = lane.join.await {
                error!(%sender, error = %e, "Lane task panicked");
            }
        }
    }
}

async fn run_lane(
    sender: String,
    handler: Arc<BotHandler>,
    mut rx: mpsc::UnboundedReceiver<InboundMessage>,
    idle: Duration,
    previous: Option<JoinHandle<()>>,
) {
    debug!(%sender, "Lane started");

    if let Some(previous) = previous
        && let Err(e) = previous.await
    {
        error!(%sender, error = %e, "Previous lane task panicked");
    }

    loop {
        match tokio::time::timeout(idle, rx.recv()).await {
            Ok(Some(message)) => handler.handle(&message).await,
            Ok(None) => break,
            Err(_) => {
                debug!(%sender, "Lane idle, closing");
                rx.close();
                while let Some(message) = rx.recv().await {
                    handler.handle(&message).await;
                }
                break;
            }
        }
    }

    debug!(%sender, "Lane stopped");
}
