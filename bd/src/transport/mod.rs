//! Chat transport
//!
//! The `Transport` trait is the seam between the broadcast core and the chat
//! API: outbound text to one chat, and long-polled inbound messages. The
//! VK Teams client implements it over HTTP; tests use the mock.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

mod error;
mod vkteams;

pub use error::TransportError;
pub use vkteams::VkTeamsClient;

/// Sender display attributes carried on inbound messages
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SenderProfile {
    pub first_name: String,
    pub last_name: String,
}

/// One inbound text message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Chat the message came from; replies go back here
    pub chat_id: String,
    pub sender: SenderProfile,
    pub text: String,
}

/// Result of one poll: messages plus the cursor to poll from next
#[derive(Debug, Clone, Default)]
pub struct InboundBatch {
    pub messages: Vec<InboundMessage>,
    pub cursor: u64,
}

/// Chat API client
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send plain text to one chat
    async fn send_text(&self, chat_id: &str, text: &str) -> Result<(), TransportError>;

    /// Fetch messages after `cursor`, waiting up to the client's long-poll time
    async fn poll_events(&self, cursor: u64) -> Result<InboundBatch, TransportError>;
}

/// Pump inbound messages from `transport` into a channel
///
/// Poll errors are logged and retried after `backoff`. The task ends when the
/// receiver is dropped.
pub fn spawn_inbound(
    transport: Arc<dyn Transport>,
    backoff: Duration,
    capacity: usize,
) -> (mpsc::Receiver<InboundMessage>, JoinHandle<()>) {
    debug!(?backoff, capacity, "spawn_inbound: called");
    let (tx, rx) = mpsc::channel(capacity.max(1));

    let handle = tokio::spawn(async move {
        info!("Inbound pump started");
        let mut cursor = 0u64;

        loop {
            let batch = tokio::select! {
                result = transport.poll_events(cursor) => result,
                _ = tx.closed() => break,
            };

            match batch {
                Ok(batch) => {
                    if !batch.messages.is_empty() {
                        debug!(count = batch.messages.len(), cursor = batch.cursor, "spawn_inbound: received batch");
                    }
                    cursor = batch.cursor.max(cursor);
                    for message in batch.messages {
                        if tx.send(message).await.is_err() {
                            info!("Inbound receiver dropped, stopping pump");
                            return;
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, retryable = e.is_retryable(), "Polling events failed");
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = tx.closed() => break,
                    }
                }
            }
        }

        info!("Inbound pump stopped");
    });

    (rx, handle)
}


#[cfg(test)]
mod tests {
    use super::mock::{MockTransport, inbound};
    use super::*;

    #[tokio::test]
    async fn test_spawn_inbound_delivers_in_order() {
        let transport = Arc::new(MockTransport::new());
        transport.push_inbound(Ok(vec![inbound("a", "one"), inbound("a", "two")]));
        transport.push_inbound(Ok(vec![inbound("b", "three")]));

        let (mut rx, handle) = spawn_inbound(transport.clone(), Duration::from_millis(5), 8);

        let texts: Vec<String> = vec![
            rx.recv().await.unwrap().text,
            rx.recv().await.unwrap().text,
            rx.recv().await.unwrap().text,
        ];
        assert_eq!(texts, vec!["one", "two", "three"]);

        drop(rx);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_spawn_inbound_retries_after_error() {
        let transport = Arc::new(MockTransport::new());
        transport.push_inbound(Err(TransportError::Api {
            status: 502,
            message: "Bad gateway".to_string(),
        }));
        transport.push_inbound(Ok(vec![inbound("a", "after error")]));

        let (mut rx, handle) = spawn_inbound(transport.clone(), Duration::from_millis(5), 8);

        let message = rx.recv().await.unwrap();
        assert_eq!(message.text, "after error");
        assert!(transport.poll_count() >= 2);

        drop(rx);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
