//! Broadcast fan-out
//!
//! Resolves a segment's current members and sends the body to each one,
//! once. A failed send is collected in the report and never stops delivery to
//! the remaining members.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::domain::{DeliverySummary, Recipient};
use crate::membership::MembershipStore;
use crate::state::StateError;
use crate::transport::{Transport, TransportError};

/// Dispatch could not start: the member list was unavailable
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Failed to resolve members of '{segment}': {source}")]
    Resolve {
        segment: String,
        #[source]
        source: StateError,
    },
}

/// Some members could not be reached
#[derive(Debug, Error)]
#[error("{} of {attempted} sends to '{segment}' failed: {}", .failures.len(), describe(.failures))]
pub struct PartialDispatchError {
    pub segment: String,
    pub attempted: usize,
    pub failures: Vec<DeliveryFailure>,
}

fn describe(failures: &[DeliveryFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{} ({})", f.recipient, f.error))
        .collect::<Vec<_>>()
        .join(", ")
}

/// One member's failed send
#[derive(Debug, Clone)]
pub struct DeliveryFailure {
    /// Chat id of the member
    pub recipient: String,
    pub error: String,
}

/// Outcome of one fan-out
#[derive(Debug, Clone)]
pub struct DispatchReport {
    pub segment: String,
    pub attempted: usize,
    pub delivered: usize,
    pub failures: Vec<DeliveryFailure>,
}

impl DispatchReport {
    /// Aggregated error naming each unreachable member, if any
    pub fn partial_error(&self) -> Option<PartialDispatchError> {
        if self.failures.is_empty() {
            return None;
        }
        Some(PartialDispatchError {
            segment: self.segment.clone(),
            attempted: self.attempted,
            failures: self.failures.clone(),
        })
    }

    /// Summary persisted on the broadcast
    pub fn summary(&self) -> DeliverySummary {
        DeliverySummary {
            attempted: self.attempted,
            delivered: self.delivered,
            failed: self.failures.iter().map(|f| f.recipient.clone()).collect(),
        }
    }
}

/// Sends one body to every member of a segment
#[derive(Clone)]
pub struct Dispatcher {
    membership: MembershipStore,
    transport: Arc<dyn Transport>,
    max_concurrent_sends: usize,
}

impl Dispatcher {
    pub fn new(membership: MembershipStore, transport: Arc<dyn Transport>, max_concurrent_sends: usize) -> Self {
        Self {
            membership,
            transport,
            max_concurrent_sends: max_concurrent_sends.max(1),
        }
    }

    /// Send `body` to every current member of `segment`
    ///
    /// Only member resolution can fail the call; per-member send failures are
    /// in the report. An empty segment is a successful zero-send dispatch.
    pub async fn send_to_segment(&self, segment: &str, body: &str) -> Result<DispatchReport, DispatchError> {
        debug!(%segment, body_len = body.len(), "send_to_segment: called");
        let members = self
            .membership
            .members_of(segment)
            .await
            .map_err(|source| DispatchError::Resolve {
                segment: segment.to_string(),
                source,
            })?;

        let attempted = members.len();
        debug!(%segment, attempted, "send_to_segment: resolved members");

        let results: Vec<(Recipient, Result<(), TransportError>)> = stream::iter(members)
            .map(|recipient| {
                let transport = self.transport.clone();
                async move {
                    let result = transport.send_text(&recipient.chat_id, body).await;
                    (recipient, result)
                }
            })
            .buffer_unordered(self.max_concurrent_sends)
            .collect()
            .await;

        let mut report = DispatchReport {
            segment: segment.to_string(),
            attempted,
            delivered: 0,
            failures: Vec::new(),
        };

        for (recipient, result) in results {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(%segment, chat_id = %recipient.chat_id, error = %e, "Delivery failed");
                    report.failures.push(DeliveryFailure {
                        recipient: recipient.chat_id,
                        error: e.to_string(),
                    });
                }
            }
        }
        report.failures.sort_by(|a, b| a.recipient.cmp(&b.recipient));

        info!(
            %segment,
            attempted = report.attempted,
            delivered = report.delivered,
            failed = report.failures.len(),
            "Dispatch complete"
        );
        Ok(report)
    }
}
