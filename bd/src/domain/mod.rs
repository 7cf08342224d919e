//! Domain types for broadcastd
//!
//! Recipient, Segment and Broadcast implement the Record trait for
//! BroadcastStore persistence. `schedule` holds the minute-granularity
//! time helpers shared by the composer and the scheduler.

mod broadcast;
mod id;
mod recipient;
pub mod schedule;
mod segment;

pub use broadcast::{Broadcast, DeliverySummary};
pub use id::generate_id;
pub use recipient::Recipient;
pub use segment::{ALL_SEGMENT, Segment};

// Re-export store types for convenience
pub use broadcaststore::{Filter, FilterOp, IndexValue, Record, Store};
