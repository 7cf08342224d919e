//! BroadcastStore - generic record persistence on SQLite
//!
//! Records are stored as JSON documents keyed by `(collection, id)`, with a
//! side table of indexed fields that `list` filters run against.
//!
//! # Example
//!
//! ```ignore
//! use broadcaststore::{Filter, FilterOp, IndexValue, Store};
//!
//! let mut store = Store::open("/var/lib/broadcastd")?;
//! store.create(record)?;
//! let due: Vec<MyRecord> = store.list(&[Filter::new("sent", FilterOp::Eq, IndexValue::Bool(false))])?;
//! ```

mod error;
mod filter;
mod record;
mod store;

pub use error::StoreError;
pub use filter::{Filter, FilterOp};
pub use record::{IndexValue, Record};
pub use store::{DB_FILE, Store};

/// Current time as Unix milliseconds
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
