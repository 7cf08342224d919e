//! Record ID generation
//!
//! IDs use the format `{prefix}-{uuid-v7}`, e.g. `bc-01930c2e...`, so that
//! store ordering by id follows creation order.

/// Generate a record ID with the given type prefix
pub fn generate_id(prefix: &str) -> String {
    format!("{}-{}", prefix, uuid::Uuid::now_v7().simple())
}
