//! Record trait and indexed values

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;

/// A value stored in the field index
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexValue {
    String(String),
    Int(i64),
    Bool(bool),
    /// Indexed as one entry per element; queried with `FilterOp::Contains`
    List(Vec<String>),
}

impl IndexValue {
    /// SQL kind tag stored alongside the value
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            IndexValue::String(_) => "string",
            IndexValue::Int(_) => "int",
            IndexValue::Bool(_) => "bool",
            IndexValue::List(_) => "list",
        }
    }
}

impl From<&str> for IndexValue {
    fn from(s: &str) -> Self {
        IndexValue::String(s.to_string())
    }
}

impl From<String> for IndexValue {
    fn from(s: String) -> Self {
        IndexValue::String(s)
    }
}

impl From<i64> for IndexValue {
    fn from(v: i64) -> Self {
        IndexValue::Int(v)
    }
}

impl From<bool> for IndexValue {
    fn from(v: bool) -> Self {
        IndexValue::Bool(v)
    }
}

/// A persistable record
///
/// Records are serialized whole; every write replaces the stored document
/// and its index entries together.
pub trait Record: Serialize + DeserializeOwned {
    /// Unique id within the collection
    fn id(&self) -> &str;

    /// Collection (table namespace) this record type lives in
    fn collection_name() -> &'static str;

    /// Fields that `list` and `get_by_field` can filter on
    fn indexed_fields(&self) -> HashMap<String, IndexValue>;
}
