//! Query filters over indexed fields

use rusqlite::types::Value;

use crate::error::StoreError;
use crate::record::IndexValue;

/// Comparison operator for a filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    /// List field contains the given string
    Contains,
}

impl FilterOp {
    fn sql(self) -> &'static str {
        match self {
            FilterOp::Eq | FilterOp::Contains => "=",
            FilterOp::Ne => "!=",
            FilterOp::Gt => ">",
            FilterOp::Gte => ">=",
            FilterOp::Lt => "<",
            FilterOp::Lte => "<=",
        }
    }
}

/// A single filter; multiple filters passed to `list` are AND-ed
#[derive(Debug, Clone)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: IndexValue,
}

impl Filter {
    /// Create a new filter
    pub fn new(field: impl Into<String>, op: FilterOp, value: impl Into<IndexValue>) -> Self {
        Self {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    /// Equality filter shorthand
    pub fn eq(field: impl Into<String>, value: impl Into<IndexValue>) -> Self {
        Self::new(field, FilterOp::Eq, value)
    }

    /// Build the `EXISTS (...)` clause for this filter and its bound parameters
    pub(crate) fn to_sql(&self) -> Result<(String, Vec<Value>), StoreError> {
        let invalid = |reason: &str| StoreError::InvalidFilter {
            field: self.field.clone(),
            reason: reason.to_string(),
        };

        let (column, kind, bound) = match (&self.value, self.op) {
            (IndexValue::String(s), FilterOp::Contains) => ("value_text", "list", Value::Text(s.clone())),
            (_, FilterOp::Contains) => return Err(invalid("contains requires a string value")),
            (IndexValue::String(s), _) => ("value_text", "string", Value::Text(s.clone())),
            (IndexValue::Int(v), _) => ("value_int", "int", Value::Integer(*v)),
            (IndexValue::Bool(b), FilterOp::Eq | FilterOp::Ne) => ("value_int", "bool", Value::Integer(*b as i64)),
            (IndexValue::Bool(_), _) => return Err(invalid("booleans support only eq/ne")),
            (IndexValue::List(_), _) => return Err(invalid("list values cannot be compared; use contains")),
        };

        let clause = format!(
            "EXISTS (SELECT 1 FROM record_indexes i \
             WHERE i.collection = r.collection AND i.record_id = r.id \
             AND i.field = ? AND i.kind = ? AND i.{} {} ?)",
            column,
            self.op.sql()
        );

        Ok((
            clause,
            vec![Value::Text(self.field.clone()), Value::Text(kind.to_string()), bound],
        ))
    }
}
