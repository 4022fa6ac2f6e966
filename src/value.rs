//! Dynamic bind-parameter values.
//!
//! The compiler doesn't know the Postgres wire types of a request's
//! fields; it only needs to hand the execution collaborator an ordered
//! slice of scalars. `SqlValue` is that common currency.

use compact_str::CompactString;

/// A single bind parameter, in emission order.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(CompactString),
    /// A homogeneous array literal, used by `ANY`/`NOT ANY` (Open
    /// Question 3: heterogeneous arrays are rejected by the caller
    /// before they ever reach this type).
    Array(Vec<SqlValue>),
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Int(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::Int(v as i64)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Float(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(CompactString::from(v))
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(CompactString::from(v))
    }
}

impl From<CompactString> for SqlValue {
    fn from(v: CompactString) -> Self {
        SqlValue::Text(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => SqlValue::Null,
        }
    }
}

impl SqlValue {
    /// True for every variant except `Array` of non-`Text` elements.
    /// Guards the Open Question 3 behavior for `ANY`/`NOT ANY`: only
    /// string arrays are accepted, everything else is rejected rather
    /// than silently mis-encoded.
    pub fn is_homogeneous_text_array(&self) -> bool {
        match self {
            SqlValue::Array(items) => items.iter().all(|i| matches!(i, SqlValue::Text(_))),
            _ => false,
        }
    }
}
