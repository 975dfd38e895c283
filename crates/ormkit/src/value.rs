//! Driver-agnostic bind values.
//!
//! Every parameter that crosses the dialect boundary is a [`Value`]. The
//! core never inspects driver-native types; drivers convert `Value`s to
//! their wire representation and hand rows of `Value`s back for scanning.

use crate::error::{OrmError, OrmResult};
use chrono::{DateTime, Utc};

/// A positional bind parameter or a scanned column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Timestamp(DateTime<Utc>),
}

impl Value {
    /// Whether this value is SQL NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Whether this value is the zero value of its type.
    ///
    /// Primary-key fields holding a zero value are treated as unset when
    /// deciding whether to add `WHERE pk = ?` conditions or to include the
    /// column in an INSERT.
    pub fn is_zero(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Bool(b) => !b,
            Value::Int(i) => *i == 0,
            Value::Float(f) => *f == 0.0,
            Value::Text(s) => s.is_empty(),
            Value::Bytes(b) => b.is_empty(),
            Value::Timestamp(_) => false,
        }
    }

    /// Render the value as a SQL literal, for `explain` output only.
    ///
    /// This is a debugging aid; real execution always binds positionally.
    pub fn to_literal(&self) -> String {
        match self {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Text(s) => format!("'{}'", s.replace('\'', "''")),
            Value::Bytes(b) => format!("<{} bytes>", b.len()),
            Value::Timestamp(ts) => format!("'{}'", ts.to_rfc3339()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v as f64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v)
    }
}

impl<T> From<Option<T>> for Value
where
    T: Into<Value>,
{
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

/// Checked conversion out of a scanned [`Value`].
///
/// Conversions never widen or narrow silently: an `Int` only scans into an
/// integer type it fits, `Text` never coerces to a number, and so on.
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> OrmResult<Self>;
}

fn mismatch(expected: &str, got: &Value) -> OrmError {
    OrmError::invalid_value(format!("cannot scan {got:?} into {expected}"))
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> OrmResult<Self> {
        match value {
            Value::Int(i) => Ok(*i),
            other => Err(mismatch("i64", other)),
        }
    }
}

impl FromValue for i32 {
    fn from_value(value: &Value) -> OrmResult<Self> {
        match value {
            Value::Int(i) => i32::try_from(*i).map_err(|_| mismatch("i32", value)),
            other => Err(mismatch("i32", other)),
        }
    }
}

impl FromValue for u64 {
    fn from_value(value: &Value) -> OrmResult<Self> {
        match value {
            Value::Int(i) => u64::try_from(*i).map_err(|_| mismatch("u64", value)),
            other => Err(mismatch("u64", other)),
        }
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> OrmResult<Self> {
        match value {
            Value::Float(f) => Ok(*f),
            other => Err(mismatch("f64", other)),
        }
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> OrmResult<Self> {
        match value {
            Value::Bool(b) => Ok(*b),
            other => Err(mismatch("bool", other)),
        }
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> OrmResult<Self> {
        match value {
            Value::Text(s) => Ok(s.clone()),
            other => Err(mismatch("String", other)),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: &Value) -> OrmResult<Self> {
        match value {
            Value::Bytes(b) => Ok(b.clone()),
            other => Err(mismatch("Vec<u8>", other)),
        }
    }
}

impl FromValue for DateTime<Utc> {
    fn from_value(value: &Value) -> OrmResult<Self> {
        match value {
            Value::Timestamp(ts) => Ok(*ts),
            other => Err(mismatch("DateTime<Utc>", other)),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> OrmResult<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

/// Build a `Vec<Value>` from heterogeneous bind arguments.
///
/// # Example
/// ```ignore
/// let q = db.model::<User>().where_("age > ? AND name = ?", vars![10, "x"]);
/// ```
#[macro_export]
macro_rules! vars {
    () => { ::std::vec::Vec::<$crate::Value>::new() };
    ($($v:expr),+ $(,)?) => { vec![$($crate::Value::from($v)),+] };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_values() {
        assert!(Value::Int(0).is_zero());
        assert!(Value::Text(String::new()).is_zero());
        assert!(!Value::Int(3).is_zero());
        assert!(Value::Null.is_zero());
    }

    #[test]
    fn no_widening_on_scan() {
        let big = Value::Int(i64::MAX);
        assert!(i32::from_value(&big).is_err());
        assert_eq!(i64::from_value(&big).unwrap(), i64::MAX);
    }

    #[test]
    fn text_never_coerces() {
        assert!(i64::from_value(&Value::Text("7".into())).is_err());
    }

    #[test]
    fn option_scans_null() {
        assert_eq!(Option::<i64>::from_value(&Value::Null).unwrap(), None);
        assert_eq!(
            Option::<i64>::from_value(&Value::Int(9)).unwrap(),
            Some(9)
        );
    }

    #[test]
    fn vars_macro() {
        let vs = vars![1, "x", true];
        assert_eq!(
            vs,
            vec![Value::Int(1), Value::Text("x".into()), Value::Bool(true)]
        );
    }

    #[test]
    fn literal_escapes_quotes() {
        assert_eq!(Value::Text("o'brien".into()).to_literal(), "'o''brien'");
    }
}
