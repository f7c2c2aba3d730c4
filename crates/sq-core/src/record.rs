//! # Record — Field Access on Monitoring Rows
//!
//! A [`Record`] is an ordered string-keyed map of JSON values. The engine only
//! ever reads records: every access goes through [`lookup`], which returns
//! `None` for an absent field instead of failing.

use serde_json::{Map, Value};

/// One row of monitoring data (a host, a service, a group, ...).
///
/// Insertion order is preserved, so "the first field" of a projected record
/// is the first requested column.
pub type Record = Map<String, Value>;

/// Resolve `field` on `record`.
///
/// A literal key always wins. Otherwise a dotted path (`status.current_state`)
/// descends through nested objects.
pub fn lookup<'a>(record: &'a Record, field: &str) -> Option<&'a Value> {
    if let Some(value) = record.get(field) {
        return Some(value);
    }
    if !field.contains('.') {
        return None;
    }

    let mut parts = field.split('.');
    let mut current = record.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Render a value as text the way loosely typed monitoring backends do.
///
/// `true` becomes `"1"`, `false` and `null` become `""`, containers are
/// rendered as compact JSON.
pub fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(true) => "1".to_string(),
        Value::Bool(false) | Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Numeric view of a value, if it has one.
///
/// Numeric-looking strings (`" 42 "`, `"1.5"`) count as numbers.
pub fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// Build a record from `(field, value)` pairs, keeping their order.
pub fn record<I, K, V>(fields: I) -> Record
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    fields
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}
