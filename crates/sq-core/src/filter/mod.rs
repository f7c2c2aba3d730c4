//! # Filters — Predicates over Records
//!
//! A [`Filter`] is either a single column/sign/value expression or a boolean
//! chain of filters. Evaluation never fails: an expression on a column the
//! record does not have simply does not match, whatever its sign.

pub mod parser;

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::record::{as_number, lookup, render, Record};

pub use parser::{parse, FilterParseError};

/// Comparison sign of a filter expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sign {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    /// SQL-style match with `%` as wildcard.
    Like,
}

impl Sign {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Neq => "!=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Like => " LIKE ",
        }
    }
}

impl FromStr for Sign {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "=" => Ok(Self::Eq),
            "!=" => Ok(Self::Neq),
            "<" => Ok(Self::Lt),
            "<=" => Ok(Self::Lte),
            ">" => Ok(Self::Gt),
            ">=" => Ok(Self::Gte),
            "LIKE" => Ok(Self::Like),
            other => Err(format!("unknown filter sign '{}'", other)),
        }
    }
}

/// Right-hand side of an expression. A list means "any of" for `=`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Single(Value),
    List(Vec<Value>),
}

impl FilterValue {
    fn operands(&self) -> &[Value] {
        match self {
            Self::Single(v) => std::slice::from_ref(v),
            Self::List(vs) => vs,
        }
    }
}

impl From<Value> for FilterValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Array(items) => Self::List(items),
            other => Self::Single(other),
        }
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        Self::Single(Value::String(value.to_string()))
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        Self::Single(Value::String(value))
    }
}

impl From<i32> for FilterValue {
    fn from(value: i32) -> Self {
        Self::Single(Value::from(value))
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        Self::Single(Value::from(value))
    }
}

impl From<u64> for FilterValue {
    fn from(value: u64) -> Self {
        Self::Single(Value::from(value))
    }
}

impl From<bool> for FilterValue {
    fn from(value: bool) -> Self {
        Self::Single(Value::Bool(value))
    }
}

impl<T: Into<Value>> From<Vec<T>> for FilterValue {
    fn from(values: Vec<T>) -> Self {
        Self::List(values.into_iter().map(Into::into).collect())
    }
}

/// A predicate over a [`Record`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Filter {
    Expression {
        column: String,
        sign: Sign,
        value: FilterValue,
    },
    /// Matches when every child matches. Empty matches everything.
    All(Vec<Filter>),
    /// Matches when any child matches. Empty matches nothing.
    Any(Vec<Filter>),
    /// Matches when no child matches.
    Not(Vec<Filter>),
}

impl Default for Filter {
    fn default() -> Self {
        Self::match_all()
    }
}

impl Filter {
    pub fn expression(column: impl Into<String>, sign: Sign, value: impl Into<FilterValue>) -> Self {
        Self::Expression {
            column: column.into(),
            sign,
            value: value.into(),
        }
    }

    pub fn eq(column: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::expression(column, Sign::Eq, value)
    }

    pub fn match_all() -> Self {
        Self::All(Vec::new())
    }

    pub fn match_any() -> Self {
        Self::Any(Vec::new())
    }

    pub fn not(filter: Filter) -> Self {
        Self::Not(vec![filter])
    }

    /// `true` for a chain without children.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Expression { .. } => false,
            Self::All(fs) | Self::Any(fs) | Self::Not(fs) => fs.is_empty(),
        }
    }

    /// AND `filter` onto this one, flattening into an existing AND chain.
    pub fn and(self, filter: Filter) -> Self {
        match self {
            Self::All(mut fs) => {
                fs.push(filter);
                Self::All(fs)
            }
            other => Self::All(vec![other, filter]),
        }
    }

    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Self::Expression {
                column,
                sign,
                value,
            } => match lookup(record, column) {
                Some(field) => expression_matches(field, *sign, value),
                None => false,
            },
            Self::All(fs) => fs.iter().all(|f| f.matches(record)),
            Self::Any(fs) => fs.iter().any(|f| f.matches(record)),
            Self::Not(fs) => !fs.iter().any(|f| f.matches(record)),
        }
    }
}

// =============================================================================
// Evaluation
// =============================================================================

fn expression_matches(field: &Value, sign: Sign, value: &FilterValue) -> bool {
    // A list-valued field (group memberships, comments) matches when any
    // of its elements does.
    let candidates: Vec<&Value> = match field {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };
    let operands = value.operands();

    match sign {
        Sign::Neq => !candidates
            .iter()
            .any(|c| operands.iter().any(|o| loose_eq(c, o))),
        Sign::Eq => candidates
            .iter()
            .any(|c| operands.iter().any(|o| loose_eq(c, o))),
        Sign::Like => candidates.iter().any(|c| {
            operands
                .iter()
                .any(|o| wildcard_match(&render(o), '%', &render(c)))
        }),
        Sign::Lt | Sign::Lte | Sign::Gt | Sign::Gte => candidates.iter().any(|c| {
            operands.iter().any(|o| {
                let ord = loose_cmp(c, o);
                match sign {
                    Sign::Lt => ord == Ordering::Less,
                    Sign::Lte => ord != Ordering::Greater,
                    Sign::Gt => ord == Ordering::Greater,
                    _ => ord != Ordering::Less,
                }
            })
        }),
    }
}

/// Equality the way monitoring filters expect it: numbers by value, text
/// case-insensitively, `*` as wildcard, booleans by truthiness.
pub fn loose_eq(field: &Value, operand: &Value) -> bool {
    match operand {
        Value::Bool(b) => is_truthy(field) == *b,
        Value::String(pattern) if pattern.contains('*') => {
            wildcard_match(pattern, '*', &render(field))
        }
        _ => match (as_number(field), as_number(operand)) {
            (Some(a), Some(b)) => a == b,
            _ => render(field).to_lowercase() == render(operand).to_lowercase(),
        },
    }
}

/// Ordering for `<`, `>` and friends: numeric when both sides are.
pub fn loose_cmp(field: &Value, operand: &Value) -> Ordering {
    match (as_number(field), as_number(operand)) {
        (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
        _ => render(field)
            .to_lowercase()
            .cmp(&render(operand).to_lowercase()),
    }
}

pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        other => {
            let text = render(other);
            !(text.is_empty() || text == "0")
        }
    }
}

/// Case-insensitive full match of `text` against `pattern`, where
/// `wildcard` stands for any run of characters.
pub fn wildcard_match(pattern: &str, wildcard: char, text: &str) -> bool {
    let body = pattern
        .split(wildcard)
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    RegexBuilder::new(&format!("^{}$", body))
        .case_insensitive(true)
        .dot_matches_new_line(true)
        .build()
        .map(|re| re.is_match(text))
        .unwrap_or(false)
}

// =============================================================================
// Display (query-string form, used in logs)
// =============================================================================

impl fmt::Display for FilterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(v) => write!(f, "{}", render(v)),
            Self::List(vs) => {
                let items: Vec<String> = vs.iter().map(render).collect();
                write!(f, "({})", items.join("|"))
            }
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let chain = |f: &mut fmt::Formatter<'_>, fs: &[Filter], op: &str| {
            let parts: Vec<String> = fs.iter().map(ToString::to_string).collect();
            write!(f, "({})", parts.join(op))
        };
        match self {
            Self::Expression {
                column,
                sign,
                value,
            } => write!(f, "{}{}{}", column, sign.as_str(), value),
            Self::All(fs) => chain(f, fs, "&"),
            Self::Any(fs) => chain(f, fs, "|"),
            Self::Not(fs) => {
                write!(f, "!")?;
                chain(f, fs, "&")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn host() -> Record {
        json!({
            "host_name": "Web01",
            "state": 2,
            "handled": "0",
            "group": ["linux", "web"],
            "status": { "current_state": "1" }
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    #[test]
    fn test_missing_column_never_matches() {
        let r = host();
        for sign in [Sign::Eq, Sign::Neq, Sign::Lt, Sign::Gte, Sign::Like] {
            assert!(!Filter::expression("address", sign, "x").matches(&r));
        }
    }

    #[test]
    fn test_eq_is_case_insensitive() {
        assert!(Filter::eq("host_name", "web01").matches(&host()));
    }

    #[test]
    fn test_eq_numeric_across_types() {
        let r = host();
        assert!(Filter::eq("state", "2").matches(&r));
        assert!(Filter::eq("handled", 0).matches(&r));
    }

    #[test]
    fn test_list_value_means_in() {
        let r = host();
        assert!(Filter::eq("state", vec![1, 2]).matches(&r));
        assert!(!Filter::eq("state", vec![0, 1]).matches(&r));
        assert!(Filter::expression("state", Sign::Neq, vec![0, 1]).matches(&r));
    }

    #[test]
    fn test_star_wildcard() {
        let r = host();
        assert!(Filter::eq("host_name", "web*").matches(&r));
        assert!(Filter::eq("host_name", "*01").matches(&r));
        assert!(!Filter::eq("host_name", "db*").matches(&r));
    }

    #[test]
    fn test_like_uses_percent() {
        let r = host();
        assert!(Filter::expression("host_name", Sign::Like, "%eb%").matches(&r));
        assert!(!Filter::expression("host_name", Sign::Like, "eb%").matches(&r));
    }

    #[test]
    fn test_ordering_signs() {
        let r = host();
        assert!(Filter::expression("state", Sign::Gte, 2).matches(&r));
        assert!(Filter::expression("state", Sign::Gt, "1").matches(&r));
        assert!(!Filter::expression("state", Sign::Lt, 2).matches(&r));
        assert!(Filter::expression("status.current_state", Sign::Lte, 1).matches(&r));
    }

    #[test]
    fn test_list_field_matches_any_element() {
        let r = host();
        assert!(Filter::eq("group", "web").matches(&r));
        assert!(!Filter::eq("group", "db").matches(&r));
        assert!(Filter::expression("group", Sign::Neq, "db").matches(&r));
        assert!(!Filter::expression("group", Sign::Neq, "web").matches(&r));
    }

    #[test]
    fn test_boolean_operand_checks_truthiness() {
        let r = host();
        assert!(Filter::eq("state", true).matches(&r));
        assert!(Filter::eq("handled", false).matches(&r));
    }

    #[test]
    fn test_chains() {
        let r = host();
        let hit = Filter::eq("state", 2);
        let miss = Filter::eq("state", 0);
        assert!(Filter::All(vec![hit.clone(), hit.clone()]).matches(&r));
        assert!(!Filter::All(vec![hit.clone(), miss.clone()]).matches(&r));
        assert!(Filter::Any(vec![miss.clone(), hit.clone()]).matches(&r));
        assert!(Filter::not(miss.clone()).matches(&r));
        assert!(!Filter::not(hit).matches(&r));
        assert!(Filter::match_all().matches(&r));
        assert!(!Filter::match_any().matches(&r));
    }

    #[test]
    fn test_and_flattens() {
        let f = Filter::match_all()
            .and(Filter::eq("a", 1))
            .and(Filter::eq("b", 2));
        match f {
            Filter::All(fs) => assert_eq!(fs.len(), 2),
            other => panic!("expected AND chain, got {:?}", other),
        }
    }

    #[test]
    fn test_display_round_trips_shape() {
        let f = Filter::All(vec![
            Filter::eq("host", "web*"),
            Filter::Any(vec![
                Filter::expression("state", Sign::Gt, 1),
                Filter::eq("handled", vec!["0", "1"]),
            ]),
        ]);
        assert_eq!(f.to_string(), "(host=web*&(state>1|handled=(0|1)))");
    }
}
