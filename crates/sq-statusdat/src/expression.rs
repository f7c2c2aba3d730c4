//! # Reader Query Expressions
//!
//! The textual predicate language of the status.dat query builder:
//!
//! ```text
//! status.current_state >= ? AND COUNT{downtime} = ?
//! (host_name LIKE :host OR service_description LIKE :host) AND group IN ?
//! ```
//!
//! An expression is `FIELD OPERATOR VALUE`, where VALUE is `?` (next
//! positional parameter), `:name` (named parameter) or a literal.
//! `COUNT{field}` compares the number of values found at `field` instead of
//! the values themselves. Expressions combine with `AND`/`OR` and
//! parentheses; switching conjunction on one level nests the rest of that
//! level under the new conjunction, so `a AND b OR c` reads as
//! `a AND (b OR c)`.
//!
//! Field paths are dotted. Every list met along the path is flattened, and
//! an expression holds when any of the resolved values satisfies it. A path
//! that resolves to nothing never matches (except through `COUNT`).

use std::cmp::Ordering;
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use serde_json::{Map, Value};
use thiserror::Error;

use sq_core::filter::{loose_cmp, loose_eq, wildcard_match};
use sq_core::record::{render, Record};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExpressionError {
    #[error("Unknown operator {operator} in expression '{expression}'")]
    UnknownOperator { operator: String, expression: String },

    #[error("Malformed expression '{0}': expected FIELD OPERATOR VALUE")]
    Malformed(String),

    #[error("No parameter left for '?' in expression '{0}'")]
    MissingValue(String),

    #[error("Unknown named parameter :{0}")]
    UnknownParameter(String),

    #[error("Syntax error in '{input}': {message}")]
    Syntax { input: String, message: String },
}

// =============================================================================
// Parameters
// =============================================================================

/// Values bound to `?` and `:name` placeholders.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    positional: VecDeque<Value>,
    named: Map<String, Value>,
}

impl Params {
    pub fn new<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self {
            positional: values.into_iter().map(Into::into).collect(),
            named: Map::new(),
        }
    }

    pub fn with_named(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.named.insert(name.into(), value.into());
        self
    }

    /// Positional values not consumed by any placeholder.
    pub fn remaining(&self) -> usize {
        self.positional.len()
    }
}

impl From<Vec<Value>> for Params {
    fn from(values: Vec<Value>) -> Self {
        Self::new(values)
    }
}

// =============================================================================
// Expressions
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Gt,
    Lt,
    Gte,
    Lte,
    Eq,
    Neq,
    Like,
    In,
}

impl Op {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Gte => ">=",
            Self::Lte => "<=",
            Self::Eq => "=",
            Self::Neq => "!=",
            Self::Like => "LIKE",
            Self::In => "IN",
        }
    }
}

impl FromStr for Op {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            ">" => Ok(Self::Gt),
            "<" => Ok(Self::Lt),
            ">=" => Ok(Self::Gte),
            "<=" => Ok(Self::Lte),
            "=" => Ok(Self::Eq),
            "!=" => Ok(Self::Neq),
            "LIKE" => Ok(Self::Like),
            "IN" => Ok(Self::In),
            _ => Err(s.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    path: Vec<String>,
    op: Op,
    value: Value,
    count: bool,
}

impl Expression {
    /// Parse a single `FIELD OPERATOR VALUE` expression, taking placeholder
    /// values from `params`.
    pub fn parse(text: &str, params: &mut Params) -> Result<Self, ExpressionError> {
        let text = text.trim();
        let malformed = || ExpressionError::Malformed(text.to_string());

        let (field, rest) = text.split_once(char::is_whitespace).ok_or_else(malformed)?;
        let (operator, operand) = rest
            .trim_start()
            .split_once(char::is_whitespace)
            .ok_or_else(malformed)?;
        let operand = operand.trim();
        if operand.is_empty() {
            return Err(malformed());
        }

        let (field, count) = match strip_count(field) {
            Some(inner) => (inner, true),
            None => (field, false),
        };
        if field.is_empty() {
            return Err(malformed());
        }

        let op = operator
            .parse::<Op>()
            .map_err(|operator| ExpressionError::UnknownOperator {
                operator,
                expression: text.to_string(),
            })?;

        let value = if operand == "?" {
            params
                .positional
                .pop_front()
                .ok_or_else(|| ExpressionError::MissingValue(text.to_string()))?
        } else if let Some(name) = operand.strip_prefix(':') {
            params
                .named
                .get(name)
                .cloned()
                .ok_or_else(|| ExpressionError::UnknownParameter(name.to_string()))?
        } else {
            Value::String(operand.to_string())
        };

        Ok(Self {
            path: field.split('.').map(str::to_string).collect(),
            op,
            value,
            count,
        })
    }

    pub fn field(&self) -> String {
        self.path.join(".")
    }

    pub fn op(&self) -> Op {
        self.op
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn matches(&self, record: &Record) -> bool {
        let values = resolve(record, &self.path);
        if self.count {
            return self.holds_for(&Value::from(values.len()));
        }
        values.into_iter().any(|v| self.holds_for(v))
    }

    fn holds_for(&self, field: &Value) -> bool {
        match self.op {
            Op::Gt => loose_cmp(field, &self.value) == Ordering::Greater,
            Op::Lt => loose_cmp(field, &self.value) == Ordering::Less,
            Op::Gte => loose_cmp(field, &self.value) != Ordering::Less,
            Op::Lte => loose_cmp(field, &self.value) != Ordering::Greater,
            Op::Eq => loose_eq(field, &self.value),
            Op::Neq => !loose_eq(field, &self.value),
            Op::Like => wildcard_match(&render(&self.value), '%', &render(field)),
            Op::In => match &self.value {
                Value::Array(candidates) => candidates.iter().any(|c| loose_eq(field, c)),
                single => loose_eq(field, single),
            },
        }
    }
}

fn strip_count(field: &str) -> Option<&str> {
    let head = field.get(..6)?;
    if !head.eq_ignore_ascii_case("COUNT{") {
        return None;
    }
    field[6..].strip_suffix('}')
}

/// Every value reachable along `path`, with lists flattened at each step.
fn resolve<'a>(record: &'a Record, path: &[String]) -> Vec<&'a Value> {
    let Some((first, rest)) = path.split_first() else {
        return Vec::new();
    };
    let mut current = Vec::new();
    if let Some(value) = record.get(first) {
        flatten_into(value, &mut current);
    }
    for segment in rest {
        let mut next = Vec::new();
        for value in current {
            if let Some(child) = value.as_object().and_then(|o| o.get(segment)) {
                flatten_into(child, &mut next);
            }
        }
        current = next;
    }
    current
}

fn flatten_into<'a>(value: &'a Value, out: &mut Vec<&'a Value>) {
    match value {
        Value::Array(items) => out.extend(items.iter()),
        other => out.push(other),
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let field = self.field();
        if self.count {
            write!(f, "COUNT{{{}}}", field)?;
        } else {
            write!(f, "{}", field)?;
        }
        write!(f, " {} {}", self.op.as_str(), self.value)
    }
}

// =============================================================================
// Groups
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Conjunction {
    #[default]
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Expr(Expression),
    Group(Group),
}

impl Node {
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Self::Expr(e) => e.matches(record),
            Self::Group(g) => g.matches(record),
        }
    }
}

/// Expressions joined by a single conjunction. An empty group matches
/// everything.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Group {
    conjunction: Conjunction,
    items: Vec<Node>,
}

impl Group {
    pub fn conjunction(&self) -> Conjunction {
        self.conjunction
    }

    pub fn items(&self) -> &[Node] {
        &self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn matches(&self, record: &Record) -> bool {
        if self.items.is_empty() {
            return true;
        }
        match self.conjunction {
            Conjunction::And => self.items.iter().all(|n| n.matches(record)),
            Conjunction::Or => self.items.iter().any(|n| n.matches(record)),
        }
    }
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joiner = match self.conjunction {
            Conjunction::And => " AND ",
            Conjunction::Or => " OR ",
        };
        let parts: Vec<String> = self
            .items
            .iter()
            .map(|n| match n {
                Node::Expr(e) => e.to_string(),
                Node::Group(g) => format!("({})", g),
            })
            .collect();
        write!(f, "{}", parts.join(joiner))
    }
}

// =============================================================================
// Parser
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Open,
    Close,
    Conj(Conjunction),
    Text(String),
}

fn tokenize(input: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut words: Vec<&str> = Vec::new();
    let mut rest = input;

    while !rest.is_empty() {
        let end = rest.find(|c| c == '(' || c == ')').unwrap_or(rest.len());
        for word in rest[..end].split_whitespace() {
            if word.eq_ignore_ascii_case("AND") {
                flush(&mut words, &mut tokens);
                tokens.push(Token::Conj(Conjunction::And));
            } else if word.eq_ignore_ascii_case("OR") {
                flush(&mut words, &mut tokens);
                tokens.push(Token::Conj(Conjunction::Or));
            } else {
                words.push(word);
            }
        }
        match rest[end..].chars().next() {
            Some(paren) => {
                flush(&mut words, &mut tokens);
                tokens.push(if paren == '(' { Token::Open } else { Token::Close });
                rest = &rest[end + 1..];
            }
            None => rest = "",
        }
    }
    flush(&mut words, &mut tokens);
    tokens
}

/// Pending words form one expression.
fn flush(words: &mut Vec<&str>, tokens: &mut Vec<Token>) {
    if !words.is_empty() {
        tokens.push(Token::Text(words.join(" ")));
        words.clear();
    }
}

struct Parser<'a, 'p> {
    input: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    params: &'p mut Params,
}

/// Parse a full query expression.
pub fn parse(input: &str, params: &mut Params) -> Result<Group, ExpressionError> {
    let tokens = tokenize(input);
    if tokens.is_empty() {
        return Ok(Group::default());
    }
    let mut parser = Parser {
        input,
        tokens,
        pos: 0,
        params,
    };
    let group = parser.parse_group()?;
    if parser.pos < parser.tokens.len() {
        return Err(parser.error("unbalanced ')'"));
    }
    Ok(group)
}

impl Parser<'_, '_> {
    fn error(&self, message: &str) -> ExpressionError {
        ExpressionError::Syntax {
            input: self.input.to_string(),
            message: message.to_string(),
        }
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn peek_conjunction(&self) -> Option<Conjunction> {
        match self.tokens.get(self.pos) {
            Some(Token::Conj(c)) => Some(*c),
            _ => None,
        }
    }

    fn parse_group(&mut self) -> Result<Group, ExpressionError> {
        let first = self.parse_item()?;
        self.parse_chain(first)
    }

    fn parse_chain(&mut self, first: Node) -> Result<Group, ExpressionError> {
        let mut items = Vec::new();
        let mut last = first;
        let mut conjunction = None;

        while let Some(next) = self.peek_conjunction() {
            match conjunction {
                Some(current) if current != next => {
                    last = Node::Group(self.parse_chain(last)?);
                    break;
                }
                _ => {
                    conjunction = Some(next);
                    self.pos += 1;
                    items.push(last);
                    last = self.parse_item()?;
                }
            }
        }
        items.push(last);

        Ok(Group {
            conjunction: conjunction.unwrap_or_default(),
            items,
        })
    }

    fn parse_item(&mut self) -> Result<Node, ExpressionError> {
        match self.next() {
            Some(Token::Open) => {
                let group = self.parse_group()?;
                match self.next() {
                    Some(Token::Close) => Ok(Node::Group(group)),
                    _ => Err(self.error("unbalanced '('")),
                }
            }
            Some(Token::Text(text)) => Expression::parse(&text, self.params).map(Node::Expr),
            Some(Token::Close) => Err(self.error("unexpected ')'")),
            Some(Token::Conj(_)) => Err(self.error("unexpected AND/OR")),
            None => Err(self.error("unexpected end of expression")),
        }
    }
}
