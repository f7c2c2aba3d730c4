//! # ReaderQuery — the status.dat Query Builder
//!
//! `query().from(target, columns).where_expr(...).order(...).limit(...)`
//! over one [`Snapshot`]. Filtering and sorting run on the full objects;
//! columns only shape the returned rows, so a query can filter and sort on
//! fields it does not return.
//!
//! A column source is resolved in this order:
//!
//! 1. the object's own (dotted) field,
//! 2. a computed column registered with [`ReaderQuery::computed_column`],
//! 3. a column function such as `TO_DATE(status.last_check)`,
//!
//! and is `null` otherwise.

use std::borrow::Cow;
use std::collections::HashMap;
use std::rc::Rc;

use chrono::DateTime;
use serde_json::Value;
use tracing::debug;

use sq_core::pipeline::{compare_by, project};
use sq_core::record::{lookup, render, Record};
use sq_core::{Collation, Column, Query, SortDirection};

use crate::error::{StatusdatError, StatusdatResult};
use crate::expression::{self, Group, Params};
use crate::parser::Snapshot;

use super::{target_kinds, DEFAULT_TARGET};

/// Value computed from a raw object.
type ValueFn<'r> = Rc<dyn Fn(&Record) -> Value + 'r>;

/// Turns the sorted matches into result rows.
type GroupFn<'r> = Box<dyn Fn(&[&'r Record]) -> Vec<Record> + 'r>;

enum SortKey<'r> {
    Field(String),
    Computed(ValueFn<'r>),
}

enum Grouping<'r> {
    None,
    Columns(Vec<String>),
    Function(GroupFn<'r>),
}

pub struct ReaderQuery<'r> {
    snapshot: &'r Snapshot,
    kinds: &'static [&'static str],
    /// Target, columns, collation and page window.
    query: Query,
    filters: Vec<Group>,
    order: Vec<(SortKey<'r>, SortDirection)>,
    computed: Vec<(String, ValueFn<'r>)>,
    grouping: Grouping<'r>,
}

impl<'r> ReaderQuery<'r> {
    pub(crate) fn new(snapshot: &'r Snapshot) -> Self {
        let mut query = Query::new();
        query.from(DEFAULT_TARGET).collation(Collation::Natural);
        Self {
            snapshot,
            kinds: target_kinds(DEFAULT_TARGET).unwrap_or(&[]),
            query,
            filters: Vec::new(),
            order: Vec::new(),
            computed: Vec::new(),
            grouping: Grouping::None,
        }
    }

    /// Read `target` (`hosts`, `services`, ...) returning `columns`; no
    /// columns means whole objects.
    pub fn from<I, C>(&mut self, target: &str, columns: I) -> StatusdatResult<&mut Self>
    where
        I: IntoIterator<Item = C>,
        C: Into<Column>,
    {
        self.kinds =
            target_kinds(target).ok_or_else(|| StatusdatError::UnknownTarget(target.to_string()))?;
        self.query.from(target).columns(columns);
        Ok(self)
    }

    /// AND an expression onto the query, binding its placeholders to
    /// `params`.
    pub fn where_expr(
        &mut self,
        expression: &str,
        params: impl Into<Params>,
    ) -> StatusdatResult<&mut Self> {
        let mut params = params.into();
        let group = expression::parse(expression, &mut params)?;
        if params.remaining() > 0 {
            debug!(expression, unused = params.remaining(), "unused query parameters");
        }
        if !group.is_empty() {
            self.filters.push(group);
        }
        Ok(self)
    }

    /// Register a column named `alias` whose value `compute` derives from
    /// the raw object. Objects carrying a field of that name keep it.
    pub fn computed_column<F>(&mut self, alias: impl Into<String>, compute: F) -> &mut Self
    where
        F: Fn(&Record) -> Value + 'r,
    {
        let alias = alias.into();
        self.computed.retain(|(name, _)| *name != alias);
        self.computed.push((alias, Rc::new(compute)));
        self
    }

    pub fn has_computed(&self, alias: &str) -> bool {
        self.computed_fn(alias).is_some()
    }

    /// Append a sort key: a field path or a computed column. Text compares
    /// naturally and case-insensitively.
    pub fn order(&mut self, column: impl Into<String>, direction: SortDirection) -> &mut Self {
        self.order.push((SortKey::Field(column.into()), direction));
        self
    }

    /// Append a sort key computed from each raw object.
    pub fn order_by_fn<F>(&mut self, key: F, direction: SortDirection) -> &mut Self
    where
        F: Fn(&Record) -> Value + 'r,
    {
        self.order.push((SortKey::Computed(Rc::new(key)), direction));
        self
    }

    pub fn limit(&mut self, count: Option<usize>, offset: usize) -> &mut Self {
        self.query.limit(count, offset);
        self
    }

    /// Collapse the result into one `{columns, count}` row per distinct
    /// combination of `columns`. Grouped results are not paginated.
    pub fn group_by_columns<I, S>(&mut self, columns: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.grouping = Grouping::Columns(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Hand the sorted matches to `group`, whose rows become the result.
    /// Requested columns still restrict those rows; they are not paginated.
    pub fn group_by_fn<F>(&mut self, group: F) -> &mut Self
    where
        F: Fn(&[&'r Record]) -> Vec<Record> + 'r,
    {
        self.grouping = Grouping::Function(Box::new(group));
        self
    }

    pub fn target(&self) -> &str {
        self.query.target().unwrap_or(DEFAULT_TARGET)
    }

    pub fn filters(&self) -> &[Group] {
        &self.filters
    }

    pub fn has_limit(&self) -> bool {
        self.query.has_limit()
    }

    fn computed_fn(&self, alias: &str) -> Option<ValueFn<'r>> {
        self.computed
            .iter()
            .find(|(name, _)| name == alias)
            .map(|(_, compute)| Rc::clone(compute))
    }

    /// Matching objects of the target kinds, sorted.
    fn matching(&self) -> Vec<&'r Record> {
        let snapshot = self.snapshot;
        let rows: Vec<&'r Record> = self
            .kinds
            .iter()
            .flat_map(|kind| snapshot.table(kind))
            .filter(|record| self.filters.iter().all(|g| g.matches(record)))
            .collect();
        if self.order.is_empty() {
            return rows;
        }

        // Sort keys are evaluated once per object, under positional names.
        let names: Vec<String> = (0..self.order.len()).map(|i| i.to_string()).collect();
        let keys: Vec<(&str, SortDirection)> = names
            .iter()
            .zip(&self.order)
            .map(|(name, (_, dir))| (name.as_str(), *dir))
            .collect();
        let mut decorated: Vec<(Record, &'r Record)> = rows
            .into_iter()
            .map(|record| (self.sort_values(&names, record), record))
            .collect();
        let collation = self.query.get_collation();
        decorated.sort_by(|(a, _), (b, _)| compare_by(a, b, &keys, collation));
        decorated.into_iter().map(|(_, record)| record).collect()
    }

    fn sort_values(&self, names: &[String], record: &Record) -> Record {
        let mut values = Record::new();
        for (name, (key, _)) in names.iter().zip(&self.order) {
            let value = match key {
                SortKey::Field(field) => lookup(record, field)
                    .cloned()
                    .or_else(|| self.computed_fn(field).map(|compute| compute(record))),
                SortKey::Computed(compute) => Some(compute(record)),
            };
            if let Some(value) = value {
                values.insert(name.clone(), value);
            }
        }
        values
    }

    /// The current page, shaped by the requested columns.
    pub fn get_result(&self) -> Vec<Record> {
        let rows = self.matching();
        match &self.grouping {
            Grouping::Columns(columns) => grouped(columns, &rows),
            Grouping::Function(group) => {
                let columns = self.query.get_columns();
                group(&rows)
                    .into_iter()
                    .map(|row| project(Cow::Owned(row), columns))
                    .collect()
            }
            Grouping::None => rows[self.query.window(rows.len())]
                .iter()
                .map(|record| self.project(record))
                .collect(),
        }
    }

    /// Matches (or groups) ignoring `limit`.
    pub fn count(&self) -> usize {
        let rows = self.matching();
        match &self.grouping {
            Grouping::Columns(columns) => grouped(columns, &rows).len(),
            Grouping::Function(group) => group(&rows).len(),
            Grouping::None => rows.len(),
        }
    }

    fn project(&self, record: &Record) -> Record {
        let columns = self.query.get_columns();
        if columns.is_empty() {
            return record.clone();
        }
        columns
            .iter()
            .map(|c| (c.alias.clone(), self.resolve(record, &c.source)))
            .collect()
    }

    fn resolve(&self, record: &Record, source: &str) -> Value {
        if let Some(value) = lookup(record, source) {
            return value.clone();
        }
        if let Some(compute) = self.computed_fn(source) {
            return compute(record);
        }
        match column_function(source) {
            Some((function, field)) => {
                let value = lookup(record, field).cloned().unwrap_or(Value::Null);
                apply_column_function(function, value)
            }
            None => Value::Null,
        }
    }
}

fn grouped(group_by: &[String], rows: &[&Record]) -> Vec<Record> {
    let mut groups: Vec<(Record, u64)> = Vec::new();
    let mut index: HashMap<Vec<String>, usize> = HashMap::new();

    for row in rows {
        let columns: Record = group_by
            .iter()
            .map(|c| (c.clone(), lookup(row, c).cloned().unwrap_or(Value::Null)))
            .collect();
        let key: Vec<String> = columns.values().map(render).collect();
        match index.get(&key) {
            Some(&i) => groups[i].1 += 1,
            None => {
                index.insert(key, groups.len());
                groups.push((columns, 1));
            }
        }
    }

    groups
        .into_iter()
        .map(|(columns, count)| {
            let mut row = Record::new();
            row.insert("columns".to_string(), Value::Object(columns));
            row.insert("count".to_string(), Value::from(count));
            row
        })
        .collect()
}

// =============================================================================
// Column functions
// =============================================================================

/// `NAME(field)` split into its function name and argument.
fn column_function(source: &str) -> Option<(&str, &str)> {
    let (name, rest) = source.split_once('(')?;
    let field = rest.strip_suffix(')')?;
    let valid = !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    valid.then(|| (name, field.trim()))
}

/// Unknown functions pass the value through.
fn apply_column_function(function: &str, value: Value) -> Value {
    match function.to_ascii_uppercase().as_str() {
        "TO_DATE" => to_date(value),
        _ => value,
    }
}

/// Unix timestamp to `YYYY-MM-DD HH:MM:SS` (UTC); anything else unchanged.
fn to_date(value: Value) -> Value {
    let seconds = match &value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    seconds
        .and_then(|s| DateTime::from_timestamp(s as i64, 0))
        .map(|at| Value::String(at.format("%Y-%m-%d %H:%M:%S").to_string()))
        .unwrap_or(value)
}
