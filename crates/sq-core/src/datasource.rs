//! # Datasource — Executing Queries
//!
//! A [`Datasource`] owns records and turns a [`Query`] into a materialized,
//! cached result. Implementors only provide [`Datasource::materialize`]; all
//! fetch shapes are built on top of it and slice the cached rows.
//!
//! Shape mismatches (absent fields, empty collections, offsets past the end)
//! never produce errors. Only backend failures do, and those propagate as
//! they are.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::cache::Rows;
use crate::error::QueryError;
use crate::query::Query;
use crate::record::{render, Record};

/// One page of a result plus what a paginator needs to render controls.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page {
    pub rows: Vec<Record>,
    /// Matches before pagination.
    pub total: usize,
    /// Whether rows exist past this page.
    pub has_more: bool,
}

pub trait Datasource {
    /// Filtered, projected and sorted rows for `query`, before pagination.
    ///
    /// Computed once per query state and served from cache afterwards.
    fn materialize(&self, query: &Query) -> Result<Rows, QueryError>;

    /// A fresh query against this datasource.
    fn select(&self) -> Query {
        Query::new()
    }

    /// All rows of the current page.
    fn fetch_all(&self, query: &Query) -> Result<Vec<Record>, QueryError> {
        let rows = self.materialize(query)?;
        Ok(rows[query.window(rows.len())].to_vec())
    }

    /// The first row of the current page, `None` when it is empty.
    fn fetch_row(&self, query: &Query) -> Result<Option<Record>, QueryError> {
        let rows = self.materialize(query)?;
        let window = query.window(rows.len());
        Ok(rows[window].first().cloned())
    }

    /// The first field of the first row.
    fn fetch_one(&self, query: &Query) -> Result<Option<Value>, QueryError> {
        Ok(self
            .fetch_row(query)?
            .and_then(|row| row.into_iter().next().map(|(_, v)| v)))
    }

    /// The first field of every row on the current page.
    fn fetch_column(&self, query: &Query) -> Result<Vec<Value>, QueryError> {
        let rows = self.materialize(query)?;
        Ok(rows[query.window(rows.len())]
            .iter()
            .map(|row| row.values().next().cloned().unwrap_or(Value::Null))
            .collect())
    }

    /// First field → second field for every row on the current page.
    fn fetch_pairs(&self, query: &Query) -> Result<Map<String, Value>, QueryError> {
        let rows = self.materialize(query)?;
        Ok(pairs(&rows[query.window(rows.len())]))
    }

    /// Number of matches, ignoring `limit`/`offset`.
    fn count(&self, query: &Query) -> Result<usize, QueryError> {
        Ok(self.materialize(query)?.len())
    }

    /// The current page together with the total and a "more" flag.
    fn fetch_page(&self, query: &Query) -> Result<Page, QueryError> {
        let rows = self.materialize(query)?;
        let window = query.window(rows.len());
        Ok(Page {
            has_more: window.end < rows.len(),
            total: rows.len(),
            rows: rows[window].to_vec(),
        })
    }
}

/// Key/value pairs from rows: the first row's first two field names decide
/// which fields are read. A row with a single field maps it to itself.
/// Later rows with an already seen key overwrite the earlier value.
pub fn pairs(rows: &[Record]) -> Map<String, Value> {
    let mut result = Map::new();
    let Some(first) = rows.first() else {
        return result;
    };
    let mut names = first.keys();
    let Some(key_field) = names.next().cloned() else {
        return result;
    };
    let value_field = names.next().cloned().unwrap_or_else(|| key_field.clone());

    for row in rows {
        let key = row.get(&key_field).map(render).unwrap_or_default();
        let value = row.get(&value_field).cloned().unwrap_or(Value::Null);
        result.insert(key, value);
    }
    result
}
