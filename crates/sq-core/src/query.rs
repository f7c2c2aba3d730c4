//! # Query — Pending Retrieval State
//!
//! A [`Query`] accumulates columns, filters, sort keys and pagination bounds
//! without touching any data. Datasources read it when materializing.
//!
//! Every query has a process-unique identity, and every change to what it
//! selects (columns, filter, order, collation, target) bumps its revision.
//! A datasource caches one result per `(identity, revision)`, so mutating a
//! query invalidates the cache while changing only `limit`/`offset` re-slices
//! the cached result.

use std::ops::Range;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::collate::Collation;
use crate::filter::{Filter, FilterValue};

static NEXT_QUERY_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl FromStr for SortDirection {
    type Err = std::convert::Infallible;

    /// Anything other than `desc` (any case) is ascending.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("desc") {
            Ok(Self::Desc)
        } else {
            Ok(Self::Asc)
        }
    }
}

/// One requested output column: `alias` in the result, read from `source`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub alias: String,
    pub source: String,
}

impl Column {
    pub fn new(alias: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            source: source.into(),
        }
    }
}

impl From<&str> for Column {
    fn from(name: &str) -> Self {
        Self::new(name, name)
    }
}

impl From<String> for Column {
    fn from(name: String) -> Self {
        Self::new(name.clone(), name)
    }
}

impl<A: Into<String>, S: Into<String>> From<(A, S)> for Column {
    fn from((alias, source): (A, S)) -> Self {
        Self::new(alias, source)
    }
}

/// Cache key of a query's selection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub query_id: u64,
    pub revision: u64,
}

#[derive(Debug)]
pub struct Query {
    id: u64,
    revision: u64,
    target: Option<String>,
    columns: Vec<Column>,
    filter: Filter,
    order: Vec<(String, SortDirection)>,
    collation: Collation,
    limit: Option<usize>,
    offset: usize,
}

impl Default for Query {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Query {
    /// A clone selects the same rows but is a distinct query: it gets its
    /// own identity and therefore its own cache slot.
    fn clone(&self) -> Self {
        Self {
            id: NEXT_QUERY_ID.fetch_add(1, Ordering::Relaxed),
            revision: self.revision,
            target: self.target.clone(),
            columns: self.columns.clone(),
            filter: self.filter.clone(),
            order: self.order.clone(),
            collation: self.collation,
            limit: self.limit,
            offset: self.offset,
        }
    }
}

impl Query {
    pub fn new() -> Self {
        Self {
            id: NEXT_QUERY_ID.fetch_add(1, Ordering::Relaxed),
            revision: 0,
            target: None,
            columns: Vec::new(),
            filter: Filter::match_all(),
            order: Vec::new(),
            collation: Collation::default(),
            limit: None,
            offset: 0,
        }
    }

    fn touch(&mut self) -> &mut Self {
        self.revision += 1;
        self
    }

    // =========================================================================
    // Selection
    // =========================================================================

    /// Select from `target` (a record kind, e.g. `services`). Datasources
    /// holding a single collection ignore it.
    pub fn from(&mut self, target: impl Into<String>) -> &mut Self {
        self.target = Some(target.into());
        self.touch()
    }

    /// Replace the requested columns. An empty set means "all fields".
    ///
    /// Columns are not validated; unknown sources come back as `null`.
    pub fn columns<I, C>(&mut self, columns: I) -> &mut Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Column>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self.touch()
    }

    /// AND `filter` onto the query.
    pub fn add_filter(&mut self, filter: Filter) -> &mut Self {
        let current = std::mem::take(&mut self.filter);
        self.filter = current.and(filter);
        self.touch()
    }

    /// AND an equality predicate. A list value means "any of".
    pub fn where_eq(&mut self, field: impl Into<String>, value: impl Into<FilterValue>) -> &mut Self {
        self.add_filter(Filter::eq(field, value))
    }

    /// Replace the whole filter tree.
    pub fn set_filter(&mut self, filter: Filter) -> &mut Self {
        self.filter = filter;
        self.touch()
    }

    /// Append a sort key. Keys apply left to right.
    pub fn order(&mut self, field: impl Into<String>, direction: SortDirection) -> &mut Self {
        self.order.push((field.into(), direction));
        self.touch()
    }

    /// Append a sort key given as `"field"` or `"field DESC"`.
    pub fn order_by(&mut self, spec: &str) -> &mut Self {
        let spec = spec.trim();
        match spec.split_once(char::is_whitespace) {
            Some((field, dir)) => {
                let dir = dir.parse().unwrap_or_default();
                self.order(field, dir)
            }
            None => self.order(spec, SortDirection::Asc),
        }
    }

    pub fn clear_order(&mut self) -> &mut Self {
        self.order.clear();
        self.touch()
    }

    pub fn collation(&mut self, collation: Collation) -> &mut Self {
        self.collation = collation;
        self.touch()
    }

    // =========================================================================
    // Pagination (does not invalidate cached results)
    // =========================================================================

    /// Set pagination bounds. `None` or `Some(0)` means "no limit".
    pub fn limit(&mut self, count: Option<usize>, offset: usize) -> &mut Self {
        self.limit = count.filter(|c| *c > 0);
        self.offset = offset;
        self
    }

    /// Clamp the pagination bounds to a result of `total` rows.
    ///
    /// An offset past the end yields an empty range.
    pub fn window(&self, total: usize) -> Range<usize> {
        let start = self.offset.min(total);
        let end = match self.limit {
            Some(count) => start.saturating_add(count).min(total),
            None => total,
        };
        start..end
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint {
            query_id: self.id,
            revision: self.revision,
        }
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    pub fn get_columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    pub fn get_order(&self) -> &[(String, SortDirection)] {
        &self.order
    }

    pub fn get_collation(&self) -> Collation {
        self.collation
    }

    pub fn get_limit(&self) -> Option<usize> {
        self.limit
    }

    pub fn get_offset(&self) -> usize {
        self.offset
    }

    pub fn has_order(&self) -> bool {
        !self.order.is_empty()
    }

    pub fn has_limit(&self) -> bool {
        self.limit.is_some()
    }

    pub fn has_offset(&self) -> bool {
        self.offset > 0
    }

    /// The field a sort key reads from the projected row.
    ///
    /// Sort keys may name either an alias or a projected source field; a
    /// source field is resolved to the alias it is projected under.
    pub fn resolve_sort_field<'a>(&'a self, field: &'a str) -> &'a str {
        if self.columns.is_empty() || self.columns.iter().any(|c| c.alias == field) {
            return field;
        }
        self.columns
            .iter()
            .find(|c| c.source == field)
            .map(|c| c.alias.as_str())
            .unwrap_or(field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_queries_have_distinct_ids() {
        assert_ne!(Query::new().id(), Query::new().id());
    }

    #[test]
    fn test_clone_gets_fresh_identity_same_state() {
        let mut q = Query::new();
        q.where_eq("state", 2).order_by("name desc");
        let c = q.clone();
        assert_ne!(q.id(), c.id());
        assert_eq!(q.revision(), c.revision());
        assert_eq!(q.filter(), c.filter());
        assert_eq!(q.get_order(), c.get_order());
    }

    #[test]
    fn test_selection_changes_bump_revision() {
        let mut q = Query::new();
        let r0 = q.revision();
        q.where_eq("a", 1);
        let r1 = q.revision();
        q.columns(["a"]);
        let r2 = q.revision();
        q.order("a", SortDirection::Asc);
        let r3 = q.revision();
        assert!(r0 < r1 && r1 < r2 && r2 < r3);
    }

    #[test]
    fn test_limit_keeps_revision() {
        let mut q = Query::new();
        q.where_eq("a", 1);
        let before = q.fingerprint();
        q.limit(Some(10), 20);
        assert_eq!(q.fingerprint(), before);
    }

    #[test]
    fn test_order_by_splits_direction() {
        let mut q = Query::new();
        q.order_by("host_name DESC").order_by("service").order_by("state up");
        assert_eq!(
            q.get_order(),
            &[
                ("host_name".to_string(), SortDirection::Desc),
                ("service".to_string(), SortDirection::Asc),
                ("state".to_string(), SortDirection::Asc),
            ]
        );
    }

    #[test]
    fn test_zero_limit_means_unlimited() {
        let mut q = Query::new();
        q.limit(Some(0), 3);
        assert!(!q.has_limit());
        assert!(q.has_offset());
        assert_eq!(q.window(5), 3..5);
    }

    #[test]
    fn test_window_clamps() {
        let mut q = Query::new();
        q.limit(Some(2), 1);
        assert_eq!(q.window(5), 1..3);
        q.limit(Some(10), 4);
        assert_eq!(q.window(5), 4..5);
        q.limit(Some(2), 9);
        assert_eq!(q.window(5), 5..5);
        q.limit(None, 0);
        assert_eq!(q.window(0), 0..0);
    }

    #[test]
    fn test_where_eq_ands_filters() {
        let mut q = Query::new();
        q.where_eq("a", 1).where_eq("b", vec!["x", "y"]);
        match q.filter() {
            Filter::All(fs) => assert_eq!(fs.len(), 2),
            other => panic!("expected AND chain, got {:?}", other),
        }
    }

    #[test]
    fn test_sort_field_resolves_source_to_alias() {
        let mut q = Query::new();
        q.columns([("host", "host_name"), ("state", "status.current_state")]);
        assert_eq!(q.resolve_sort_field("host_name"), "host");
        assert_eq!(q.resolve_sort_field("host"), "host");
        assert_eq!(q.resolve_sort_field("unknown"), "unknown");
    }
}
