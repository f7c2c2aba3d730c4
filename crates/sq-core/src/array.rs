//! # ArrayDatasource — Queries over an In-Memory Collection
//!
//! The simplest [`Datasource`]: a list of records, optionally keyed by name.
//! When the collection is keyed and a key column is set, every record that
//! lacks that column, or holds `null` there, is served with the key filled
//! in. The stored record is never modified.

use std::borrow::Cow;

use serde_json::Value;
use tracing::warn;

use crate::cache::{ResultCache, Rows};
use crate::datasource::Datasource;
use crate::error::QueryError;
use crate::pipeline;
use crate::query::Query;
use crate::record::Record;

#[derive(Debug, Default)]
pub struct ArrayDatasource {
    data: Vec<(Option<String>, Record)>,
    key_column: Option<String>,
    cache: ResultCache,
}

impl ArrayDatasource {
    pub fn new<I>(records: I) -> Self
    where
        I: IntoIterator<Item = Record>,
    {
        Self {
            data: records.into_iter().map(|r| (None, r)).collect(),
            ..Self::default()
        }
    }

    /// A collection keyed by name, e.g. host name → host record.
    pub fn keyed<I, K>(records: I) -> Self
    where
        I: IntoIterator<Item = (K, Record)>,
        K: Into<String>,
    {
        Self {
            data: records
                .into_iter()
                .map(|(k, r)| (Some(k.into()), r))
                .collect(),
            ..Self::default()
        }
    }

    /// Build from a JSON document: an array of objects, or an object whose
    /// values are objects (keyed). Anything that is not an object is skipped.
    pub fn from_json(document: Value) -> Self {
        match document {
            Value::Array(items) => Self::new(items.into_iter().filter_map(|item| match item {
                Value::Object(record) => Some(record),
                other => {
                    warn!(value = %other, "skipping non-object record");
                    None
                }
            })),
            Value::Object(map) => Self::keyed(map.into_iter().filter_map(|(key, item)| match item {
                Value::Object(record) => Some((key, record)),
                other => {
                    warn!(key = %key, value = %other, "skipping non-object record");
                    None
                }
            })),
            other => {
                warn!(value = %other, "record document is neither an array nor an object");
                Self::default()
            }
        }
    }

    /// Name the column that receives each record's key.
    pub fn set_key_column(&mut self, name: impl Into<String>) -> &mut Self {
        self.key_column = Some(name.into());
        self.cache.invalidate();
        self
    }

    pub fn key_column(&self) -> Option<&str> {
        self.key_column.as_deref()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// How many results were computed rather than served from cache.
    pub fn computations(&self) -> u64 {
        self.cache.computations()
    }

    fn records(&self) -> impl Iterator<Item = Cow<'_, Record>> {
        self.data.iter().map(move |(key, record)| {
            match (key, self.key_column.as_deref()) {
                (Some(key), Some(column)) if record.get(column).map_or(true, Value::is_null) => {
                    let mut copy = record.clone();
                    copy.insert(column.to_string(), Value::String(key.clone()));
                    Cow::Owned(copy)
                }
                _ => Cow::Borrowed(record),
            }
        })
    }
}

impl Datasource for ArrayDatasource {
    fn materialize(&self, query: &Query) -> Result<Rows, QueryError> {
        self.cache.get_or_try_insert(query.fingerprint(), || {
            Ok(pipeline::materialize(self.records(), query))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{Filter, Sign};
    use crate::query::SortDirection;
    use serde_json::json;

    fn hosts() -> ArrayDatasource {
        ArrayDatasource::from_json(json!([
            { "name": "b", "val": 2 },
            { "name": "a", "val": 1 },
            { "name": "c", "val": 3 }
        ]))
    }

    #[test]
    fn test_spec_example_fetch_all_and_count() {
        let ds = hosts();
        let mut q = ds.select();
        q.add_filter(Filter::expression("val", Sign::Gte, 2))
            .order("name", SortDirection::Asc);
        assert_eq!(
            Value::Array(ds.fetch_all(&q).unwrap().into_iter().map(Value::Object).collect()),
            json!([{ "name": "b", "val": 2 }, { "name": "c", "val": 3 }])
        );
        assert_eq!(ds.count(&q).unwrap(), 2);
    }

    #[test]
    fn test_no_filter_no_order_is_identity() {
        let ds = hosts();
        let q = ds.select();
        let names: Vec<Value> = ds.fetch_column(&q).unwrap();
        assert_eq!(names, vec![json!("b"), json!("a"), json!("c")]);
    }

    #[test]
    fn test_fetch_row_and_one() {
        let ds = hosts();
        let mut q = ds.select();
        q.order("val", SortDirection::Desc);
        let row = ds.fetch_row(&q).unwrap().unwrap();
        assert_eq!(row["name"], json!("c"));
        assert_eq!(ds.fetch_one(&q).unwrap(), Some(json!("c")));
    }

    #[test]
    fn test_fetch_row_empty_is_none() {
        let ds = hosts();
        let mut q = ds.select();
        q.where_eq("name", "zzz");
        assert_eq!(ds.fetch_row(&q).unwrap(), None);
        assert_eq!(ds.fetch_one(&q).unwrap(), None);
        assert!(ds.fetch_all(&q).unwrap().is_empty());
        assert!(ds.fetch_pairs(&q).unwrap().is_empty());
    }

    #[test]
    fn test_fetch_row_respects_offset() {
        let ds = hosts();
        let mut q = ds.select();
        q.limit(Some(1), 1);
        assert_eq!(ds.fetch_row(&q).unwrap().unwrap()["name"], json!("a"));
    }

    #[test]
    fn test_count_ignores_limit() {
        let ds = hosts();
        let mut q = ds.select();
        q.limit(Some(1), 0);
        assert_eq!(ds.fetch_all(&q).unwrap().len(), 1);
        assert_eq!(ds.count(&q).unwrap(), 3);
    }

    #[test]
    fn test_out_of_range_offset_is_empty() {
        let ds = hosts();
        let mut q = ds.select();
        q.limit(Some(5), 10);
        assert!(ds.fetch_all(&q).unwrap().is_empty());
        assert!(ds.fetch_column(&q).unwrap().is_empty());
    }

    #[test]
    fn test_pagination_reuses_cached_result() {
        let ds = hosts();
        let mut q = ds.select();
        q.order("name", SortDirection::Asc);
        q.limit(Some(1), 0);
        ds.fetch_all(&q).unwrap();
        q.limit(Some(1), 1);
        ds.fetch_all(&q).unwrap();
        ds.count(&q).unwrap();
        assert_eq!(ds.computations(), 1);
    }

    #[test]
    fn test_mutation_invalidates_cache() {
        let ds = hosts();
        let mut q = ds.select();
        assert_eq!(ds.count(&q).unwrap(), 3);
        q.where_eq("name", "a");
        assert_eq!(ds.count(&q).unwrap(), 1);
        assert_eq!(ds.computations(), 2);
    }

    #[test]
    fn test_other_query_does_not_see_cached_result() {
        let ds = hosts();
        let mut q1 = ds.select();
        q1.where_eq("name", "a");
        let q2 = ds.select();
        assert_eq!(ds.count(&q1).unwrap(), 1);
        assert_eq!(ds.count(&q2).unwrap(), 3);
    }

    #[test]
    fn test_fetch_page_reports_more() {
        let ds = hosts();
        let mut q = ds.select();
        q.limit(Some(2), 0);
        let page = ds.fetch_page(&q).unwrap();
        assert_eq!(page.rows.len(), 2);
        assert_eq!(page.total, 3);
        assert!(page.has_more);

        q.limit(Some(2), 2);
        let page = ds.fetch_page(&q).unwrap();
        assert_eq!(page.rows.len(), 1);
        assert!(!page.has_more);
    }

    #[test]
    fn test_projection_with_unknown_column() {
        let ds = hosts();
        let mut q = ds.select();
        q.columns(["name", "missing"]);
        let row = ds.fetch_row(&q).unwrap().unwrap();
        assert_eq!(Value::Object(row), json!({ "name": "b", "missing": null }));
    }

    #[test]
    fn test_fetch_pairs_on_projection() {
        let ds = hosts();
        let mut q = ds.select();
        q.columns(["name", "val"]);
        let pairs = ds.fetch_pairs(&q).unwrap();
        assert_eq!(Value::Object(pairs), json!({ "b": 2, "a": 1, "c": 3 }));
    }

    #[test]
    fn test_key_column_fills_missing_field() {
        let mut ds = ArrayDatasource::from_json(json!({
            "web01": { "state": 0 },
            "db01": { "state": 2, "host_name": "explicit" }
        }));
        let mut q = ds.select();
        q.columns(["host_name", "state"]);
        assert_eq!(ds.fetch_column(&q).unwrap(), vec![Value::Null, json!("explicit")]);

        ds.set_key_column("host_name");
        assert_eq!(
            ds.fetch_column(&q).unwrap(),
            vec![json!("web01"), json!("explicit")]
        );
        q.where_eq("host_name", "web01");
        assert_eq!(ds.count(&q).unwrap(), 1);
    }

    #[test]
    fn test_key_column_fills_null_field() {
        let mut ds = ArrayDatasource::from_json(json!({
            "web01": { "host_name": null },
            "db01": { "host_name": "explicit" }
        }));
        ds.set_key_column("host_name");
        let mut q = ds.select();
        q.columns(["host_name"]);
        assert_eq!(
            ds.fetch_column(&q).unwrap(),
            vec![json!("web01"), json!("explicit")]
        );
    }

    #[test]
    fn test_from_json_skips_non_objects() {
        let ds = ArrayDatasource::from_json(json!([{ "a": 1 }, 5, "x", { "a": 2 }]));
        assert_eq!(ds.len(), 2);
        assert!(ArrayDatasource::from_json(json!(42)).is_empty());
    }
}
