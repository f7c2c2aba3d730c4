//! # Materialization Pipeline
//!
//! Filter → project → sort. Shared by every datasource so that the
//! "never fail on data shape" rules live in exactly one place.

use std::borrow::Cow;
use std::cmp::Ordering;

use serde_json::Value;

use crate::collate::Collation;
use crate::query::{Column, Query, SortDirection};
use crate::record::{lookup, Record};

/// Run `query`'s filter, projection and order over `records`.
///
/// Pagination is not applied: the returned rows are what a datasource caches.
pub fn materialize<'a, I>(records: I, query: &Query) -> Vec<Record>
where
    I: IntoIterator<Item = Cow<'a, Record>>,
{
    let filter = query.filter();
    let columns = query.get_columns();

    let mut rows: Vec<Record> = records
        .into_iter()
        .filter(|r| filter.matches(r))
        .map(|r| project(r, columns))
        .collect();

    if query.has_order() {
        sort(&mut rows, query);
    }
    rows
}

/// Restrict `record` to `columns`. Absent sources map to `null`; an empty
/// column list keeps the record as it is.
pub fn project(record: Cow<'_, Record>, columns: &[Column]) -> Record {
    if columns.is_empty() {
        return record.into_owned();
    }
    columns
        .iter()
        .map(|c| {
            let value = lookup(&record, &c.source).cloned().unwrap_or(Value::Null);
            (c.alias.clone(), value)
        })
        .collect()
}

/// Stable multi-key sort: key 1 decides, ties fall through to key 2, ...
pub fn sort(rows: &mut [Record], query: &Query) {
    let keys: Vec<(&str, SortDirection)> = query
        .get_order()
        .iter()
        .map(|(field, dir)| (query.resolve_sort_field(field), *dir))
        .collect();
    let collation = query.get_collation();
    rows.sort_by(|a, b| compare_by(a, b, &keys, collation));
}

/// Compare two records on `keys` in turn; the first unequal key decides.
pub fn compare_by(
    a: &Record,
    b: &Record,
    keys: &[(&str, SortDirection)],
    collation: Collation,
) -> Ordering {
    keys.iter()
        .map(|(field, dir)| {
            let ord = collation.compare(lookup(a, field), lookup(b, field));
            match dir {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            }
        })
        .find(|ord| ord.is_ne())
        .unwrap_or(Ordering::Equal)
}
