//! Property tests for query execution over an ArrayDatasource.

use proptest::prelude::*;
use serde_json::{json, Value};
use sq_core::record::render;
use sq_core::{ArrayDatasource, Datasource, Filter, Record, Sign, SortDirection};

// ============================================================================
// Generators
// ============================================================================

fn arb_record() -> impl Strategy<Value = Record> {
    ("[a-cA-C]{1,3}", 0..20i64).prop_map(|(name, val)| {
        let mut r = Record::new();
        r.insert("name".into(), json!(name));
        r.insert("val".into(), json!(val));
        r
    })
}

fn arb_records() -> impl Strategy<Value = Vec<Record>> {
    prop::collection::vec(arb_record(), 0..25)
}

/// Records with pairwise distinct names (case-insensitively), so sorting by
/// name has no ties.
fn arb_unique_named_records() -> impl Strategy<Value = Vec<Record>> {
    prop::collection::btree_set("[a-z]{1,4}", 0..15).prop_map(|names| {
        names
            .into_iter()
            .enumerate()
            .map(|(i, name)| {
                let mut r = Record::new();
                r.insert("name".into(), json!(name.to_uppercase()));
                r.insert("idx".into(), json!(i));
                r
            })
            .collect()
    })
}

fn arb_filters() -> impl Strategy<Value = Vec<Filter>> {
    prop::collection::vec(
        prop_oneof![
            (0..20i64).prop_map(|k| Filter::expression("val", Sign::Gte, k)),
            (0..20i64).prop_map(|k| Filter::expression("val", Sign::Lt, k)),
            "[a-c]".prop_map(|c| Filter::expression("name", Sign::Like, format!("%{}%", c))),
        ],
        0..4,
    )
}

fn datasource(records: &[Record]) -> ArrayDatasource {
    ArrayDatasource::new(records.to_vec())
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn count_equals_number_of_records_matching_all_filters(
        records in arb_records(),
        filters in arb_filters(),
    ) {
        let ds = datasource(&records);
        let mut q = ds.select();
        for f in &filters {
            q.add_filter(f.clone());
        }
        let expected = records
            .iter()
            .filter(|r| filters.iter().all(|f| f.matches(r)))
            .count();
        prop_assert_eq!(ds.count(&q).unwrap(), expected);
    }

    #[test]
    fn unfiltered_unordered_fetch_is_identity(records in arb_records()) {
        let ds = datasource(&records);
        let q = ds.select();
        prop_assert_eq!(ds.fetch_all(&q).unwrap(), records);
    }

    #[test]
    fn ascending_order_is_non_decreasing(records in arb_records()) {
        let ds = datasource(&records);
        let mut q = ds.select();
        q.order("name", SortDirection::Asc);
        let names: Vec<String> = ds
            .fetch_all(&q)
            .unwrap()
            .iter()
            .map(|r| render(&r["name"]).to_lowercase())
            .collect();
        for pair in names.windows(2) {
            prop_assert!(pair[0] <= pair[1], "{:?} > {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn descending_is_reverse_of_ascending_without_ties(records in arb_unique_named_records()) {
        let ds = datasource(&records);
        let mut asc = ds.select();
        asc.order("name", SortDirection::Asc);
        let mut desc = ds.select();
        desc.order("name", SortDirection::Desc);

        let mut expected = ds.fetch_all(&asc).unwrap();
        expected.reverse();
        prop_assert_eq!(ds.fetch_all(&desc).unwrap(), expected);
    }

    #[test]
    fn fetch_column_follows_fetch_all(
        records in arb_records(),
        limit in 0..10usize,
        offset in 0..30usize,
    ) {
        let ds = datasource(&records);
        let mut q = ds.select();
        q.columns(["val", "name"]).limit(Some(limit), offset);
        let all = ds.fetch_all(&q).unwrap();
        let column = ds.fetch_column(&q).unwrap();
        prop_assert_eq!(column.len(), all.len());
        for (value, row) in column.iter().zip(&all) {
            prop_assert_eq!(value, &row["val"]);
        }
    }

    #[test]
    fn fetch_pairs_maps_first_to_second_field(records in arb_records()) {
        let ds = datasource(&records);
        let mut q = ds.select();
        q.columns(["name", "val"]);
        let all = ds.fetch_all(&q).unwrap();
        let pairs = ds.fetch_pairs(&q).unwrap();
        prop_assert!(pairs.len() <= all.len());

        // The last row carrying a key wins.
        for row in all.iter().rev() {
            let key = render(&row["name"]);
            let last = all.iter().rev().find(|r| render(&r["name"]) == key).unwrap();
            prop_assert_eq!(pairs.get(&key), Some(&last["val"]));
        }
    }

    #[test]
    fn count_ignores_pagination(
        records in arb_records(),
        filters in arb_filters(),
        limit in 1..5usize,
        offset in 0..10usize,
    ) {
        let ds = datasource(&records);
        let mut q = ds.select();
        for f in filters {
            q.add_filter(f);
        }
        let total = ds.count(&q).unwrap();
        q.limit(Some(limit), offset);
        prop_assert_eq!(ds.count(&q).unwrap(), total);
        prop_assert!(ds.fetch_all(&q).unwrap().len() <= limit);
    }
}

#[test]
fn limit_two_offset_one_returns_indices_one_and_two() {
    let records: Vec<Record> = (0..5)
        .map(|i| json!({ "id": i }).as_object().cloned().unwrap())
        .collect();
    let ds = datasource(&records);
    let mut q = ds.select();
    q.limit(Some(2), 1);
    let ids: Vec<Value> = ds.fetch_column(&q).unwrap();
    assert_eq!(ids, vec![json!(1), json!(2)]);
}
