//! # sq-core — Querying In-Memory Monitoring Records
//!
//! A [`Query`] describes what to retrieve: columns, filters, sort keys and a
//! page window. A [`Datasource`] owns records and executes queries, caching
//! the filtered, projected and sorted result once per query state so that
//! paging through it never recomputes.
//!
//! ```
//! use serde_json::json;
//! use sq_core::{ArrayDatasource, Datasource, Filter, Sign, SortDirection};
//!
//! let ds = ArrayDatasource::from_json(json!([
//!     { "name": "b", "val": 2 },
//!     { "name": "a", "val": 1 },
//!     { "name": "c", "val": 3 },
//! ]));
//! let mut query = ds.select();
//! query
//!     .add_filter(Filter::expression("val", Sign::Gte, 2))
//!     .order("name", SortDirection::Asc);
//!
//! assert_eq!(ds.count(&query).unwrap(), 2);
//! assert_eq!(ds.fetch_one(&query).unwrap(), Some(json!("b")));
//! ```

pub mod array;
pub mod cache;
pub mod collate;
pub mod datasource;
pub mod error;
pub mod filter;
pub mod pipeline;
pub mod query;
pub mod record;

pub use array::ArrayDatasource;
pub use cache::{ResultCache, Rows};
pub use collate::Collation;
pub use datasource::{Datasource, Page};
pub use error::{QueryError, QueryResult};
pub use filter::{Filter, FilterParseError, FilterValue, Sign};
pub use query::{Column, Fingerprint, Query, SortDirection};
pub use record::{lookup, Record};
