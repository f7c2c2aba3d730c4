//! # sq-statusdat — Querying Icinga/Nagios status.dat Snapshots
//!
//! Parses objects.cache and status.dat into a [`Snapshot`], keeps it cached
//! in a [`Reader`], and queries it three ways:
//!
//! - [`ReaderQuery`]: the expression builder
//!   (`from("services", cols).where_expr("status.current_state >= ?", ...)`)
//! - [`MonitoringQuery`]: named filters (`problems`, `hostgroups`, ...) on
//!   top of the builder
//! - the core [`sq_core::Datasource`] API, since [`Reader`] implements it
//!
//! [`summary`] adds per-status and per-group state counts on top of the
//! builder.

pub mod config;
pub mod error;
pub mod expression;
pub mod monitoring;
pub mod parser;
pub mod reader;
pub mod summary;

pub use config::ReaderConfig;
pub use error::{StatusdatError, StatusdatResult};
pub use expression::{ExpressionError, Params};
pub use monitoring::{MonitoringQuery, NamedFilter, OrderColumn};
pub use parser::Snapshot;
pub use reader::{Reader, ReaderQuery};
pub use summary::{CheckState, ObjectKind};
