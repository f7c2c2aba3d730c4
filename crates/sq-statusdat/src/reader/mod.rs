//! # Reader — Cached status.dat Snapshots
//!
//! Owns one parsed [`Snapshot`] of objects.cache + status.dat and hands out
//! [`ReaderQuery`] builders over it. The snapshot is kept until
//! [`Reader::refresh`] finds it stale: its lifetime elapsed or one of the
//! files changed on disk.
//!
//! The reader is also a core [`Datasource`]: `Query::from` picks the target
//! (`services` when unset) and the usual fetch shapes apply.

pub mod query;

use std::borrow::Cow;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use sq_core::{pipeline, Datasource, Query, QueryError, ResultCache, Rows};

use crate::config::ReaderConfig;
use crate::error::{StatusdatError, StatusdatResult};
use crate::parser::{self, Snapshot};

pub use query::ReaderQuery;

/// Target used when a query names none.
pub const DEFAULT_TARGET: &str = "services";

/// Query targets and the object kinds they read, in result order.
const TARGETS: &[(&str, &[&str])] = &[
    ("hosts", &["host"]),
    ("services", &["service"]),
    ("downtimes", &["downtime"]),
    ("groups", &["hostgroup", "servicegroup"]),
    ("hostgroups", &["hostgroup"]),
    ("servicegroups", &["servicegroup"]),
    ("comments", &["comment"]),
    ("contacts", &["contact"]),
    ("contactgroups", &["contactgroup"]),
];

pub fn target_kinds(target: &str) -> Option<&'static [&'static str]> {
    TARGETS
        .iter()
        .find(|(name, _)| *name == target)
        .map(|(_, kinds)| *kinds)
}

pub fn targets() -> impl Iterator<Item = &'static str> {
    TARGETS.iter().map(|(name, _)| *name)
}

#[derive(Debug)]
pub struct Reader {
    /// Where the snapshot came from; `None` for in-memory sources.
    config: Option<ReaderConfig>,
    snapshot: Snapshot,
    objects_mtime: Option<SystemTime>,
    status_mtime: Option<SystemTime>,
    loaded_at: DateTime<Utc>,
    cache: ResultCache,
}

impl Reader {
    /// Parse the configured files.
    pub fn open(config: ReaderConfig) -> StatusdatResult<Self> {
        let mut reader = Self {
            config: None,
            snapshot: Snapshot::default(),
            objects_mtime: None,
            status_mtime: None,
            loaded_at: Utc::now(),
            cache: ResultCache::new(),
        };
        reader.load(&config)?;
        reader.config = Some(config);
        Ok(reader)
    }

    /// Parse already opened sources. Such a reader never refreshes.
    pub fn from_sources<O, S>(objects: O, status: S) -> StatusdatResult<Self>
    where
        O: BufRead,
        S: BufRead,
    {
        Ok(Self::from_snapshot(build_snapshot(objects, status)?))
    }

    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        Self {
            config: None,
            snapshot,
            objects_mtime: None,
            status_mtime: None,
            loaded_at: Utc::now(),
            cache: ResultCache::new(),
        }
    }

    fn load(&mut self, config: &ReaderConfig) -> StatusdatResult<()> {
        let objects = open(&config.objects_file)?;
        let status = open(&config.status_file)?;
        self.snapshot = build_snapshot(objects, status)?;
        self.objects_mtime = modified(&config.objects_file);
        self.status_mtime = modified(&config.status_file);
        self.loaded_at = Utc::now();
        self.cache.invalidate();

        info!(
            objects = %config.objects_file.display(),
            status = %config.status_file.display(),
            hosts = self.snapshot.len("host"),
            services = self.snapshot.len("service"),
            "loaded status.dat snapshot"
        );
        Ok(())
    }

    /// Re-read the files if the snapshot is stale. Returns whether it was.
    pub fn refresh(&mut self) -> StatusdatResult<bool> {
        let Some(config) = self.config.take() else {
            return Ok(false);
        };
        let stale = self.is_stale(&config);
        let result = if stale { self.load(&config) } else { Ok(()) };
        self.config = Some(config);
        result.map(|()| stale)
    }

    fn is_stale(&self, config: &ReaderConfig) -> bool {
        if config.no_cache {
            return true;
        }
        let lifetime = i64::try_from(config.cache_lifetime_secs).unwrap_or(i64::MAX);
        let age = (Utc::now() - self.loaded_at).num_seconds();
        if age >= lifetime {
            debug!(age, lifetime, "snapshot expired");
            return true;
        }
        let changed = modified(&config.objects_file) != self.objects_mtime
            || modified(&config.status_file) != self.status_mtime;
        if changed {
            debug!("snapshot files changed on disk");
        }
        changed
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    pub fn config(&self) -> Option<&ReaderConfig> {
        self.config.as_ref()
    }

    /// A query builder over the current snapshot.
    pub fn query(&self) -> ReaderQuery<'_> {
        ReaderQuery::new(&self.snapshot)
    }

    /// How many core query results were computed rather than served from
    /// cache.
    pub fn computations(&self) -> u64 {
        self.cache.computations()
    }
}

impl Datasource for Reader {
    fn materialize(&self, query: &Query) -> Result<Rows, QueryError> {
        self.cache.get_or_try_insert(query.fingerprint(), || {
            let target = query.target().unwrap_or(DEFAULT_TARGET);
            let kinds =
                target_kinds(target).ok_or_else(|| QueryError::UnknownTarget(target.to_string()))?;
            let records = kinds
                .iter()
                .flat_map(|kind| self.snapshot.table(kind))
                .map(Cow::Borrowed);
            Ok(pipeline::materialize(records, query))
        })
    }
}

fn build_snapshot<O: BufRead, S: BufRead>(objects: O, status: S) -> StatusdatResult<Snapshot> {
    let mut snapshot = parser::parse_objects(objects)?;
    parser::apply_status(&mut snapshot, status)?;
    snapshot.link_services();
    Ok(snapshot)
}

fn open(path: &Path) -> StatusdatResult<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| StatusdatError::File {
            path: path.to_path_buf(),
            source,
        })
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}
