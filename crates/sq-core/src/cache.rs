//! # Result Cache — One Materialized Result per Query State
//!
//! Holds the last materialized (filtered, projected, sorted, un-paginated)
//! result together with the [`Fingerprint`] of the query that produced it.
//! A lookup with a different fingerprint recomputes and replaces the slot.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tracing::debug;

use crate::query::Fingerprint;
use crate::record::Record;

/// A materialized result. Shared so that fetches can slice without copying
/// the whole set.
pub type Rows = Rc<[Record]>;

#[derive(Debug, Default)]
pub struct ResultCache {
    slot: RefCell<Option<(Fingerprint, Rows)>>,
    computations: Cell<u64>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached rows for `key`, computing them with `compute` on a
    /// miss. A failed computation leaves the previous slot untouched.
    pub fn get_or_try_insert<E>(
        &self,
        key: Fingerprint,
        compute: impl FnOnce() -> Result<Vec<Record>, E>,
    ) -> Result<Rows, E> {
        if let Some((cached_key, rows)) = self.slot.borrow().as_ref() {
            if *cached_key == key {
                debug!(query = key.query_id, revision = key.revision, "result cache hit");
                return Ok(Rc::clone(rows));
            }
        }

        let rows: Rows = compute()?.into();
        self.computations.set(self.computations.get() + 1);
        debug!(
            query = key.query_id,
            revision = key.revision,
            rows = rows.len(),
            "materialized result"
        );
        *self.slot.borrow_mut() = Some((key, Rc::clone(&rows)));
        Ok(rows)
    }

    /// Drop the cached result, e.g. after the backing data changed.
    pub fn invalidate(&self) {
        self.slot.borrow_mut().take();
    }

    /// How many times a result was computed (as opposed to served cached).
    pub fn computations(&self) -> u64 {
        self.computations.get()
    }
}
