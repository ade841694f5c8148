//! Persistence gateway: row CRUD per table.
//!
//! The engine never talks to storage directly. Everything durable goes
//! through a [`Gateway`], which offers `select`/`insert`/`update`/`delete`
//! over [`Record`] types. There are no cross-table transactions; the last
//! write to a row wins.

mod jsonl;
mod memory;

pub use jsonl::JsonlStore;
pub use memory::{MemoryStore, Op};

use crate::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// A row type stored in one gateway table
pub trait Record: Clone + Serialize + DeserializeOwned {
    /// Table name, also used as the on-disk file stem
    const TABLE: &'static str;

    /// Partial update: one `Option` per mutable field
    type Patch: fmt::Debug;

    /// Identifier, absent until the gateway assigns one on insert
    fn id(&self) -> Option<Uuid>;

    fn set_id(&mut self, id: Uuid);

    /// Merge a patch into this row
    fn apply(&mut self, patch: &Self::Patch);
}

/// Row store offering CRUD on [`Record`] tables
pub trait Gateway {
    /// All rows of a table, in storage order
    fn select<R: Record>(&self) -> Result<Vec<R>>;

    /// Store a new row, assigning an id when it has none
    fn insert<R: Record>(&self, row: R) -> Result<R>;

    /// Merge `patch` into the row with `id`
    fn update<R: Record>(&self, id: Uuid, patch: &R::Patch) -> Result<()>;

    /// Remove the row with `id`
    fn delete<R: Record>(&self, id: Uuid) -> Result<()>;

    fn select_where<R, F>(&self, filter: F) -> Result<Vec<R>>
    where
        R: Record,
        F: Fn(&R) -> bool,
    {
        Ok(self.select::<R>()?.into_iter().filter(|r| filter(r)).collect())
    }

    /// Rows sorted by `key`; the sort is stable so storage order breaks ties
    fn select_ordered<R, K, F>(&self, key: F) -> Result<Vec<R>>
    where
        R: Record,
        K: Ord,
        F: Fn(&R) -> K,
    {
        let mut rows = self.select::<R>()?;
        rows.sort_by_key(|r| key(r));
        Ok(rows)
    }
}

impl<G: Gateway> Gateway for &G {
    fn select<R: Record>(&self) -> Result<Vec<R>> {
        (**self).select()
    }

    fn insert<R: Record>(&self, row: R) -> Result<R> {
        (**self).insert(row)
    }

    fn update<R: Record>(&self, id: Uuid, patch: &R::Patch) -> Result<()> {
        (**self).update::<R>(id, patch)
    }

    fn delete<R: Record>(&self, id: Uuid) -> Result<()> {
        (**self).delete::<R>(id)
    }
}
