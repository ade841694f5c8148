//! In-process gateway with fault injection, used by tests and embedders
//! that don't need durability.

use super::{Gateway, Record};
use crate::{Error, Result};
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use uuid::Uuid;

/// Gateway operation, used to target injected faults
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    Select,
    Insert,
    Update,
    Delete,
}

#[derive(Debug)]
struct Fault {
    table: &'static str,
    op: Op,
    row: Option<Uuid>,
    transient: bool,
    remaining: u32,
}

/// Rows are kept serialized so one map can hold every table
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RefCell<HashMap<&'static str, Vec<Value>>>,
    faults: RefCell<Vec<Fault>>,
    writes: Cell<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` calls of `op` on `table` with a permanent error
    pub fn fail_next(&self, table: &'static str, op: Op, count: u32) {
        self.push_fault(table, op, None, false, count);
    }

    /// Fail the next `count` calls of `op` on `table` with a retryable error
    pub fn fail_next_transient(&self, table: &'static str, op: Op, count: u32) {
        self.push_fault(table, op, None, true, count);
    }

    /// Fail the next `op` that targets one specific row
    pub fn fail_row(&self, table: &'static str, op: Op, row: Uuid) {
        self.push_fault(table, op, Some(row), false, 1);
    }

    /// Successful insert/update/delete calls so far
    pub fn write_count(&self) -> usize {
        self.writes.get()
    }

    /// Read a table without going through fault injection
    pub fn rows<R: Record>(&self) -> Vec<R> {
        self.tables
            .borrow()
            .get(R::TABLE)
            .map(|rows| {
                rows.iter()
                    .filter_map(|v| serde_json::from_value(v.clone()).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn push_fault(&self, table: &'static str, op: Op, row: Option<Uuid>, transient: bool, count: u32) {
        self.faults.borrow_mut().push(Fault {
            table,
            op,
            row,
            transient,
            remaining: count,
        });
    }

    fn check_fault(&self, table: &'static str, op: Op, row: Option<Uuid>) -> Result<()> {
        let mut faults = self.faults.borrow_mut();
        let hit = faults.iter_mut().find(|f| {
            f.remaining > 0 && f.table == table && f.op == op && (f.row.is_none() || f.row == row)
        });

        if let Some(fault) = hit {
            fault.remaining -= 1;
            let message = format!("injected {:?} failure on {}", op, table);
            return Err(if fault.transient {
                Error::Unavailable(message)
            } else {
                Error::Gateway(message)
            });
        }
        faults.retain(|f| f.remaining > 0);
        Ok(())
    }

    fn position(rows: &[Value], id: Uuid) -> Option<usize> {
        let id = id.to_string();
        rows.iter()
            .position(|v| v.get("id").and_then(Value::as_str) == Some(id.as_str()))
    }

    fn record_write(&self) {
        self.writes.set(self.writes.get() + 1);
    }
}

impl Gateway for MemoryStore {
    fn select<R: Record>(&self) -> Result<Vec<R>> {
        self.check_fault(R::TABLE, Op::Select, None)?;
        let tables = self.tables.borrow();
        let rows = match tables.get(R::TABLE) {
            Some(rows) => rows,
            None => return Ok(Vec::new()),
        };
        rows.iter()
            .map(|v| serde_json::from_value(v.clone()).map_err(Error::from))
            .collect()
    }

    fn insert<R: Record>(&self, mut row: R) -> Result<R> {
        self.check_fault(R::TABLE, Op::Insert, row.id())?;
        if row.id().is_none() {
            row.set_id(Uuid::new_v4());
        }
        let value = serde_json::to_value(&row)?;
        self.tables
            .borrow_mut()
            .entry(R::TABLE)
            .or_default()
            .push(value);
        self.record_write();
        Ok(row)
    }

    fn update<R: Record>(&self, id: Uuid, patch: &R::Patch) -> Result<()> {
        self.check_fault(R::TABLE, Op::Update, Some(id))?;
        let mut tables = self.tables.borrow_mut();
        let rows = tables.entry(R::TABLE).or_default();
        let idx = Self::position(rows, id)
            .ok_or_else(|| Error::NotFound(format!("{} row {}", R::TABLE, id)))?;

        let mut row: R = serde_json::from_value(rows[idx].clone())?;
        row.apply(patch);
        rows[idx] = serde_json::to_value(&row)?;
        self.record_write();
        Ok(())
    }

    fn delete<R: Record>(&self, id: Uuid) -> Result<()> {
        self.check_fault(R::TABLE, Op::Delete, Some(id))?;
        let mut tables = self.tables.borrow_mut();
        let rows = tables.entry(R::TABLE).or_default();
        let idx = Self::position(rows, id)
            .ok_or_else(|| Error::NotFound(format!("{} row {}", R::TABLE, id)))?;
        rows.remove(idx);
        self.record_write();
        Ok(())
    }
}
