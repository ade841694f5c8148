//! File-backed gateway: one JSON Lines file per table.
//!
//! Inserts append a single line. Updates and deletes rewrite the table by
//! writing a temp file in the same directory, syncing it and renaming it over
//! the original. Every mutation holds an exclusive lock on `.lock`; reads hold
//! a shared one.

use super::{Gateway, Record};
use crate::{Error, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use uuid::Uuid;

/// JSON Lines store rooted at a `tables/` directory
#[derive(Clone, Debug)]
pub struct JsonlStore {
    root: PathBuf,
}

/// Held for the duration of one gateway call
struct StoreLock {
    file: File,
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

impl JsonlStore {
    /// Create a store whose table files live directly in `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store under `<data_dir>/tables`
    pub fn open(data_dir: &Path) -> Self {
        Self::new(data_dir.join("tables"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn table_path(&self, table: &str) -> PathBuf {
        self.root.join(format!("{}.jsonl", table))
    }

    fn lock(&self, exclusive: bool) -> Result<StoreLock> {
        std::fs::create_dir_all(&self.root)?;
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(self.root.join(".lock"))?;

        if exclusive {
            file.lock_exclusive()?;
        } else {
            file.lock_shared()?;
        }
        Ok(StoreLock { file })
    }

    /// Parse a table, skipping lines that don't deserialize
    fn read_rows<R: Record>(&self) -> Result<Vec<R>> {
        let path = self.table_path(R::TABLE);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let reader = BufReader::new(File::open(&path)?);
        let mut rows = Vec::new();

        for (line_num, bytes) in reader.split(b'\n').enumerate() {
            let line = match String::from_utf8(bytes?) {
                Ok(line) => line,
                Err(e) => {
                    tracing::warn!(
                        "Skipping unreadable row in {} at line {}: {}",
                        R::TABLE,
                        line_num + 1,
                        e
                    );
                    continue;
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            match serde_json::from_str::<R>(&line) {
                Ok(row) => rows.push(row),
                Err(e) => {
                    tracing::warn!(
                        "Skipping unreadable row in {} at line {}: {}",
                        R::TABLE,
                        line_num + 1,
                        e
                    );
                }
            }
        }

        Ok(rows)
    }

    /// Atomically replace a table with `rows`
    fn write_rows<R: Record>(&self, rows: &[R]) -> Result<()> {
        let path = self.table_path(R::TABLE);
        let temp = NamedTempFile::new_in(&self.root)?;

        {
            let mut writer = BufWriter::new(temp.as_file());
            for row in rows {
                serde_json::to_writer(&mut writer, row)?;
                writer.write_all(b"\n")?;
            }
            writer.flush()?;
        }

        temp.as_file().sync_all()?;
        temp.persist(&path).map_err(|e| Error::Io(e.error))?;
        Ok(())
    }

    /// Rewrite a table after mutating the row with `id`
    fn modify<R, F>(&self, id: Uuid, f: F) -> Result<()>
    where
        R: Record,
        F: FnOnce(&mut Vec<R>, usize),
    {
        let _lock = self.lock(true)?;
        let mut rows = self.read_rows::<R>()?;
        let idx = rows
            .iter()
            .position(|r| r.id() == Some(id))
            .ok_or_else(|| Error::NotFound(format!("{} row {}", R::TABLE, id)))?;

        f(&mut rows, idx);
        self.write_rows(&rows)
    }
}

/// True when the file has content that doesn't end in a newline
fn has_torn_tail(file: &mut File) -> Result<bool> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}

impl Gateway for JsonlStore {
    fn select<R: Record>(&self) -> Result<Vec<R>> {
        let _lock = self.lock(false)?;
        let rows = self.read_rows::<R>()?;
        tracing::debug!("Read {} rows from {}", rows.len(), R::TABLE);
        Ok(rows)
    }

    fn insert<R: Record>(&self, mut row: R) -> Result<R> {
        if row.id().is_none() {
            row.set_id(Uuid::new_v4());
        }

        let _lock = self.lock(true)?;
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(self.table_path(R::TABLE))?;

        let mut line = serde_json::to_string(&row)?;
        line.push('\n');
        // Keep a previously torn line from swallowing this one.
        if has_torn_tail(&mut file)? {
            line.insert(0, '\n');
        }

        let mut writer = BufWriter::new(&file);
        writer.write_all(line.as_bytes())?;
        writer.flush()?;

        tracing::debug!("Inserted row {:?} into {}", row.id(), R::TABLE);
        Ok(row)
    }

    fn update<R: Record>(&self, id: Uuid, patch: &R::Patch) -> Result<()> {
        self.modify::<R, _>(id, |rows, idx| rows[idx].apply(patch))?;
        tracing::debug!("Updated row {} in {}: {:?}", id, R::TABLE, patch);
        Ok(())
    }

    fn delete<R: Record>(&self, id: Uuid) -> Result<()> {
        self.modify::<R, _>(id, |rows, idx| {
            rows.remove(idx);
        })?;
        tracing::debug!("Deleted row {} from {}", id, R::TABLE);
        Ok(())
    }
}
