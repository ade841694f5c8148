//! Local key-value settings, independent of the gateway.
//!
//! Values are stored as one JSON object in `settings.json` and written
//! atomically. Writers hold an fs2 lock on `settings.json.lock` while they
//! re-read, change and replace the file, so handles in different processes
//! only ever overwrite the key they change. Subscribers registered for a key
//! are called after every successful change to it.

use crate::{Error, Result};
use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

type Subscriber = Box<dyn FnMut(Option<&Value>)>;

/// Typed settings persisted to a JSON file
pub struct Settings {
    path: PathBuf,
    values: BTreeMap<String, Value>,
    subscribers: HashMap<String, Vec<Subscriber>>,
}

impl Settings {
    /// Open the settings file at `path`.
    ///
    /// A missing file gives empty settings. An unreadable or corrupt file is
    /// logged and also treated as empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let values = load_values(&path);
        Self {
            path,
            values,
            subscribers: HashMap::new(),
        }
    }

    /// Settings at `<data_dir>/settings.json`
    pub fn in_data_dir(data_dir: &Path) -> Self {
        Self::open(data_dir.join("settings.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn get_raw(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Read a value; `Ok(None)` when unset, an error when it has another shape
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.values.get(key) {
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            None => Ok(None),
        }
    }

    /// Store a value, then notify subscribers of `key`
    pub fn set<T: Serialize>(&mut self, key: &str, value: &T) -> Result<()> {
        if key.trim().is_empty() {
            return Err(Error::Validation("setting key must not be blank".into()));
        }
        let value = serde_json::to_value(value)?;

        let stored = value.clone();
        self.update(|values| {
            values.insert(key.to_string(), stored);
            true
        })?;

        self.notify(key, Some(&value));
        Ok(())
    }

    /// Remove a key; returns whether it was set
    pub fn remove(&mut self, key: &str) -> Result<bool> {
        let removed = self.update(|values| values.remove(key).is_some())?;
        if removed {
            self.notify(key, None);
        }
        Ok(removed)
    }

    /// Call `callback` with the new value (or `None` on removal) whenever `key` changes
    pub fn subscribe<F>(&mut self, key: &str, callback: F)
    where
        F: FnMut(Option<&Value>) + 'static,
    {
        self.subscribers
            .entry(key.to_string())
            .or_default()
            .push(Box::new(callback));
    }

    fn notify(&mut self, key: &str, value: Option<&Value>) {
        if let Some(callbacks) = self.subscribers.get_mut(key) {
            for callback in callbacks.iter_mut() {
                callback(value);
            }
        }
    }

    /// Re-read the file, apply `change` and write it back, all under the
    /// exclusive settings lock. `change` returns whether anything changed.
    ///
    /// Memory is only replaced once the write has succeeded.
    fn update<F>(&mut self, change: F) -> Result<bool>
    where
        F: FnOnce(&mut BTreeMap<String, Value>) -> bool,
    {
        let parent = self.path.parent().ok_or_else(|| {
            Error::Config(format!("settings path {:?} has no parent", self.path))
        })?;
        std::fs::create_dir_all(parent)?;

        let _lock = SettingsLock::acquire(&self.path, true)?;
        let mut values = read_values(&self.path);
        let changed = change(&mut values);
        if changed {
            write_values(&self.path, &values)?;
        }

        self.values = values;
        Ok(changed)
    }
}

/// Lock on `<settings>.lock`, released on drop.
///
/// The settings file itself is replaced on every save, so it can't carry
/// the lock.
struct SettingsLock {
    file: File,
}

impl SettingsLock {
    fn acquire(settings_path: &Path, exclusive: bool) -> Result<Self> {
        let mut lock_path = settings_path.as_os_str().to_owned();
        lock_path.push(".lock");

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(PathBuf::from(lock_path))?;

        if exclusive {
            file.lock_exclusive()?;
        } else {
            file.lock_shared()?;
        }
        Ok(Self { file })
    }
}

impl Drop for SettingsLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

fn load_values(path: &Path) -> BTreeMap<String, Value> {
    if !path.exists() {
        return BTreeMap::new();
    }

    let _lock = match SettingsLock::acquire(path, false) {
        Ok(lock) => Some(lock),
        Err(e) => {
            tracing::warn!("Unable to lock settings {:?}: {}. Reading unlocked.", path, e);
            None
        }
    };
    read_values(path)
}

/// Parse the settings file; the caller holds the lock
fn read_values(path: &Path) -> BTreeMap<String, Value> {
    let mut contents = String::new();
    match File::open(path) {
        Ok(file) => {
            if let Err(e) = std::io::BufReader::new(file).read_to_string(&mut contents) {
                tracing::warn!("Failed to read settings {:?}: {}. Using defaults.", path, e);
                return BTreeMap::new();
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return BTreeMap::new(),
        Err(e) => {
            tracing::warn!("Unable to open settings {:?}: {}. Using defaults.", path, e);
            return BTreeMap::new();
        }
    }

    match serde_json::from_str(&contents) {
        Ok(values) => values,
        Err(e) => {
            tracing::warn!("Failed to parse settings {:?}: {}. Using defaults.", path, e);
            BTreeMap::new()
        }
    }
}

/// Atomically replace the settings file; the caller holds the lock
fn write_values(path: &Path, values: &BTreeMap<String, Value>) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| Error::Config(format!("settings path {:?} has no parent", path)))?;
    let temp = NamedTempFile::new_in(parent)?;

    {
        let mut writer = std::io::BufWriter::new(temp.as_file());
        serde_json::to_writer_pretty(&mut writer, values)?;
        writer.flush()?;
    }

    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| Error::Io(e.error))?;

    tracing::debug!("Saved settings to {:?}", path);
    Ok(())
}
