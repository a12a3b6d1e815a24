use std::{
    collections::BTreeMap,
    fs::{self, File, OpenOptions, TryLockError},
    io::ErrorKind,
    path::{Path, PathBuf},
};

use log::debug;

use crate::error::StoreError;

pub type Record = BTreeMap<String, String>;

/// Exclusive ownership of a store, released on drop.
#[derive(Debug)]
pub struct StoreLock {
    _file: Option<File>,
}

/// Where the game record lives between invocations.
pub trait StateStore: Send {
    /// Returns the stored record, or an empty one when nothing was saved yet.
    fn load(&self) -> Result<Record, StoreError>;

    fn save(&mut self, record: &Record) -> Result<(), StoreError>;

    /// Takes the lock shared by every process using this store, without waiting.
    /// `None` means somebody else holds it.
    fn try_lock(&self) -> Result<Option<StoreLock>, StoreError>;
}

/// Keeps the record as a JSON object in a single file.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl AsRef<Path>) -> JsonFileStore {
        JsonFileStore {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// The lock file sits next to the state file: `state.json` is guarded by `state.json.lock`.
    fn lock_path(&self) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(".lock");
        PathBuf::from(name)
    }
}

impl StateStore for JsonFileStore {
    fn load(&self) -> Result<Record, StoreError> {
        match fs::read_to_string(&self.path) {
            Ok(text) if text.trim().is_empty() => Ok(Record::new()),
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("no state file at {}, starting empty", self.path.display());
                Ok(Record::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn save(&mut self, record: &Record) -> Result<(), StoreError> {
        // write-then-rename so a crash never leaves a half-written record
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_string_pretty(record)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn try_lock(&self) -> Result<Option<StoreLock>, StoreError> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(self.lock_path())?;
        match file.try_lock() {
            Ok(()) => Ok(Some(StoreLock { _file: Some(file) })),
            Err(TryLockError::WouldBlock) => {
                debug!("{} is held by another process", self.lock_path().display());
                Ok(None)
            }
            Err(TryLockError::Error(e)) => Err(e.into()),
        }
    }
}

/// Store used by the coordinator tests.
#[cfg(test)]
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    record: Record,
    saves: usize,
}

#[cfg(test)]
impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }

    /// Number of `save` calls so far.
    pub fn saves(&self) -> usize {
        self.saves
    }
}

#[cfg(test)]
impl StateStore for MemoryStore {
    fn load(&self) -> Result<Record, StoreError> {
        Ok(self.record.clone())
    }

    fn save(&mut self, record: &Record) -> Result<(), StoreError> {
        self.record = record.clone();
        self.saves += 1;
        Ok(())
    }

    fn try_lock(&self) -> Result<Option<StoreLock>, StoreError> {
        Ok(Some(StoreLock { _file: None }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path() -> PathBuf {
        std::env::temp_dir().join(format!("mail-chess-{}.json", uuid::Uuid::new_v4()))
    }

    #[test]
    fn file_store_round_trips() {
        let path = temp_path();
        let mut store = JsonFileStore::new(&path);
        assert!(store.load().unwrap().is_empty());

        let mut record = Record::new();
        record.insert("position".into(), "8/8/8/8/8/8/8/K6k w - - 0 1".into());
        record.insert("paused".into(), "true".into());
        store.save(&record).unwrap();

        let again = JsonFileStore::new(&path);
        assert_eq!(again.load().unwrap(), record);
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn file_store_reports_garbage() {
        let path = temp_path();
        fs::write(&path, "{not json").unwrap();
        let store = JsonFileStore::new(&path);
        assert!(matches!(store.load(), Err(StoreError::Format(_))));
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn lock_excludes_a_second_opener_until_dropped() {
        let path = temp_path();
        let first = JsonFileStore::new(&path);
        let second = JsonFileStore::new(&path);

        let held = first.try_lock().unwrap();
        assert!(held.is_some());
        assert!(second.try_lock().unwrap().is_none());
        // the state file itself is untouched
        assert!(first.load().unwrap().is_empty());

        drop(held);
        assert!(second.try_lock().unwrap().is_some());
        fs::remove_file(second.lock_path()).unwrap();
    }

    #[test]
    fn memory_store_counts_saves() {
        let mut store = MemoryStore::new();
        store.save(&Record::new()).unwrap();
        store.save(&Record::new()).unwrap();
        assert_eq!(store.saves(), 2);
    }
}
