use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};

pub const TASKS_KEY: &str = "tasks";
pub const NOTES_KEY: &str = "quickNotes";

/// Whole-value key-value persistence.
///
/// `save` replaces the value atomically; a reader never observes a partial
/// write.
pub trait Storage {
    fn load(&self, key: &str) -> StoreResult<Option<String>>;
    fn save(&mut self, key: &str, value: &str) -> StoreResult<()>;
}

/// One `<key>.json` file per key inside a data directory.
#[derive(Debug, Clone)]
pub struct FileStorage {
    pub data_dir: PathBuf,
}

impl FileStorage {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        info!(data_dir = %data_dir.display(), "opened file storage");
        Ok(Self { data_dir })
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.data_dir.join(format!("{key}.json"))
    }
}

impl Storage for FileStorage {
    #[tracing::instrument(skip(self))]
    fn load(&self, key: &str) -> StoreResult<Option<String>> {
        let path = self.path_for(key);
        if !path.exists() {
            debug!(file = %path.display(), "storage key absent");
            return Ok(None);
        }

        let raw = fs::read_to_string(&path)
            .map_err(|err| StoreError::persistence(key, format!("{}: {err}", path.display())))?;
        debug!(file = %path.display(), bytes = raw.len(), "loaded storage key");
        Ok(Some(raw))
    }

    #[tracing::instrument(skip(self, value))]
    fn save(&mut self, key: &str, value: &str) -> StoreResult<()> {
        let path = self.path_for(key);
        debug!(file = %path.display(), bytes = value.len(), "saving storage key atomically");
        write_atomic(&path, value).map_err(|err| StoreError::persistence(key, format!("{err:#}")))
    }
}

fn write_atomic(path: &Path, value: &str) -> anyhow::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)
        .with_context(|| format!("failed to create temp file in {}", dir.display()))?;
    temp.write_all(value.as_bytes())?;
    temp.flush()?;
    temp.persist(path)
        .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;
    Ok(())
}

/// In-process storage. Writes can be made to fail to exercise persistence
/// error handling.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    values: HashMap<String, String>,
    fail_writes: bool,
    writes: usize,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(mut self, key: &str, value: &str) -> Self {
        self.values.insert(key.to_string(), value.to_string());
        self
    }

    pub fn set_fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }

    /// Number of successful `save` calls.
    pub fn write_count(&self) -> usize {
        self.writes
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

impl Storage for MemoryStorage {
    fn load(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.values.get(key).cloned())
    }

    fn save(&mut self, key: &str, value: &str) -> StoreResult<()> {
        if self.fail_writes {
            return Err(StoreError::persistence(key, "quota exceeded"));
        }
        self.values.insert(key.to_string(), value.to_string());
        self.writes += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::{FileStorage, MemoryStorage, Storage, TASKS_KEY};

    #[test]
    fn file_storage_roundtrip_and_absent_key() {
        let temp = tempdir().expect("tempdir");
        let mut storage = FileStorage::open(&temp.path().join("data")).expect("open storage");

        assert_eq!(storage.load(TASKS_KEY).expect("load absent"), None);

        storage.save(TASKS_KEY, "[]").expect("save");
        storage.save(TASKS_KEY, "[1]").expect("overwrite");
        assert_eq!(
            storage.load(TASKS_KEY).expect("load").as_deref(),
            Some("[1]")
        );
        assert!(storage.path_for(TASKS_KEY).exists());
    }

    #[test]
    fn memory_storage_failing_writes_keep_old_value() {
        let mut storage = MemoryStorage::new().with_value(TASKS_KEY, "[]");
        storage.set_fail_writes(true);

        let err = storage.save(TASKS_KEY, "[1]").expect_err("write must fail");
        assert!(err.is_persistence());
        assert_eq!(storage.get(TASKS_KEY), Some("[]"));
        assert_eq!(storage.write_count(), 0);
    }
}
