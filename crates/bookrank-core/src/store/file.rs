//! One-JSON-file-per-key persistent store.
//!
//! Entries live at `<dir>/<sha256(key)>.json`. Writes go to a sibling temp
//! file first and are renamed into place, so a reader never sees a half
//! written entry.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use super::{PersistentStore, StoreError, StoredEntry, now_epoch};
use crate::key::sha256_hex;

const ENTRY_SUFFIX: &str = ".json";
/// Left behind when a process dies between the write and the rename.
const TEMP_SUFFIX: &str = ".json.tmp";

#[derive(Serialize, Deserialize)]
struct FileRecord {
    key: String,
    written_at: u64,
    payload: String,
}

#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Use `dir` as the cache directory, creating it if needed.
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(dir)?;
        tracing::info!(dir = %dir.display(), "opened file cache");
        Ok(Self {
            dir: dir.to_path_buf(),
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}{}", sha256_hex(key), ENTRY_SUFFIX))
    }

    /// Files in the cache directory whose name ends with `suffix`.
    fn files_ending_with(&self, suffix: &str) -> Result<Vec<PathBuf>, StoreError> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let matches = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.ends_with(suffix));
            if matches && path.is_file() {
                files.push(path);
            }
        }
        Ok(files)
    }
}

impl PersistentStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<StoredEntry>, StoreError> {
        let text = match fs::read_to_string(self.entry_path(key)) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let record: FileRecord = serde_json::from_str(&text)?;
        if record.key != key {
            return Ok(None);
        }
        Ok(Some(StoredEntry {
            payload: record.payload,
            written_at: record.written_at,
        }))
    }

    fn set(&self, key: &str, payload: &str) -> Result<(), StoreError> {
        let record = FileRecord {
            key: key.to_string(),
            written_at: now_epoch(),
            payload: payload.to_string(),
        };
        let body = serde_json::to_vec(&record)?;
        let path = self.entry_path(key);
        let tmp = path.with_extension(TEMP_SUFFIX.trim_start_matches('.'));

        let _guard = self.write_lock.lock().map_err(|_| StoreError::Poisoned)?;
        fs::write(&tmp, body)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn len(&self) -> Result<usize, StoreError> {
        Ok(self.files_ending_with(ENTRY_SUFFIX)?.len())
    }

    fn clear(&self) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().map_err(|_| StoreError::Poisoned)?;
        let mut files = self.files_ending_with(ENTRY_SUFFIX)?;
        files.extend(self.files_ending_with(TEMP_SUFFIX)?);
        for path in files {
            match fs::remove_file(&path) {
                Err(e) if e.kind() != ErrorKind::NotFound => return Err(e.into()),
                _ => {}
            }
        }
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "file"
    }
}
