use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::error::{StoreError, StoreResult};

/// Where a `Database` keeps its serialized state.
///
/// The whole database is one JSON object of tables. `read` returns `None`
/// while nothing has been written yet.
pub trait Storage: Send {
    fn read(&mut self) -> StoreResult<Option<Value>>;

    fn write(&mut self, data: &Value) -> StoreResult<()>;

    fn close(&mut self) -> StoreResult<()> {
        Ok(())
    }
}

/// JSON file storage. The file is re-read on every `read`, so several handles
/// on the same path observe each other's writes.
#[derive(Debug)]
pub struct JsonStorage {
    path: PathBuf,
    pretty: bool,
    read_only: bool,
}

impl JsonStorage {
    /// Open (creating the file unless `read_only`) the storage at `path`.
    pub fn open(path: &Path, create_dirs: bool, pretty: bool, read_only: bool) -> StoreResult<Self> {
        if read_only {
            // surface a missing file now rather than on first read
            fs::metadata(path)?;
        } else {
            if create_dirs {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    fs::create_dir_all(parent)?;
                }
            }
            OpenOptions::new().create(true).append(true).open(path)?;
        }

        Ok(JsonStorage {
            path: path.to_path_buf(),
            pretty,
            read_only,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Storage for JsonStorage {
    fn read(&mut self) -> StoreResult<Option<Value>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        if contents.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&contents)?))
    }

    fn write(&mut self, data: &Value) -> StoreResult<()> {
        if self.read_only {
            return Err(StoreError::ReadOnly);
        }
        let bytes = if self.pretty {
            serde_json::to_vec_pretty(data)?
        } else {
            serde_json::to_vec(data)?
        };
        fs::write(&self.path, bytes)?;
        Ok(())
    }
}

/// Storage that keeps the state in memory for the lifetime of the handle.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    data: Option<Value>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        MemoryStorage { data: None }
    }
}

impl Storage for MemoryStorage {
    fn read(&mut self) -> StoreResult<Option<Value>> {
        Ok(self.data.clone())
    }

    fn write(&mut self, data: &Value) -> StoreResult<()> {
        self.data = Some(data.clone());
        Ok(())
    }
}
