//! Per-day JSON log of committed captures.
//!
//! Each day folder holds one `data.json`: a single JSON object keyed by capture
//! file name. A merge reads the object, inserts or overwrites one key and
//! rewrites the file; unrelated keys are never removed. The log records that a
//! capture exists locally and is independent of the upload outcome.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{ser::PrettyFormatter, Map, Serializer, Value};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{AppResult, KioskError};

/// One log value, keyed by capture file name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DurableLogEntry {
    /// Who the meal belongs to
    pub user_id: u64,
    /// Weight at commit time
    pub weight: f64,
    /// Meal type, e.g. `before_meal`
    pub save_type: String,
    /// 1 once uploaded, 0 otherwise
    pub is_upload: u8,
}

/// Serialises merges so concurrent writers cannot lose each other's keys.
#[derive(Debug, Default)]
pub struct DurableLog {
    write_lock: Mutex<()>,
}

impl DurableLog {
    /// File name of the log inside a day folder.
    pub const FILE_NAME: &'static str = "data.json";

    /// Create a log handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Location of the log for `day_folder`.
    pub fn path_for(day_folder: &Path) -> PathBuf {
        day_folder.join(Self::FILE_NAME)
    }

    /// Insert or overwrite `key` in the log of `day_folder`.
    ///
    /// Creates the folder and the log if they do not exist.
    ///
    /// # Errors
    /// `DurableLog` if the existing file is not a JSON object or cannot be
    /// rewritten. An unreadable log is left untouched.
    pub fn merge(&self, day_folder: &Path, key: &str, entry: &DurableLogEntry) -> AppResult<()> {
        let path = Self::path_for(day_folder);
        let _guard = self.write_lock.lock();

        let mut object = load(&path)?;
        let value = serde_json::to_value(entry).map_err(|e| log_error(&path, e))?;
        object.insert(key.to_string(), value);

        fs::create_dir_all(day_folder).map_err(|e| log_error(&path, e))?;
        let mut buf = Vec::new();
        let mut ser = Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(b"    "));
        Value::Object(object)
            .serialize(&mut ser)
            .map_err(|e| log_error(&path, e))?;

        let partial = path.with_extension("json.partial");
        fs::write(&partial, &buf).map_err(|e| log_error(&path, e))?;
        fs::rename(&partial, &path).map_err(|e| log_error(&path, e))?;

        debug!(path = %path.display(), key, is_upload = entry.is_upload, "Durable log merged");
        Ok(())
    }

    /// Whole log object of `day_folder`; empty if no log exists yet.
    pub fn read(&self, day_folder: &Path) -> AppResult<Map<String, Value>> {
        load(&Self::path_for(day_folder))
    }

    /// Entry for `key`, if present.
    pub fn get(&self, day_folder: &Path, key: &str) -> AppResult<Option<DurableLogEntry>> {
        let path = Self::path_for(day_folder);
        match load(&path)?.remove(key) {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| log_error(&path, e)),
            None => Ok(None),
        }
    }
}

fn load(path: &Path) -> AppResult<Map<String, Value>> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Map::new()),
        Err(e) => return Err(log_error(path, e)),
    };
    if text.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str(&text).map_err(|e| log_error(path, e))? {
        Value::Object(object) => Ok(object),
        _ => Err(log_error(path, "top-level value is not an object")),
    }
}

fn log_error(path: &Path, err: impl std::fmt::Display) -> KioskError {
    KioskError::DurableLog {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}
