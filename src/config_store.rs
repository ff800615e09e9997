//! Writable key-value configuration.
//!
//! Calibration writes its result back into the kiosk configuration so the next
//! start picks it up. The store is deliberately narrow: sections of scalar keys.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use toml_edit::DocumentMut;
use tracing::info;

use crate::error::{AppResult, KioskError};

/// Sectioned scalar configuration that can be updated at runtime.
pub trait ConfigStore: Send + Sync {
    /// Read `section.key`, `None` if unset.
    fn get_f64(&self, section: &str, key: &str) -> AppResult<Option<f64>>;

    /// Persist `section.key = value`, keeping every other key.
    fn set_f64(&self, section: &str, key: &str, value: f64) -> AppResult<()>;
}

/// [`ConfigStore`] backed by a TOML file, normally `config/config.toml`.
#[derive(Debug)]
pub struct TomlConfigStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl TomlConfigStore {
    /// Store editing `path`; the file is created on first write if missing.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// The backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> AppResult<toml::Table> {
        match fs::read_to_string(&self.path) {
            Ok(text) => text.parse::<toml::Table>().map_err(|e| {
                KioskError::Configuration(format!("{}: {}", self.path.display(), e))
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(toml::Table::new()),
            Err(e) => Err(e.into()),
        }
    }
}

impl ConfigStore for TomlConfigStore {
    fn get_f64(&self, section: &str, key: &str) -> AppResult<Option<f64>> {
        let table = self.load()?;
        Ok(table
            .get(section)
            .and_then(|s| s.get(key))
            .and_then(|v| v.as_float().or_else(|| v.as_integer().map(|i| i as f64))))
    }

    fn set_f64(&self, section: &str, key: &str, value: f64) -> AppResult<()> {
        let _guard = self.write_lock.lock();
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };
        let mut doc = text
            .parse::<DocumentMut>()
            .map_err(|e| KioskError::Configuration(format!("{}: {}", self.path.display(), e)))?;

        if doc.get(section).is_some_and(|item| !item.is_table_like()) {
            return Err(KioskError::Configuration(format!(
                "'{}' in {} is not a table",
                section,
                self.path.display()
            )));
        }
        doc[section][key] = toml_edit::value(value);

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        // Comments and layout survive; the rename keeps the old file intact until the new one is complete
        let partial = self.path.with_extension("toml.partial");
        fs::write(&partial, doc.to_string())?;
        fs::rename(&partial, &self.path)?;

        info!(path = %self.path.display(), section, key, value, "Configuration updated");
        Ok(())
    }
}

/// In-memory [`ConfigStore`] for demos and tests.
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    values: Mutex<HashMap<(String, String), f64>>,
}

impl MemoryConfigStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConfigStore for MemoryConfigStore {
    fn get_f64(&self, section: &str, key: &str) -> AppResult<Option<f64>> {
        Ok(self
            .values
            .lock()
            .get(&(section.to_string(), key.to_string()))
            .copied())
    }

    fn set_f64(&self, section: &str, key: &str, value: f64) -> AppResult<()> {
        self.values
            .lock()
            .insert((section.to_string(), key.to_string()), value);
        Ok(())
    }
}
