//! Capture records and naming.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{AppResult, KioskError};
use crate::storage::DurableLogEntry;

/// Remote upload state of a capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    /// Queued or in flight
    Pending,
    /// Endpoint answered HTTP 200
    Success,
    /// Any other status or a network error
    Failed,
}

/// The person a capture belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Server-side user id
    pub id: u64,
    /// Display name
    #[serde(default)]
    pub name: String,
}

impl User {
    /// User with an id and no display name.
    pub fn with_id(id: u64) -> Self {
        Self {
            id,
            name: String::new(),
        }
    }
}

/// One committed capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureRecord {
    /// Owner of the meal
    pub user_id: u64,
    /// Meal type, e.g. `before_meal`
    pub meal_type: String,
    /// Weight at commit time
    pub weight: f64,
    /// Local date of the capture
    pub meal_date: NaiveDate,
    /// Full path of the RGBD container
    pub file_path: PathBuf,
    /// `{YYYYMMDDHHMMSS}_{user_id}_{meal_type}`, also the durable log key
    pub file_name: String,
    /// Upload state
    pub upload_status: UploadStatus,
}

impl CaptureRecord {
    /// Durable log value for this record.
    pub fn log_entry(&self) -> DurableLogEntry {
        DurableLogEntry {
            user_id: self.user_id,
            weight: self.weight,
            save_type: self.meal_type.clone(),
            is_upload: u8::from(self.upload_status == UploadStatus::Success),
        }
    }

    /// Name of the container file including its extension.
    pub fn container_file_name(&self) -> String {
        self.file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.file_name.clone())
    }
}

/// `{YYYYMMDDHHMMSS}_{user_id}_{meal_type}`.
///
/// Second resolution: two captures of the same user and type within one second
/// share a name and the later one replaces the earlier.
pub fn capture_file_name(at: NaiveDateTime, user_id: u64, meal_type: &str) -> String {
    format!("{}_{}_{}", at.format("%Y%m%d%H%M%S"), user_id, meal_type)
}

/// `{save_dir}/{YYYYMMDD}`.
pub fn day_folder(save_dir: &Path, date: NaiveDate) -> PathBuf {
    save_dir.join(date.format("%Y%m%d").to_string())
}

/// Accept only meal types that are safe inside a file name.
pub fn validate_meal_type(meal_type: &str) -> AppResult<()> {
    let valid = !meal_type.is_empty()
        && meal_type
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(KioskError::InvalidMealType(meal_type.to_string()))
    }
}
