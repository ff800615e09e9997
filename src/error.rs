//! Custom error types for the kiosk core.
//!
//! `KioskError` is the single error type returned across module boundaries.
//! Using the `thiserror` crate, it provides a centralized and consistent way to
//! report what went wrong during sensor setup, capture, calibration and upload.
//!
//! ## Error Hierarchy
//!
//! Errors fall into three propagation classes:
//!
//! 1. **Startup errors** - `SensorInitFailure`, `Config`, `Configuration`
//!    - Occur while wiring devices and loading configuration
//!    - Must surface to the caller before any background thread starts
//!
//! 2. **Isolated errors** - `SensorReadTransient`, `NetworkFailure`, `NonSuccessStatus`
//!    - Occur inside a background unit (poll loop, upload task)
//!    - Logged where they happen; they never unwind into the control loop
//!
//! 3. **Caller errors** - `SessionBusy`, `SensorNotReady`, `FileWriteFailure`,
//!    `CalibrationInvalidInput`, `DivideByZeroGuard`, ...
//!    - Returned synchronously to whoever initiated the operation so the UI
//!      layer can show a message
//!
//! By using `#[from]`, `KioskError` can be created from underlying error types,
//! simplifying error handling with the `?` operator.

use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias for results using the kiosk error type.
pub type AppResult<T> = std::result::Result<T, KioskError>;

/// Primary error type for the kiosk core.
#[derive(Error, Debug)]
pub enum KioskError {
    /// No usable depth/color capability was found when opening the camera.
    ///
    /// Fatal at construction time; no acquisition thread is started.
    #[error("Sensor initialisation failed: {0}")]
    SensorInitFailure(String),

    /// A single device read failed. The poll loop logs it and keeps going,
    /// so "latest" simply stays stale.
    #[error("Transient sensor read failure: {0}")]
    SensorReadTransient(String),

    /// A capture was requested while another one is still committing.
    #[error("Capture session is busy committing another capture")]
    SessionBusy,

    /// `commit()` was called without a preceding `begin()`.
    #[error("No capture is pending; call begin() first")]
    SessionIdle,

    /// The reservation made by `begin()` was already committed directly, so
    /// its scheduled commit has nothing to do.
    #[error("Capture was already committed before its settle delay elapsed")]
    CaptureAlreadyCommitted,

    /// Commit happened before the first frame was published.
    #[error("Sensors not ready: no frame has been captured yet")]
    SensorNotReady,

    /// The meal type cannot be embedded in a file name.
    #[error("Invalid meal type '{0}': use letters, digits, '_' or '-'")]
    InvalidMealType(String),

    /// A background task panicked or was cancelled before reporting.
    #[error("Background task failed: {0}")]
    TaskFailed(String),

    /// The RGBD container for a capture could not be written.
    ///
    /// Fatal for the current capture only.
    #[error("Failed to write capture file '{path}': {message}")]
    FileWriteFailure {
        /// Target path of the container
        path: PathBuf,
        /// Underlying cause
        message: String,
    },

    /// The RGBD container could not be read or is missing required fields.
    #[error("RGBD container error: {0}")]
    Container(String),

    /// The per-day JSON log could not be read, parsed or rewritten.
    #[error("Durable log error at '{path}': {message}")]
    DurableLog {
        /// Path of `data.json`
        path: PathBuf,
        /// Underlying cause
        message: String,
    },

    /// The upload request failed before a response was received.
    #[error("Network failure: {0}")]
    NetworkFailure(String),

    /// The upload endpoint answered with something other than HTTP 200.
    #[error("Upload rejected with HTTP status {0}")]
    NonSuccessStatus(u16),

    /// Operator entered an unusable calibration weight.
    #[error("Invalid calibration input: {0}")]
    CalibrationInvalidInput(String),

    /// The reference unit computation was attempted with a zero object weight.
    #[error("Refusing to divide by a zero object weight")]
    DivideByZeroGuard,

    /// Calibration produced a reference unit that cannot be applied.
    #[error("Calibration produced an invalid reference unit: {0}")]
    CalibrationInvalidResult(String),

    /// The requested calibration step does not apply to the current phase.
    #[error("Calibration operation not allowed: {0}")]
    CalibrationState(String),

    /// Configuration file parsing failed.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration values parsed but failed semantic validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Standard I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for KioskError {
    fn from(err: figment::Error) -> Self {
        KioskError::Config(Box::new(err))
    }
}

impl KioskError {
    /// Whether the operator can simply retry the action that produced this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            KioskError::SessionBusy
                | KioskError::SensorNotReady
                | KioskError::SensorReadTransient(_)
                | KioskError::NetworkFailure(_)
                | KioskError::NonSuccessStatus(_)
                | KioskError::CalibrationInvalidInput(_)
        )
    }
}
