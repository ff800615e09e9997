//! # Meal Kiosk Core Library
//!
//! This crate is the core of a meal capture kiosk. It pairs an RGB-D snapshot
//! with a weight measurement for one user and meal, stores it locally, and
//! uploads it to a remote service. It also supports field calibration of the
//! weight sensor. User interface, LEDs and vendor device drivers live outside
//! and plug in through the traits in `hardware::capabilities`.
//!
//! ## Crate Structure
//!
//! - **`acquisition`**: Background producer threads for the depth camera
//!   (`SensorStream`) and the load cell (`WeightPoller`), composed into a
//!   `SensorHub`.
//! - **`capture`**: The `CaptureSession` state machine and `CaptureRecord`.
//! - **`calibration`**: Trimmed-mean statistics, keypad entry and the
//!   `CalibrationRoutine` state machine.
//! - **`upload`**: The bounded `UploadQueue` and the HTTP `Uploader`.
//! - **`storage`**: RGBD `.npz` containers and the per-day durable JSON log.
//! - **`config`** / **`config_store`**: Figment-loaded configuration and the
//!   writable store calibration persists into.
//! - **`error`**: The `KioskError` enum for centralized error handling.
//! - **`logging`**: tracing-subscriber initialisation.
//! - **`hardware`**: Device capability traits and mock devices.
//! - **`kiosk`**: The composition root owning start-up and shutdown order.

pub mod acquisition;
pub mod calibration;
pub mod capture;
pub mod config;
pub mod config_store;
pub mod error;
pub mod hardware;
pub mod kiosk;
pub mod logging;
pub mod storage;
pub mod upload;

pub use error::{AppResult, KioskError};
pub use kiosk::Kiosk;
