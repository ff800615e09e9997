//! Field calibration of the load cell.
//!
//! - [`stats`]: trimmed mean and the reference unit formula
//! - [`keypad`]: operator entry of the reference object's weight
//! - [`routine`]: the multi-phase sampling state machine

pub mod keypad;
pub mod routine;
pub mod stats;

pub use keypad::{Key, Keypad};
pub use routine::{CalibrationEvent, CalibrationPhase, CalibrationRoutine, CalibrationState};
pub use stats::{compute_reference_unit, trimmed_mean};
