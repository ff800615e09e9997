//! Local persistence: RGBD capture containers and the per-day durable log.

pub mod durable_log;
pub mod rgbd;

pub use durable_log::{DurableLog, DurableLogEntry};
pub use rgbd::{read_container, write_container, RgbdContainer};
