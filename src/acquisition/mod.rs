//! Continuous sensor acquisition.
//!
//! Two long-lived producer threads feed the kiosk:
//!
//! - [`SensorStream`] polls the RGB-D camera and publishes the latest aligned
//!   frame pair.
//! - [`WeightPoller`] polls the load cell and publishes the latest smoothed
//!   weight.
//!
//! Both publish through a single-slot `tokio::sync::watch` channel, so readers
//! see either the previous or the new complete value and never block the
//! producer. [`SensorHub`] owns both and defines the shutdown order.

pub mod frame;
pub mod hub;
pub mod sensor_stream;
pub mod weight_poller;

pub use frame::{SensorFrame, WeightSample};
pub use hub::SensorHub;
pub use sensor_stream::SensorStream;
pub use weight_poller::{ScaleCalibration, WeightPoller};
