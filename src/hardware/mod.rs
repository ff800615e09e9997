//! Hardware Abstraction
//!
//! Capability traits for the kiosk's two devices plus simulated implementations.

pub mod capabilities;
pub mod mock;

pub use capabilities::{CameraIntrinsics, ColorOrder, DepthSource, LoadCell, RawFramePair, StreamProfile};
pub use mock::{MockDepthCamera, MockLoadCell};
