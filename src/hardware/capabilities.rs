//! Device Capabilities
//!
//! The kiosk talks to exactly two pieces of hardware, each behind a small trait:
//!
//! - `DepthSource`: an RGB-D camera delivering aligned color + depth frame pairs
//! - `LoadCell`: a weight sensor ADC exposing a raw reading primitive
//!
//! Vendor SDK bindings (camera pipeline, GPIO bit-banging) live outside this
//! crate and plug in by implementing these traits. `hardware::mock` provides
//! simulated implementations for tests and the demo CLI.
//!
//! # Design Philosophy
//!
//! Both traits are blocking and take `&mut self`: each device is owned by a
//! single dedicated acquisition thread, and the underlying SDK calls block
//! (frame waits, ADC conversions). Errors use `anyhow::Result`; the acquisition
//! layer classifies them into `KioskError`.

use anyhow::Result;
use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};

/// Pixel ordering of the color stream as delivered by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColorOrder {
    /// Red, green, blue
    Rgb,
    /// Blue, green, red (RealSense `bgr8`)
    Bgr,
}

/// Pinhole intrinsics of the stream the depth image is aligned to.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    /// Focal length in pixels, x axis
    pub fx: f32,
    /// Focal length in pixels, y axis
    pub fy: f32,
    /// Principal point, x
    pub ppx: f32,
    /// Principal point, y
    pub ppy: f32,
}

impl CameraIntrinsics {
    /// Focal length x assumed by readers when a container does not carry one.
    pub const DEFAULT_FX: f32 = 615.464_233_398_437_5;
    /// Focal length y assumed by readers when a container does not carry one.
    pub const DEFAULT_FY: f32 = 615.414_489_746_093_8;
}

impl Default for CameraIntrinsics {
    fn default() -> Self {
        Self {
            fx: Self::DEFAULT_FX,
            fy: Self::DEFAULT_FY,
            ppx: 320.0,
            ppy: 240.0,
        }
    }
}

/// Static description of an opened RGB-D stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamProfile {
    /// Human readable device name
    pub device_name: String,
    /// Whether a color sensor is present and streaming
    pub has_color: bool,
    /// Whether a depth sensor is present and streaming
    pub has_depth: bool,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Ordering of color channels in delivered frames
    pub color_order: ColorOrder,
    /// Multiply raw depth values by this to obtain meters
    pub depth_scale: f32,
    /// Intrinsics of the aligned stream
    pub intrinsics: CameraIntrinsics,
}

/// One aligned frame pair as delivered by the device.
#[derive(Debug, Clone)]
pub struct RawFramePair {
    /// H x W x 3 color image in the device's `ColorOrder`
    pub color: Array3<u8>,
    /// H x W depth image in device units
    pub depth: Array2<u16>,
}

/// Capability: RGB-D Frame Source
///
/// # Contract
/// - `profile()` is fixed once the device is open
/// - `read_frames()` blocks until the next coherent pair or a bounded timeout;
///   `Ok(None)` means the device delivered an incomplete pair (skip it)
/// - `read_frames()` errors are treated as transient by the caller
/// - `close()` releases the device pipeline; it is called exactly once, after
///   the acquisition loop has exited
pub trait DepthSource: Send {
    /// Describe the opened stream
    fn profile(&self) -> &StreamProfile;

    /// Wait for the next aligned frame pair
    fn read_frames(&mut self) -> Result<Option<RawFramePair>>;

    /// Release the underlying device handle
    fn close(&mut self) -> Result<()>;
}

/// Capability: Load Cell Readout
///
/// # Contract
/// - `read_raw()` performs one ADC conversion and returns raw counts
///   (offset and scale are applied by the caller, not the device)
/// - Reads are slow (tens of milliseconds) and blocking
/// - `close()` releases GPIO lines; called once at shutdown
pub trait LoadCell: Send {
    /// Read one raw sample in ADC counts
    fn read_raw(&mut self) -> Result<f64>;

    /// Power-cycle the ADC between readings
    ///
    /// # Default Implementation
    /// Does nothing; devices that need it override.
    fn power_cycle(&mut self) -> Result<()> {
        Ok(())
    }

    /// Release the underlying device handle
    ///
    /// # Default Implementation
    /// Does nothing.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
