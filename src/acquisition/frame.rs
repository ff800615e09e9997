//! Published sensor values.

use chrono::{DateTime, Local};
use ndarray::{s, Array2, Array3};

use crate::error::{AppResult, KioskError};
use crate::hardware::capabilities::{CameraIntrinsics, ColorOrder, RawFramePair, StreamProfile};

/// One aligned color + depth pair, immutable once published.
#[derive(Debug, Clone)]
pub struct SensorFrame {
    /// H x W x 3 image, always RGB order
    pub rgb: Array3<u8>,
    /// H x W depth in device units
    pub depth: Array2<u16>,
    /// Device units to meters
    pub depth_scale: f32,
    /// Intrinsics of the aligned stream
    pub intrinsics: CameraIntrinsics,
    /// Wall-clock time the pair was received
    pub captured_at: DateTime<Local>,
    /// Monotonic index assigned by the stream, starting at 1
    pub sequence: u64,
}

impl SensorFrame {
    /// Build a frame from a device pair, normalising color to RGB.
    ///
    /// Fails if the color and depth images disagree on resolution or the color
    /// image does not have three channels.
    pub fn from_raw(
        pair: RawFramePair,
        profile: &StreamProfile,
        sequence: u64,
        captured_at: DateTime<Local>,
    ) -> AppResult<Self> {
        let (ch, cw, channels) = pair.color.dim();
        let (dh, dw) = pair.depth.dim();
        if channels != 3 || (ch, cw) != (dh, dw) {
            return Err(KioskError::SensorReadTransient(format!(
                "misaligned frame pair: color {}x{}x{}, depth {}x{}",
                ch, cw, channels, dh, dw
            )));
        }

        let rgb = match profile.color_order {
            ColorOrder::Rgb => pair.color,
            ColorOrder::Bgr => pair.color.slice(s![.., .., ..;-1]).to_owned(),
        };

        Ok(Self {
            rgb,
            depth: pair.depth,
            depth_scale: profile.depth_scale,
            intrinsics: profile.intrinsics,
            captured_at,
            sequence,
        })
    }

    /// (height, width)
    pub fn resolution(&self) -> (usize, usize) {
        self.depth.dim()
    }
}

/// One smoothed weight reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightSample {
    /// Weight in calibrated units
    pub value: f64,
    /// Wall-clock time of the reading
    pub captured_at: DateTime<Local>,
}
