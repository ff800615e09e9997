//! Mock Hardware Implementations
//!
//! Simulated devices for testing without physical hardware. Both mocks hand out
//! a cloneable handle so a test can steer or inspect the device after it has
//! been moved into an acquisition thread.
//!
//! # Available Mocks
//!
//! - `MockDepthCamera` - Simulated RGB-D camera (BGR color, 16-bit depth)
//! - `MockLoadCell` - Simulated load cell with a settable physical load
//!
//! # Performance Characteristics
//!
//! - MockDepthCamera: 33ms frame interval (30fps simulation)
//! - MockLoadCell: no conversion delay unless configured

use anyhow::{anyhow, Result};
use ndarray::{Array2, Array3};
use parking_lot::Mutex;
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::debug;

use crate::hardware::capabilities::{
    CameraIntrinsics, ColorOrder, DepthSource, LoadCell, RawFramePair, StreamProfile,
};

// =============================================================================
// MockDepthCamera - Simulated RGB-D Camera
// =============================================================================

/// Shared view of a `MockDepthCamera` that stays usable after the camera has
/// been moved into a `SensorStream`.
#[derive(Clone, Default)]
pub struct MockCameraHandle {
    reads: Arc<AtomicU64>,
    closed: Arc<AtomicBool>,
}

impl MockCameraHandle {
    /// Number of `read_frames` calls served so far
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    /// Whether `close()` has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Mock RGB-D camera producing a moving test pattern
///
/// # Example
///
/// ```rust,ignore
/// let camera = MockDepthCamera::new(64, 48).with_frame_interval(Duration::from_millis(5));
/// let handle = camera.handle();
/// let stream = SensorStream::new(Box::new(camera))?;
/// ```
pub struct MockDepthCamera {
    profile: StreamProfile,
    frame_interval: Duration,
    fail_every: Option<u64>,
    handle: MockCameraHandle,
}

impl MockDepthCamera {
    /// Create a mock camera with the given resolution
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            profile: StreamProfile {
                device_name: "Mock D435".to_string(),
                has_color: true,
                has_depth: true,
                width,
                height,
                color_order: ColorOrder::Bgr,
                depth_scale: 0.001,
                intrinsics: CameraIntrinsics {
                    ppx: width as f32 / 2.0,
                    ppy: height as f32 / 2.0,
                    ..CameraIntrinsics::default()
                },
            },
            frame_interval: Duration::from_millis(33),
            fail_every: None,
            handle: MockCameraHandle::default(),
        }
    }

    /// Simulate a depth-only device (no RGB sensor)
    pub fn without_color(mut self) -> Self {
        self.profile.has_color = false;
        self
    }

    /// Deliver color already in RGB order
    pub fn with_color_order(mut self, order: ColorOrder) -> Self {
        self.profile.color_order = order;
        self
    }

    /// Change the simulated frame period
    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    /// Make every `n`th read fail with a transient error
    pub fn fail_every(mut self, n: u64) -> Self {
        self.fail_every = Some(n.max(1));
        self
    }

    /// Get a handle for inspecting the camera from outside the stream
    pub fn handle(&self) -> MockCameraHandle {
        self.handle.clone()
    }

    fn pattern(&self, frame_num: u64) -> RawFramePair {
        let (w, h) = (self.profile.width as usize, self.profile.height as usize);
        let shift = frame_num as usize;
        // BGR: blue ramps with x, red ramps with y, green carries the frame number
        let color = Array3::from_shape_fn((h, w, 3), |(y, x, c)| match c {
            0 => ((x + shift) % 256) as u8,
            1 => (shift % 256) as u8,
            _ => (y % 256) as u8,
        });
        let depth = Array2::from_shape_fn((h, w), |(y, x)| (500 + x + y + shift % 100) as u16);
        RawFramePair { color, depth }
    }
}

impl Default for MockDepthCamera {
    fn default() -> Self {
        Self::new(640, 480)
    }
}

impl DepthSource for MockDepthCamera {
    fn profile(&self) -> &StreamProfile {
        &self.profile
    }

    fn read_frames(&mut self) -> Result<Option<RawFramePair>> {
        if self.handle.is_closed() {
            return Err(anyhow!("MockDepthCamera: pipeline closed"));
        }

        // Simulate frame readout time
        thread::sleep(self.frame_interval);

        let frame_num = self.handle.reads.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(n) = self.fail_every {
            if frame_num % n == 0 {
                return Err(anyhow!("MockDepthCamera: frame #{} timed out", frame_num));
            }
        }

        Ok(Some(self.pattern(frame_num)))
    }

    fn close(&mut self) -> Result<()> {
        debug!("MockDepthCamera: pipeline stopped");
        self.handle.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// =============================================================================
// MockLoadCell - Simulated Load Cell
// =============================================================================

/// Shared view of a `MockLoadCell` used to place or remove weight on the
/// simulated platform.
#[derive(Clone)]
pub struct MockScaleHandle {
    load: Arc<Mutex<f64>>,
    reads: Arc<AtomicU64>,
    closed: Arc<AtomicBool>,
}

impl MockScaleHandle {
    /// Set the physical load on the platform
    pub fn set_load(&self, load: f64) {
        *self.load.lock() = load;
    }

    /// Current physical load
    pub fn load(&self) -> f64 {
        *self.load.lock()
    }

    /// Number of raw reads served so far
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    /// Whether `close()` has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Mock load cell with linear response
///
/// Raw counts are `zero_counts + load * counts_per_unit`, optionally with
/// uniform noise and periodic spikes to exercise outlier rejection.
///
/// # Example
///
/// ```rust,ignore
/// let cell = MockLoadCell::new(8_000.0, 21.0);
/// let scale = cell.handle();
/// scale.set_load(500.0);
/// ```
pub struct MockLoadCell {
    zero_counts: f64,
    counts_per_unit: f64,
    noise: f64,
    spike_every: Option<(u64, f64)>,
    read_delay: Duration,
    connected: bool,
    handle: MockScaleHandle,
}

impl MockLoadCell {
    /// Create a mock load cell with the given zero offset and sensitivity
    pub fn new(zero_counts: f64, counts_per_unit: f64) -> Self {
        Self {
            zero_counts,
            counts_per_unit,
            noise: 0.0,
            spike_every: None,
            read_delay: Duration::ZERO,
            connected: true,
            handle: MockScaleHandle {
                load: Arc::new(Mutex::new(0.0)),
                reads: Arc::new(AtomicU64::new(0)),
                closed: Arc::new(AtomicBool::new(false)),
            },
        }
    }

    /// Simulate an unplugged sensor: every read fails
    pub fn disconnected() -> Self {
        let mut cell = Self::new(0.0, 1.0);
        cell.connected = false;
        cell
    }

    /// Add uniform noise of +/- `amplitude` counts to every read
    pub fn with_noise(mut self, amplitude: f64) -> Self {
        self.noise = amplitude.abs();
        self
    }

    /// Add `magnitude` counts to every `n`th read
    pub fn with_spike_every(mut self, n: u64, magnitude: f64) -> Self {
        self.spike_every = Some((n.max(1), magnitude));
        self
    }

    /// Simulate ADC conversion time
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = delay;
        self
    }

    /// Get a handle for steering the simulated load
    pub fn handle(&self) -> MockScaleHandle {
        self.handle.clone()
    }
}

impl Default for MockLoadCell {
    fn default() -> Self {
        Self::new(8_000.0, 21.0)
    }
}

impl LoadCell for MockLoadCell {
    fn read_raw(&mut self) -> Result<f64> {
        if !self.connected {
            return Err(anyhow!("MockLoadCell: no response on data line"));
        }
        if !self.read_delay.is_zero() {
            thread::sleep(self.read_delay);
        }

        let n = self.handle.reads.fetch_add(1, Ordering::SeqCst) + 1;
        let mut counts = self.zero_counts + self.handle.load() * self.counts_per_unit;
        if self.noise > 0.0 {
            counts += rand::thread_rng().gen_range(-self.noise..=self.noise);
        }
        if let Some((every, magnitude)) = self.spike_every {
            if n % every == 0 {
                counts += magnitude;
            }
        }
        Ok(counts)
    }

    fn close(&mut self) -> Result<()> {
        self.handle.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
