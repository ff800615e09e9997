//! Load cell polling with tare and scale handling.
//!
//! A reading is the mean of `samples_per_read` raw device samples converted with
//! the current [`ScaleCalibration`]: `(raw - offset) / reference_unit`. The poll
//! thread clamps negative readings to zero before publishing; the debug path
//! used by calibration does not.
//!
//! The device sits behind a mutex shared by the poll thread and the synchronous
//! [`WeightPoller::read_raw`] entry point, so a direct read never interleaves
//! with a poll read. Direct reads never touch the published value.

use chrono::Local;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, trace, warn};

use crate::acquisition::frame::WeightSample;
use crate::config::WeightConfig;
use crate::error::{AppResult, KioskError};
use crate::hardware::capabilities::LoadCell;

/// Offset and scale converting raw counts into weight.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleCalibration {
    /// Raw counts of the empty platform
    pub offset: f64,
    /// Raw counts per unit of weight
    pub reference_unit: f64,
}

impl ScaleCalibration {
    /// Identity scale: readings are raw counts.
    pub const RAW: ScaleCalibration = ScaleCalibration {
        offset: 0.0,
        reference_unit: 1.0,
    };

    /// Convert raw counts to weight.
    pub fn apply(&self, raw: f64) -> f64 {
        (raw - self.offset) / self.reference_unit
    }
}

struct LoadCellState {
    cell: Mutex<Option<Box<dyn LoadCell>>>,
    scale: Mutex<ScaleCalibration>,
    samples_per_read: usize,
}

impl LoadCellState {
    fn mean_raw(&self, samples: usize) -> AppResult<f64> {
        let mut guard = self.cell.lock();
        let cell = guard
            .as_mut()
            .ok_or_else(|| KioskError::SensorReadTransient("load cell released".to_string()))?;

        let samples = samples.max(1);
        let mut sum = 0.0;
        for _ in 0..samples {
            sum += cell
                .read_raw()
                .map_err(|e| KioskError::SensorReadTransient(e.to_string()))?;
        }
        Ok(sum / samples as f64)
    }

    /// The scale is captured before the conversion starts, so a scale change
    /// during a slow read never applies to counts taken under the old one.
    fn read(&self, debug: bool) -> AppResult<f64> {
        let scale = *self.scale.lock();
        let raw = self.mean_raw(self.samples_per_read)?;
        let value = scale.apply(raw);
        if debug {
            Ok(value)
        } else {
            Ok(value.max(0.0))
        }
    }

    fn power_cycle(&self) {
        if let Some(cell) = self.cell.lock().as_mut() {
            if let Err(e) = cell.power_cycle() {
                debug!("Load cell power cycle failed: {}", e);
            }
        }
    }
}

/// Background load cell poller exposing the most recent weight.
pub struct WeightPoller {
    state: Arc<LoadCellState>,
    running: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    latest: Arc<watch::Sender<Option<WeightSample>>>,
    poll_thread: Mutex<Option<JoinHandle<()>>>,
}

impl WeightPoller {
    /// Wrap a load cell using the configured reference unit and a zero offset.
    pub fn new(cell: Box<dyn LoadCell>, config: &WeightConfig) -> Self {
        let (latest, _) = watch::channel(None);
        Self {
            state: Arc::new(LoadCellState {
                cell: Mutex::new(Some(cell)),
                scale: Mutex::new(ScaleCalibration {
                    offset: 0.0,
                    reference_unit: config.reference_unit,
                }),
                samples_per_read: config.samples_per_read.max(1),
            }),
            running: Arc::new(AtomicBool::new(false)),
            paused: Arc::new(AtomicBool::new(false)),
            latest: Arc::new(latest),
            poll_thread: Mutex::new(None),
        }
    }

    /// Start polling every `interval`. Calling it while running is a no-op.
    pub fn start(&self, interval: Duration) -> AppResult<()> {
        if self.running.load(Ordering::SeqCst) {
            debug!("WeightPoller already running");
            return Ok(());
        }
        self.running.store(true, Ordering::SeqCst);

        let state = Arc::clone(&self.state);
        let running = Arc::clone(&self.running);
        let paused = Arc::clone(&self.paused);
        let latest = Arc::clone(&self.latest);
        let span = info_span!("weight_poller");

        let spawned = thread::Builder::new()
            .name("weight-poller".to_string())
            .spawn(move || {
                let _span = span.enter();
                while running.load(Ordering::SeqCst) {
                    if !paused.load(Ordering::SeqCst) {
                        match state.read(false) {
                            Ok(_) if paused.load(Ordering::SeqCst) => {
                                debug!("Paused during read, discarding weight");
                            }
                            Ok(value) => {
                                trace!(weight = value, "Weight published");
                                latest.send_replace(Some(WeightSample {
                                    value,
                                    captured_at: Local::now(),
                                }));
                            }
                            Err(e) => warn!(error = %e, "Weight read failed, keeping previous value"),
                        }
                        state.power_cycle();
                    }
                    thread::park_timeout(interval);
                }
                debug!("Weight poller thread exiting");
            });

        match spawned {
            Ok(handle) => {
                *self.poll_thread.lock() = Some(handle);
                info!(interval_ms = interval.as_millis() as u64, "Started weight poller");
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                Err(KioskError::SensorInitFailure(format!(
                    "failed to spawn weight thread: {}",
                    e
                )))
            }
        }
    }

    /// Halt the poll loop, join it and release the load cell. Idempotent.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.poll_thread.lock().take() {
            handle.thread().unpark();
            if let Err(e) = handle.join() {
                error!("Weight poller thread panicked: {:?}", e);
            }
        }

        if let Some(mut cell) = self.state.cell.lock().take() {
            if let Err(e) = cell.close() {
                warn!("Failed to release load cell: {}", e);
            }
            info!("Stopped weight poller");
        }
    }

    /// Latest published weight, 0 if nothing has been published yet.
    pub fn latest(&self) -> f64 {
        self.latest_sample().map(|s| s.value).unwrap_or(0.0)
    }

    /// Latest published sample with its timestamp.
    pub fn latest_sample(&self) -> Option<WeightSample> {
        *self.latest.borrow()
    }

    /// Perform one physical read now, bypassing the published value.
    ///
    /// With `debug` set the value is not clamped at zero. Blocks for the
    /// duration of `samples_per_read` device conversions.
    pub fn read_raw(&self, debug: bool) -> AppResult<f64> {
        self.state.read(debug)
    }

    /// Zero the scale on the current load using the mean of `samples` raw reads.
    ///
    /// Returns the new offset.
    pub fn tare(&self, samples: usize) -> AppResult<f64> {
        let offset = self.state.mean_raw(samples)?;
        self.state.scale.lock().offset = offset;
        info!(offset, samples, "Load cell tared");
        Ok(offset)
    }

    /// Current offset and reference unit.
    pub fn scale(&self) -> ScaleCalibration {
        *self.state.scale.lock()
    }

    /// Replace offset and reference unit wholesale.
    pub fn set_scale(&self, scale: ScaleCalibration) {
        *self.state.scale.lock() = scale;
    }

    /// Apply a new reference unit; used from the next read on.
    ///
    /// # Errors
    /// `CalibrationInvalidResult` unless the value is finite and positive.
    pub fn set_reference_unit(&self, reference_unit: f64) -> AppResult<()> {
        if !(reference_unit.is_finite() && reference_unit > 0.0) {
            return Err(KioskError::CalibrationInvalidResult(format!(
                "reference unit {} is not positive",
                reference_unit
            )));
        }
        self.state.scale.lock().reference_unit = reference_unit;
        info!(reference_unit, "Reference unit applied");
        Ok(())
    }

    /// Switch to raw counts (offset 0, reference unit 1) and return the
    /// previous scale so it can be restored.
    pub fn reset_for_calibration(&self) -> ScaleCalibration {
        let mut scale = self.state.scale.lock();
        let previous = *scale;
        *scale = ScaleCalibration::RAW;
        previous
    }

    /// Suspend publishing without stopping the thread.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        debug!("Weight poller paused");
    }

    /// Resume publishing after [`pause`](Self::pause).
    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        debug!("Weight poller resumed");
    }

    /// Whether publishing is suspended.
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Whether the poll thread is active.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for WeightPoller {
    fn drop(&mut self) {
        self.stop();
    }
}
