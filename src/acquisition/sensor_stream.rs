//! Continuous RGB-D frame acquisition.
//!
//! `SensorStream` owns a [`DepthSource`] and, once started, runs a dedicated
//! reader thread that blocks on the device for the next frame pair, converts it
//! to RGB and publishes it as the latest frame. Publishing is a single-slot
//! overwrite; nothing is queued.
//!
//! Read failures are logged and the loop carries on, leaving the previous frame
//! in place. A device that lacks either sensor is rejected in [`SensorStream::new`]
//! before any thread exists.

use chrono::Local;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, trace, warn};

use crate::acquisition::frame::SensorFrame;
use crate::error::{AppResult, KioskError};
use crate::hardware::capabilities::{DepthSource, StreamProfile};

/// Back-off after a failed read so a dead device does not spin the thread.
const READ_ERROR_BACKOFF: Duration = Duration::from_millis(10);

type LatestFrame = Option<Arc<SensorFrame>>;

/// Background RGB-D poller exposing the most recent frame.
pub struct SensorStream {
    profile: StreamProfile,
    /// Device handle while idle; moved into the reader thread while running
    source: Mutex<Option<Box<dyn DepthSource>>>,
    running: Arc<AtomicBool>,
    latest: Arc<watch::Sender<LatestFrame>>,
    sequence: Arc<AtomicU64>,
    read_errors: Arc<AtomicU64>,
    reader_thread: Mutex<Option<JoinHandle<Box<dyn DepthSource>>>>,
}

impl SensorStream {
    /// Wrap an opened device.
    ///
    /// # Errors
    /// `SensorInitFailure` if the device has no color or no depth stream, or
    /// reports an empty resolution. The device is closed before returning.
    pub fn new(mut source: Box<dyn DepthSource>) -> AppResult<Self> {
        let profile = source.profile().clone();
        let problem = if !profile.has_color {
            Some("no color stream")
        } else if !profile.has_depth {
            Some("no depth stream")
        } else if profile.width == 0 || profile.height == 0 {
            Some("empty resolution")
        } else {
            None
        };
        if let Some(problem) = problem {
            if let Err(e) = source.close() {
                warn!(device = %profile.device_name, "Failed to close rejected device: {}", e);
            }
            return Err(KioskError::SensorInitFailure(format!(
                "{}: {}",
                profile.device_name, problem
            )));
        }

        info!(
            device = %profile.device_name,
            width = profile.width,
            height = profile.height,
            depth_scale = profile.depth_scale,
            "Depth camera opened"
        );

        let (latest, _) = watch::channel(None);
        Ok(Self {
            profile,
            source: Mutex::new(Some(source)),
            running: Arc::new(AtomicBool::new(false)),
            latest: Arc::new(latest),
            sequence: Arc::new(AtomicU64::new(0)),
            read_errors: Arc::new(AtomicU64::new(0)),
            reader_thread: Mutex::new(None),
        })
    }

    /// Stream description captured at construction.
    pub fn profile(&self) -> &StreamProfile {
        &self.profile
    }

    /// Start the reader thread. Calling it while running is a no-op.
    ///
    /// # Errors
    /// `SensorInitFailure` if the device was already released by [`stop`](Self::stop)
    /// or the thread could not be spawned.
    pub fn start(&self) -> AppResult<()> {
        if self.running.load(Ordering::SeqCst) {
            debug!("SensorStream already running");
            return Ok(());
        }

        let mut source = self.source.lock().take().ok_or_else(|| {
            KioskError::SensorInitFailure("depth camera has been released".to_string())
        })?;

        self.running.store(true, Ordering::SeqCst);

        let running = Arc::clone(&self.running);
        let latest = Arc::clone(&self.latest);
        let sequence = Arc::clone(&self.sequence);
        let read_errors = Arc::clone(&self.read_errors);
        let profile = self.profile.clone();
        let span = info_span!("sensor_stream", device = %profile.device_name);

        let spawned = thread::Builder::new()
            .name("sensor-stream".to_string())
            .spawn(move || {
                let _span = span.enter();
                while running.load(Ordering::SeqCst) {
                    let frame = match source.read_frames() {
                        Ok(Some(pair)) => {
                            let seq = sequence.load(Ordering::SeqCst) + 1;
                            SensorFrame::from_raw(pair, &profile, seq, Local::now())
                        }
                        Ok(None) => {
                            trace!("Incomplete frame pair skipped");
                            thread::sleep(READ_ERROR_BACKOFF);
                            continue;
                        }
                        Err(e) => Err(KioskError::SensorReadTransient(e.to_string())),
                    };

                    match frame {
                        Ok(frame) => {
                            sequence.store(frame.sequence, Ordering::SeqCst);
                            trace!(sequence = frame.sequence, "Frame published");
                            latest.send_replace(Some(Arc::new(frame)));
                        }
                        Err(e) => {
                            read_errors.fetch_add(1, Ordering::SeqCst);
                            warn!(error = %e, "Frame read failed, keeping previous frame");
                            thread::sleep(READ_ERROR_BACKOFF);
                        }
                    }
                }

                debug!("Sensor stream reader thread exiting");
                source
            });

        match spawned {
            Ok(handle) => {
                *self.reader_thread.lock() = Some(handle);
                info!("Started sensor stream");
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                Err(KioskError::SensorInitFailure(format!(
                    "failed to spawn sensor thread: {}",
                    e
                )))
            }
        }
    }

    /// Stop polling, join the reader thread and release the device.
    ///
    /// Returns once the device has been closed. Idempotent.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);

        let source = match self.reader_thread.lock().take() {
            Some(handle) => match handle.join() {
                Ok(source) => Some(source),
                Err(e) => {
                    error!("Sensor stream reader thread panicked: {:?}", e);
                    None
                }
            },
            // Never started: the device is still parked here
            None => self.source.lock().take(),
        };

        if let Some(mut source) = source {
            if let Err(e) = source.close() {
                warn!("Failed to close depth camera: {}", e);
            }
            info!(
                frames = self.sequence.load(Ordering::SeqCst),
                read_errors = self.read_errors.load(Ordering::SeqCst),
                "Stopped sensor stream"
            );
        }
    }

    /// Most recent frame, or `None` before the first successful read.
    pub fn latest(&self) -> Option<Arc<SensorFrame>> {
        self.latest.borrow().clone()
    }

    /// Receiver notified on every published frame.
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<SensorFrame>>> {
        self.latest.subscribe()
    }

    /// Whether the reader thread is active.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Number of frames published so far.
    pub fn frames_published(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    /// Number of failed reads so far.
    pub fn read_errors(&self) -> u64 {
        self.read_errors.load(Ordering::SeqCst)
    }
}

impl Drop for SensorStream {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::capabilities::RawFramePair;
    use crate::hardware::mock::MockDepthCamera;
    use tracing_test::traced_test;

    fn fast_camera() -> MockDepthCamera {
        MockDepthCamera::new(16, 12).with_frame_interval(Duration::from_millis(2))
    }

    fn wait_for_frames(stream: &SensorStream, n: u64) {
        for _ in 0..500 {
            if stream.frames_published() >= n {
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("stream did not publish {} frames", n);
    }

    /// Returns incomplete pairs immediately, forever.
    struct IncompleteSource {
        profile: StreamProfile,
        reads: Arc<AtomicU64>,
    }

    impl DepthSource for IncompleteSource {
        fn profile(&self) -> &StreamProfile {
            &self.profile
        }

        fn read_frames(&mut self) -> anyhow::Result<Option<RawFramePair>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }

        fn close(&mut self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn incomplete_pairs_are_paced() {
        let reads = Arc::new(AtomicU64::new(0));
        let source = IncompleteSource {
            profile: fast_camera().profile().clone(),
            reads: Arc::clone(&reads),
        };
        let stream = SensorStream::new(Box::new(source)).unwrap();
        stream.start().unwrap();
        thread::sleep(Duration::from_millis(200));
        stream.stop();

        // 10 ms apart, so roughly 20 reads; a busy loop would do millions
        let reads = reads.load(Ordering::SeqCst);
        assert!(reads > 0);
        assert!(reads < 100, "{} reads in 200 ms", reads);
        assert!(stream.latest().is_none());
        assert_eq!(stream.read_errors(), 0);
    }

    #[test]
    fn missing_color_fails_before_start() {
        let camera = MockDepthCamera::new(16, 12).without_color();
        let handle = camera.handle();
        let err = SensorStream::new(Box::new(camera)).err().unwrap();
        assert!(matches!(err, KioskError::SensorInitFailure(_)));
        assert!(handle.is_closed());
        assert_eq!(handle.reads(), 0);
    }

    #[test]
    fn latest_is_none_before_start() {
        let stream = SensorStream::new(Box::new(fast_camera())).unwrap();
        assert!(stream.latest().is_none());
        assert!(!stream.is_running());
    }

    #[test]
    fn publishes_rgb_frames() {
        let stream = SensorStream::new(Box::new(fast_camera())).unwrap();
        stream.start().unwrap();
        wait_for_frames(&stream, 3);

        let frame = stream.latest().unwrap();
        assert_eq!(frame.rgb.dim(), (12, 16, 3));
        assert!(frame.sequence >= 3);
        stream.stop();
    }

    #[test]
    fn stop_releases_device_and_halts() {
        let camera = fast_camera();
        let handle = camera.handle();
        let stream = SensorStream::new(Box::new(camera)).unwrap();
        stream.start().unwrap();
        wait_for_frames(&stream, 2);

        stream.stop();
        assert!(handle.is_closed());
        let reads = handle.reads();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(handle.reads(), reads);
        assert!(stream.start().is_err());
    }

    #[test]
    fn transient_errors_do_not_stop_the_loop() {
        let camera = fast_camera().fail_every(2);
        let stream = SensorStream::new(Box::new(camera)).unwrap();
        stream.start().unwrap();
        wait_for_frames(&stream, 4);
        assert!(stream.read_errors() >= 2);
        assert!(stream.is_running());
        stream.stop();
    }

    #[traced_test]
    #[test]
    fn transient_errors_are_logged() {
        let stream = SensorStream::new(Box::new(fast_camera().fail_every(3))).unwrap();
        stream.start().unwrap();
        wait_for_frames(&stream, 4);
        stream.stop();
        assert!(logs_contain("Frame read failed, keeping previous frame"));
    }

    #[test]
    fn dropping_unstarted_stream_closes_device() {
        let camera = fast_camera();
        let handle = camera.handle();
        drop(SensorStream::new(Box::new(camera)).unwrap());
        assert!(handle.is_closed());
    }
}
