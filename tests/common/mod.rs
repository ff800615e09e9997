//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDate, TimeZone};
use meal_kiosk::acquisition::{SensorHub, SensorStream, WeightPoller};
use meal_kiosk::capture::{CaptureRecord, UploadStatus};
use meal_kiosk::config::WeightConfig;
use meal_kiosk::hardware::mock::{MockDepthCamera, MockLoadCell, MockScaleHandle};
use meal_kiosk::upload::Uploader;
use meal_kiosk::{AppResult, KioskError};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// 2024-05-01 08:03:09 local time.
pub fn fixed_time() -> DateTime<Local> {
    Local
        .with_ymd_and_hms(2024, 5, 1, 8, 3, 9)
        .single()
        .expect("unambiguous local time")
}

pub fn fast_camera() -> MockDepthCamera {
    MockDepthCamera::new(32, 24).with_frame_interval(Duration::from_millis(2))
}

/// Load cell reading the placed load directly (offset 0, one count per unit).
pub fn unit_scale() -> (MockLoadCell, MockScaleHandle) {
    let cell = MockLoadCell::new(0.0, 1.0);
    let handle = cell.handle();
    (cell, handle)
}

/// Hub over a fast camera and, optionally, a unit-scale load cell.
///
/// The hub is not started.
pub fn hub(with_scale: bool) -> (Arc<SensorHub>, Option<MockScaleHandle>) {
    let stream = SensorStream::new(Box::new(fast_camera())).expect("mock camera");
    if !with_scale {
        return (Arc::new(SensorHub::new(stream, None)), None);
    }
    let (cell, handle) = unit_scale();
    let config = WeightConfig {
        samples_per_read: 1,
        ..WeightConfig::default()
    };
    let poller = Arc::new(WeightPoller::new(Box::new(cell), &config));
    (Arc::new(SensorHub::new(stream, Some(poller))), Some(handle))
}

/// Poll `condition` every 5 ms for up to two seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..400 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

pub fn record(file_name: &str, file_path: PathBuf) -> CaptureRecord {
    CaptureRecord {
        user_id: 7,
        meal_type: "before_meal".to_string(),
        weight: 312.5,
        meal_date: NaiveDate::from_ymd_opt(2024, 5, 1).expect("valid date"),
        file_path,
        file_name: file_name.to_string(),
        upload_status: UploadStatus::Pending,
    }
}

/// Uploader that records what it was given and answers with a fixed status.
pub struct RecordingUploader {
    status: u16,
    delay: Duration,
    uploaded: Mutex<Vec<CaptureRecord>>,
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl RecordingUploader {
    pub fn ok() -> Self {
        Self::with_status(200)
    }

    pub fn with_status(status: u16) -> Self {
        Self {
            status,
            delay: Duration::ZERO,
            uploaded: Mutex::new(Vec::new()),
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn uploaded(&self) -> Vec<CaptureRecord> {
        self.uploaded.lock().clone()
    }

    /// Highest number of uploads observed running at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Uploader for RecordingUploader {
    async fn upload(&self, record: &CaptureRecord) -> AppResult<()> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.uploaded.lock().push(record.clone());
        self.current.fetch_sub(1, Ordering::SeqCst);

        if self.status == 200 {
            Ok(())
        } else {
            Err(KioskError::NonSuccessStatus(self.status))
        }
    }
}
