//! Composition root.
//!
//! [`Kiosk`] wires the devices, producers, capture session, durable log and
//! upload queue together and owns the start-up and shutdown order:
//!
//! 1. Validate configuration
//! 2. Open the camera stream; a missing sensor aborts start-up here
//! 3. Tare the load cell within `weight.init_timeout_secs`, or run without it
//! 4. Start both producer threads
//!
//! Shutdown stops and joins both threads before the devices are released.

use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::acquisition::{SensorHub, SensorStream, WeightPoller};
use crate::calibration::CalibrationRoutine;
use crate::capture::record::day_folder;
use crate::capture::{CaptureSession, CommittedCapture, User};
use crate::config::{KioskConfig, WeightConfig};
use crate::config_store::ConfigStore;
use crate::error::{AppResult, KioskError};
use crate::hardware::capabilities::{DepthSource, LoadCell};
use crate::storage::DurableLog;
use crate::upload::{UploadQueue, Uploader};

/// A running kiosk core.
pub struct Kiosk {
    config: KioskConfig,
    hub: Arc<SensorHub>,
    log: Arc<DurableLog>,
    uploads: Arc<UploadQueue>,
    session: Arc<CaptureSession>,
    store: Arc<dyn ConfigStore>,
}

impl Kiosk {
    /// Bring up the kiosk on the current Tokio runtime.
    ///
    /// # Errors
    /// Configuration errors and `SensorInitFailure` from the camera. A load
    /// cell that fails to initialise is not an error; the kiosk records
    /// weight 0 instead.
    pub async fn start(
        config: KioskConfig,
        camera: Box<dyn DepthSource>,
        load_cell: Option<Box<dyn LoadCell>>,
        uploader: Arc<dyn Uploader>,
        store: Arc<dyn ConfigStore>,
    ) -> AppResult<Self> {
        config.validate()?;

        let stream = SensorStream::new(camera)?;
        let weight = match load_cell {
            Some(cell) => init_weight(cell, &config.weight).await,
            None => {
                warn!("No weight sensor configured; recording weight 0");
                None
            }
        };

        let hub = Arc::new(SensorHub::new(stream, weight));
        hub.start(config.weight.poll_interval())?;

        let uploads = Arc::new(UploadQueue::new(uploader, config.api.max_concurrent_uploads)?);
        let log = Arc::new(DurableLog::new());
        let session = Arc::new(CaptureSession::new(
            Arc::clone(&hub),
            Arc::clone(&log),
            Arc::clone(&uploads),
            &config.path,
            &config.capture,
        ));

        info!(
            save_dir = %config.path.save_dir.display(),
            weight_sensor = hub.weight_poller().is_some(),
            "Kiosk started"
        );

        Ok(Self {
            config,
            hub,
            log,
            uploads,
            session,
            store,
        })
    }

    /// Active configuration.
    pub fn config(&self) -> &KioskConfig {
        &self.config
    }

    /// Sensor producers.
    pub fn hub(&self) -> &Arc<SensorHub> {
        &self.hub
    }

    /// Capture session.
    pub fn session(&self) -> &Arc<CaptureSession> {
        &self.session
    }

    /// Upload pool.
    pub fn uploads(&self) -> &Arc<UploadQueue> {
        &self.uploads
    }

    /// Durable log.
    pub fn log(&self) -> &Arc<DurableLog> {
        &self.log
    }

    /// Folder receiving today's captures.
    pub fn today_folder(&self) -> PathBuf {
        day_folder(&self.config.path.save_dir, chrono::Local::now().date_naive())
    }

    /// Wait up to the configured frame timeout for the first frame.
    ///
    /// # Errors
    /// `SensorNotReady` if no frame arrived in time.
    pub async fn wait_until_ready(&self) -> AppResult<()> {
        let mut frames = self.hub.stream().subscribe();
        let ready = matches!(
            timeout(self.config.camera.frame_timeout(), frames.wait_for(|frame| frame.is_some())).await,
            Ok(Ok(_))
        );
        if ready {
            Ok(())
        } else {
            Err(KioskError::SensorNotReady)
        }
    }

    /// Run one capture: `begin`, settle, `commit`.
    pub async fn capture(&self, meal_type: &str, user: &User) -> AppResult<CommittedCapture> {
        self.session.begin(meal_type, user)?.wait().await
    }

    /// New calibration routine bound to the live weight poller.
    ///
    /// # Errors
    /// `CalibrationState` when running without a weight sensor.
    pub fn calibration(&self) -> AppResult<CalibrationRoutine> {
        let poller = self.hub.weight_poller().ok_or_else(|| {
            KioskError::CalibrationState("no weight sensor connected".to_string())
        })?;
        Ok(CalibrationRoutine::new(
            Arc::clone(poller),
            Arc::clone(&self.store),
            &self.config.calibration,
            self.config.weight.tare_samples,
        ))
    }

    /// Stop and join both producers, then release the devices.
    pub async fn shutdown(self) -> AppResult<()> {
        let hub = Arc::clone(&self.hub);
        tokio::task::spawn_blocking(move || hub.shutdown())
            .await
            .map_err(|e| KioskError::TaskFailed(e.to_string()))?;
        info!("Kiosk stopped");
        Ok(())
    }
}

/// Tare the load cell off the runtime, giving up after `init_timeout`.
async fn init_weight(cell: Box<dyn LoadCell>, config: &WeightConfig) -> Option<Arc<WeightPoller>> {
    let poller = WeightPoller::new(cell, config);
    let samples = config.tare_samples;
    let tare = tokio::task::spawn_blocking(move || poller.tare(samples).map(|_| poller));

    match timeout(config.init_timeout(), tare).await {
        Ok(Ok(Ok(poller))) => Some(Arc::new(poller)),
        Ok(Ok(Err(e))) => {
            warn!(error = %e, "Weight sensor not connected; recording weight 0");
            None
        }
        Ok(Err(e)) => {
            warn!(error = %e, "Weight sensor initialisation task failed; recording weight 0");
            None
        }
        Err(_) => {
            warn!(
                timeout_secs = config.init_timeout_secs,
                "Weight sensor did not respond in time; recording weight 0"
            );
            None
        }
    }
}
