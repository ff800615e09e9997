//! Ownership of the kiosk's sensor producers.

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::acquisition::frame::SensorFrame;
use crate::acquisition::sensor_stream::SensorStream;
use crate::acquisition::weight_poller::WeightPoller;
use crate::error::AppResult;

/// The camera stream plus an optional weight poller.
///
/// The poller is optional because the kiosk keeps working without a load cell,
/// recording weight 0.
pub struct SensorHub {
    stream: SensorStream,
    weight: Option<Arc<WeightPoller>>,
}

impl SensorHub {
    /// Assemble a hub from already-constructed producers.
    pub fn new(stream: SensorStream, weight: Option<Arc<WeightPoller>>) -> Self {
        Self { stream, weight }
    }

    /// Start the camera stream and, if present, the weight poll loop.
    pub fn start(&self, poll_interval: Duration) -> AppResult<()> {
        self.stream.start()?;
        if let Some(weight) = &self.weight {
            weight.start(poll_interval)?;
        }
        Ok(())
    }

    /// Latest frame pair, if any has been published.
    pub fn latest_frame(&self) -> Option<Arc<SensorFrame>> {
        self.stream.latest()
    }

    /// Latest weight, or 0 without a load cell.
    pub fn latest_weight(&self) -> f64 {
        self.weight.as_ref().map(|w| w.latest()).unwrap_or(0.0)
    }

    /// The camera stream.
    pub fn stream(&self) -> &SensorStream {
        &self.stream
    }

    /// The weight poller, if a load cell is connected.
    pub fn weight_poller(&self) -> Option<&Arc<WeightPoller>> {
        self.weight.as_ref()
    }

    /// Stop both producers, join their threads, then release the devices.
    pub fn shutdown(&self) {
        self.stream.stop();
        if let Some(weight) = &self.weight {
            weight.stop();
        }
        info!("Sensor hub shut down");
    }
}
