//! Load cell calibration state machine.
//!
//! ```text
//! Clear --trigger()--> SamplingEmpty --N samples--> AwaitingObjectWeight
//!   ^                                                   | press(Confirm)
//!   |                                                   v
//!   +--acknowledge()-- Finished <--N samples-- SamplingObject
//! ```
//!
//! Sampling runs as a background Tokio task reading the poller's debug
//! primitive at a fixed cadence and reporting each sample over a channel. The
//! routine only changes state inside [`CalibrationRoutine::advance`], so the
//! caller's control loop stays responsive and can [`cancel`](CalibrationRoutine::cancel)
//! at any time.
//!
//! While calibrating, the poller is paused and switched to raw counts. A
//! successful run applies the new reference unit, persists it, and on
//! acknowledgement re-tares and resumes polling. Any abort restores the scale
//! that was active before `trigger`. Leaving `Finished` without an
//! acknowledgement keeps the new reference unit with the pre-calibration
//! offset and resumes polling.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::acquisition::{ScaleCalibration, WeightPoller};
use crate::calibration::keypad::{Key, Keypad};
use crate::calibration::stats::{compute_reference_unit, trimmed_mean};
use crate::config::CalibrationConfig;
use crate::config_store::ConfigStore;
use crate::error::{AppResult, KioskError};

/// Consecutive failed reads after which a sampling phase gives up.
const MAX_CONSECUTIVE_READ_FAILURES: usize = 10;

/// Where the routine is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CalibrationPhase {
    /// Waiting for the operator to empty the platform and start
    Clear,
    /// Collecting samples of the empty platform
    SamplingEmpty,
    /// Waiting for the reference object's weight on the keypad
    AwaitingObjectWeight,
    /// Collecting samples with the reference object on the platform
    SamplingObject,
    /// New reference unit applied; waiting for acknowledgement
    Finished,
}

/// Everything collected during one calibration run.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationState {
    /// Current phase
    pub phase: CalibrationPhase,
    /// Raw samples of the empty platform, in arrival order
    pub empty_samples: Vec<f64>,
    /// Raw samples with the object, in arrival order
    pub object_samples: Vec<f64>,
    /// Operator-entered weight of the object
    pub object_weight: f64,
    /// Result, once computed
    pub computed_reference_unit: Option<f64>,
}

impl Default for CalibrationState {
    fn default() -> Self {
        Self {
            phase: CalibrationPhase::Clear,
            empty_samples: Vec::new(),
            object_samples: Vec::new(),
            object_weight: 0.0,
            computed_reference_unit: None,
        }
    }
}

/// Progress reported by a sampling task.
#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationEvent {
    /// One raw sample, for live display
    Sample {
        /// Phase the sample belongs to
        phase: CalibrationPhase,
        /// 1-based count collected so far
        collected: usize,
        /// Samples required for the phase
        total: usize,
        /// Raw reading
        value: f64,
    },
    /// All samples of the phase have been reported
    PhaseSampled {
        /// The completed phase
        phase: CalibrationPhase,
    },
    /// The phase could not be completed
    Aborted {
        /// Phase that was running
        phase: CalibrationPhase,
        /// Why sampling stopped
        reason: String,
    },
}

struct Sampler {
    events: mpsc::Receiver<CalibrationEvent>,
    task: JoinHandle<()>,
}

/// Drives one load cell calibration at a time.
pub struct CalibrationRoutine {
    poller: Arc<WeightPoller>,
    store: Arc<dyn ConfigStore>,
    sample_count: usize,
    sample_interval: Duration,
    trim_fraction: f64,
    tare_samples: usize,
    state: CalibrationState,
    keypad: Keypad,
    previous_scale: Option<ScaleCalibration>,
    sampler: Option<Sampler>,
}

impl CalibrationRoutine {
    /// Create a routine in `Clear`.
    pub fn new(
        poller: Arc<WeightPoller>,
        store: Arc<dyn ConfigStore>,
        config: &CalibrationConfig,
        tare_samples: usize,
    ) -> Self {
        Self {
            poller,
            store,
            sample_count: config.sample_count.max(1),
            sample_interval: config.sample_interval().max(Duration::from_millis(1)),
            trim_fraction: config.trim_fraction,
            tare_samples,
            state: CalibrationState::default(),
            keypad: Keypad::new(),
            previous_scale: None,
            sampler: None,
        }
    }

    /// Collected data and current phase.
    pub fn state(&self) -> &CalibrationState {
        &self.state
    }

    /// Current phase.
    pub fn phase(&self) -> CalibrationPhase {
        self.state.phase
    }

    /// Keypad entry as shown to the operator.
    pub fn keypad_text(&self) -> &str {
        self.keypad.text()
    }

    /// Start sampling the empty platform.
    ///
    /// Pauses the weight poller and switches it to raw counts. Must be called
    /// from within a Tokio runtime.
    ///
    /// # Errors
    /// `CalibrationState` unless the routine is in `Clear`.
    pub fn trigger(&mut self) -> AppResult<()> {
        self.expect_phase(CalibrationPhase::Clear, "trigger")?;

        self.poller.pause();
        self.previous_scale = Some(self.poller.reset_for_calibration());
        self.state = CalibrationState {
            phase: CalibrationPhase::SamplingEmpty,
            ..CalibrationState::default()
        };
        info!(samples = self.sample_count, "Calibration started: sampling empty platform");
        self.spawn_sampler(CalibrationPhase::SamplingEmpty);
        Ok(())
    }

    /// Feed one keypad press while awaiting the object weight.
    ///
    /// A valid `Confirm` records the weight, starts object sampling and returns
    /// the weight.
    ///
    /// # Errors
    /// - `CalibrationState` outside `AwaitingObjectWeight`
    /// - `CalibrationInvalidInput` for a rejected entry; the phase is unchanged
    pub fn press(&mut self, key: Key) -> AppResult<Option<f64>> {
        self.expect_phase(CalibrationPhase::AwaitingObjectWeight, "keypad entry")?;

        match self.keypad.press(key) {
            Ok(Some(weight)) => {
                self.state.object_weight = weight;
                self.state.phase = CalibrationPhase::SamplingObject;
                info!(object_weight = weight, "Sampling with reference object");
                self.spawn_sampler(CalibrationPhase::SamplingObject);
                Ok(Some(weight))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                warn!(error = %e, "Calibration weight rejected");
                Err(e)
            }
        }
    }

    /// Wait for the next sampling event and apply it.
    ///
    /// Returns `Ok(None)` when no sampling is running. Cancel-safe: dropping
    /// the future loses no event.
    ///
    /// # Errors
    /// When the run aborts (device failure, invalid result) the previous
    /// scale is restored, the routine returns to `Clear` and the cause is
    /// returned.
    pub async fn advance(&mut self) -> AppResult<Option<CalibrationEvent>> {
        let Some(sampler) = self.sampler.as_mut() else {
            return Ok(None);
        };
        let phase = self.state.phase;
        let event = sampler.events.recv().await.unwrap_or(CalibrationEvent::Aborted {
            phase,
            reason: "sampling task ended unexpectedly".to_string(),
        });

        match &event {
            CalibrationEvent::Sample { value, collected, total, .. } => {
                debug!(collected, total, value, "Calibration sample");
                match phase {
                    CalibrationPhase::SamplingEmpty => self.state.empty_samples.push(*value),
                    CalibrationPhase::SamplingObject => self.state.object_samples.push(*value),
                    _ => {}
                }
            }
            CalibrationEvent::PhaseSampled { .. } => {
                self.sampler = None;
                if let Err(e) = self.complete_phase() {
                    self.abort();
                    return Err(e);
                }
            }
            CalibrationEvent::Aborted { reason, .. } => {
                let reason = reason.clone();
                self.abort();
                return Err(KioskError::SensorReadTransient(reason));
            }
        }
        Ok(Some(event))
    }

    /// Advance until the running sampling phase has completed.
    ///
    /// Returns the phase the routine moved to.
    pub async fn complete_sampling(&mut self) -> AppResult<CalibrationPhase> {
        while self.advance().await?.is_some() {
            if self.sampler.is_none() {
                break;
            }
        }
        Ok(self.state.phase)
    }

    /// Confirm the finished calibration: re-tare, resume polling, back to `Clear`.
    ///
    /// # Errors
    /// `CalibrationState` outside `Finished`; tare failures leave the routine
    /// in `Finished` so the operator can retry.
    pub async fn acknowledge(&mut self) -> AppResult<()> {
        self.expect_phase(CalibrationPhase::Finished, "acknowledge")?;

        let poller = Arc::clone(&self.poller);
        let samples = self.tare_samples;
        tokio::task::spawn_blocking(move || poller.tare(samples))
            .await
            .map_err(|e| KioskError::TaskFailed(e.to_string()))??;

        self.poller.resume();
        self.previous_scale = None;
        self.state.phase = CalibrationPhase::Clear;
        info!("Calibration acknowledged");
        Ok(())
    }

    /// Abandon the run, restoring the scale that was active before `trigger`.
    ///
    /// No-op in `Clear`. In `Finished` the new reference unit is already
    /// applied and persisted, so it is kept; only the offset from before
    /// `trigger` comes back and polling resumes without a re-tare.
    pub fn cancel(&mut self) -> AppResult<()> {
        match self.state.phase {
            CalibrationPhase::Clear => Ok(()),
            CalibrationPhase::Finished => {
                info!("Calibration closed without acknowledgement");
                self.release_finished();
                Ok(())
            }
            phase => {
                info!(?phase, "Calibration cancelled");
                self.abort();
                Ok(())
            }
        }
    }

    fn complete_phase(&mut self) -> AppResult<()> {
        match self.state.phase {
            CalibrationPhase::SamplingEmpty => {
                let empty_mean = self.mean_of(&self.state.empty_samples)?;
                info!(empty_mean, "Empty platform sampled");
                self.keypad.clear();
                self.state.phase = CalibrationPhase::AwaitingObjectWeight;
                Ok(())
            }
            CalibrationPhase::SamplingObject => {
                let empty_mean = self.mean_of(&self.state.empty_samples)?;
                let object_mean = self.mean_of(&self.state.object_samples)?;
                let reference_unit =
                    compute_reference_unit(empty_mean, object_mean, self.state.object_weight)?;

                self.poller.set_reference_unit(reference_unit)?;
                if let Err(e) = self.store.set_f64("weight", "reference_unit", reference_unit) {
                    error!(error = %e, "Reference unit applied but not persisted");
                }
                self.state.computed_reference_unit = Some(reference_unit);
                self.state.phase = CalibrationPhase::Finished;
                info!(
                    empty_mean,
                    object_mean,
                    object_weight = self.state.object_weight,
                    reference_unit,
                    "Calibration finished"
                );
                Ok(())
            }
            phase => Err(KioskError::CalibrationState(format!(
                "no sampling in progress during {:?}",
                phase
            ))),
        }
    }

    fn mean_of(&self, samples: &[f64]) -> AppResult<f64> {
        trimmed_mean(samples, self.trim_fraction).ok_or_else(|| {
            KioskError::CalibrationInvalidResult(format!("{} samples left nothing to average", samples.len()))
        })
    }

    fn abort(&mut self) {
        if let Some(sampler) = self.sampler.take() {
            sampler.task.abort();
        }
        if let Some(previous) = self.previous_scale.take() {
            self.poller.set_scale(previous);
        }
        self.poller.resume();
        self.keypad.clear();
        self.state.phase = CalibrationPhase::Clear;
    }

    fn release_finished(&mut self) {
        if let Some(previous) = self.previous_scale.take() {
            let mut scale = self.poller.scale();
            scale.offset = previous.offset;
            self.poller.set_scale(scale);
        }
        self.poller.resume();
        self.keypad.clear();
        self.state.phase = CalibrationPhase::Clear;
    }

    fn expect_phase(&self, expected: CalibrationPhase, operation: &str) -> AppResult<()> {
        if self.state.phase == expected {
            Ok(())
        } else {
            Err(KioskError::CalibrationState(format!(
                "{} requires {:?}, routine is in {:?}",
                operation, expected, self.state.phase
            )))
        }
    }

    fn spawn_sampler(&mut self, phase: CalibrationPhase) {
        // Room for every event so the sampler never waits on the consumer
        let (tx, rx) = mpsc::channel(self.sample_count + 2);
        let task = tokio::spawn(run_sampler(
            Arc::clone(&self.poller),
            phase,
            self.sample_count,
            self.sample_interval,
            tx,
        ));
        self.sampler = Some(Sampler { events: rx, task });
    }
}

impl Drop for CalibrationRoutine {
    fn drop(&mut self) {
        match self.state.phase {
            CalibrationPhase::Clear => {}
            CalibrationPhase::Finished => self.release_finished(),
            _ => self.abort(),
        }
    }
}

async fn run_sampler(
    poller: Arc<WeightPoller>,
    phase: CalibrationPhase,
    total: usize,
    interval: Duration,
    tx: mpsc::Sender<CalibrationEvent>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut collected = 0;
    let mut consecutive_failures = 0;
    while collected < total {
        ticker.tick().await;

        let reader = Arc::clone(&poller);
        let read = tokio::task::spawn_blocking(move || reader.read_raw(true))
            .await
            .map_err(|e| KioskError::TaskFailed(e.to_string()))
            .and_then(|r| r);

        match read {
            Ok(value) => {
                consecutive_failures = 0;
                collected += 1;
                let event = CalibrationEvent::Sample {
                    phase,
                    collected,
                    total,
                    value,
                };
                if tx.send(event).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                consecutive_failures += 1;
                warn!(error = %e, consecutive_failures, "Calibration sample failed");
                if consecutive_failures >= MAX_CONSECUTIVE_READ_FAILURES {
                    let _ = tx
                        .send(CalibrationEvent::Aborted {
                            phase,
                            reason: format!("{} consecutive read failures, last: {}", consecutive_failures, e),
                        })
                        .await;
                    return;
                }
            }
        }
    }

    let _ = tx.send(CalibrationEvent::PhaseSampled { phase }).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WeightConfig;
    use crate::config_store::MemoryConfigStore;
    use crate::hardware::mock::{MockLoadCell, MockScaleHandle};
    use tracing_test::traced_test;

    fn fixture(samples: usize) -> (CalibrationRoutine, Arc<WeightPoller>, MockScaleHandle, Arc<MemoryConfigStore>) {
        // raw = 100 + 0.5 * load, so 500 units read 350 counts
        let cell = MockLoadCell::new(100.0, 0.5);
        let scale = cell.handle();
        let weight_config = WeightConfig {
            reference_unit: 7.0,
            samples_per_read: 1,
            ..WeightConfig::default()
        };
        let poller = Arc::new(WeightPoller::new(Box::new(cell), &weight_config));
        let store = Arc::new(MemoryConfigStore::new());
        let config = CalibrationConfig {
            sample_count: samples,
            sample_interval_ms: 1,
            trim_fraction: 0.1,
        };
        let routine = CalibrationRoutine::new(Arc::clone(&poller), store.clone(), &config, 3);
        (routine, poller, scale, store)
    }

    fn enter(routine: &mut CalibrationRoutine, keys: &[Key]) -> AppResult<Option<f64>> {
        let mut last = Ok(None);
        for key in keys {
            last = routine.press(*key);
        }
        last
    }

    #[tokio::test]
    async fn full_run_applies_and_persists_reference_unit() {
        let (mut routine, poller, scale, store) = fixture(10);

        routine.trigger().unwrap();
        assert!(poller.is_paused());
        assert_eq!(routine.complete_sampling().await.unwrap(), CalibrationPhase::AwaitingObjectWeight);
        assert_eq!(routine.state().empty_samples, vec![100.0; 10]);

        scale.set_load(500.0);
        let weight = enter(&mut routine, &[Key::Digit(5), Key::Digit(0), Key::Digit(0), Key::Confirm]).unwrap();
        assert_eq!(weight, Some(500.0));
        assert_eq!(routine.complete_sampling().await.unwrap(), CalibrationPhase::Finished);

        // (350 - 100) / 500
        assert_eq!(routine.state().computed_reference_unit, Some(0.5));
        assert_eq!(poller.scale().reference_unit, 0.5);
        assert_eq!(store.get_f64("weight", "reference_unit").unwrap(), Some(0.5));

        routine.acknowledge().await.unwrap();
        assert_eq!(routine.phase(), CalibrationPhase::Clear);
        assert!(!poller.is_paused());
        // tared with the object still on the platform
        assert_eq!(poller.scale().offset, 350.0);
    }

    #[tokio::test]
    async fn samples_are_reported_one_by_one() {
        let (mut routine, _poller, _scale, _store) = fixture(3);
        routine.trigger().unwrap();

        for expected in 1..=3 {
            match routine.advance().await.unwrap() {
                Some(CalibrationEvent::Sample { collected, total, .. }) => {
                    assert_eq!((collected, total), (expected, 3));
                }
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert!(matches!(
            routine.advance().await.unwrap(),
            Some(CalibrationEvent::PhaseSampled { phase: CalibrationPhase::SamplingEmpty })
        ));
        assert!(routine.advance().await.unwrap().is_none());
    }

    #[tokio::test]
    #[traced_test]
    async fn invalid_weight_keeps_awaiting() {
        let (mut routine, _poller, _scale, _store) = fixture(2);
        routine.trigger().unwrap();
        routine.complete_sampling().await.unwrap();

        let err = enter(&mut routine, &[Key::Digit(0), Key::Confirm]).unwrap_err();
        assert!(matches!(err, KioskError::CalibrationInvalidInput(_)));
        assert_eq!(routine.phase(), CalibrationPhase::AwaitingObjectWeight);
        assert!(logs_contain("Calibration weight rejected"));
    }

    #[tokio::test]
    async fn nothing_on_platform_aborts_and_restores() {
        let (mut routine, poller, _scale, store) = fixture(4);
        let before = poller.scale();

        routine.trigger().unwrap();
        routine.complete_sampling().await.unwrap();
        enter(&mut routine, &[Key::Digit(2), Key::Confirm]).unwrap();

        let err = routine.complete_sampling().await.unwrap_err();
        assert!(matches!(err, KioskError::CalibrationInvalidResult(_)));
        assert_eq!(routine.phase(), CalibrationPhase::Clear);
        assert_eq!(poller.scale(), before);
        assert!(!poller.is_paused());
        assert_eq!(store.get_f64("weight", "reference_unit").unwrap(), None);
    }

    #[tokio::test]
    async fn cancel_mid_sampling_restores_scale() {
        let (mut routine, poller, _scale, _store) = fixture(1000);
        poller.tare(2).unwrap();
        let before = poller.scale();

        routine.trigger().unwrap();
        routine.advance().await.unwrap();
        routine.cancel().unwrap();

        assert_eq!(routine.phase(), CalibrationPhase::Clear);
        assert_eq!(poller.scale(), before);
        assert!(routine.advance().await.unwrap().is_none());
    }

    async fn run_to_finished(routine: &mut CalibrationRoutine, scale: &MockScaleHandle) {
        routine.trigger().unwrap();
        routine.complete_sampling().await.unwrap();
        scale.set_load(500.0);
        enter(routine, &[Key::Digit(5), Key::Digit(0), Key::Digit(0), Key::Confirm]).unwrap();
        assert_eq!(routine.complete_sampling().await.unwrap(), CalibrationPhase::Finished);
    }

    #[tokio::test]
    async fn dropping_finished_routine_resumes_poller() {
        let (mut routine, poller, scale, _store) = fixture(10);
        poller.tare(2).unwrap();
        poller.start(Duration::from_millis(2)).unwrap();

        run_to_finished(&mut routine, &scale).await;
        drop(routine);

        assert!(!poller.is_paused());
        assert_eq!(poller.scale(), ScaleCalibration { offset: 100.0, reference_unit: 0.5 });

        // 300 units on the platform read 250 counts over the empty offset
        scale.set_load(300.0);
        let mut settled = false;
        for _ in 0..200 {
            if (poller.latest() - 300.0).abs() < 1e-9 {
                settled = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(settled, "latest stuck at {}", poller.latest());
        poller.stop();
    }

    #[tokio::test]
    async fn cancel_in_finished_keeps_new_reference_unit() {
        let (mut routine, poller, scale, store) = fixture(10);
        poller.tare(2).unwrap();

        run_to_finished(&mut routine, &scale).await;
        routine.cancel().unwrap();

        assert_eq!(routine.phase(), CalibrationPhase::Clear);
        assert!(!poller.is_paused());
        assert_eq!(poller.scale(), ScaleCalibration { offset: 100.0, reference_unit: 0.5 });
        assert_eq!(store.get_f64("weight", "reference_unit").unwrap(), Some(0.5));
    }

    #[tokio::test]
    async fn operations_out_of_phase_are_rejected() {
        let (mut routine, _poller, _scale, _store) = fixture(2);
        assert!(matches!(routine.press(Key::Digit(1)), Err(KioskError::CalibrationState(_))));
        assert!(routine.acknowledge().await.is_err());

        routine.trigger().unwrap();
        assert!(routine.trigger().is_err());
        routine.cancel().unwrap();
    }

    #[tokio::test]
    async fn disconnected_cell_aborts_phase() {
        let poller = Arc::new(WeightPoller::new(
            Box::new(MockLoadCell::disconnected()),
            &WeightConfig::default(),
        ));
        let config = CalibrationConfig {
            sample_count: 5,
            sample_interval_ms: 1,
            trim_fraction: 0.1,
        };
        let mut routine = CalibrationRoutine::new(poller, Arc::new(MemoryConfigStore::new()), &config, 3);
        routine.trigger().unwrap();

        let err = routine.complete_sampling().await.unwrap_err();
        assert!(matches!(err, KioskError::SensorReadTransient(_)));
        assert_eq!(routine.phase(), CalibrationPhase::Clear);
    }
}
