//! Capture session state machine.
//!
//! ```text
//! Idle --begin()--> Committing --commit()--> Idle
//! ```
//!
//! `begin` reserves the session and schedules a commit after the settle delay.
//! Each reservation carries a generation number; the scheduled commit only
//! acts on the reservation that scheduled it, so committing early through
//! [`CaptureSession::commit`] never lets a stale timer consume the next
//! caller's reservation. `commit` snapshots the latest frame and weight once, writes the RGBD
//! container, records it in the durable log and queues the upload. Whatever
//! happens inside `commit`, the session is back to `Idle` when it returns.

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{error, info, instrument, warn};

use crate::acquisition::SensorHub;
use crate::capture::record::{
    capture_file_name, day_folder, validate_meal_type, CaptureRecord, UploadStatus, User,
};
use crate::config::{CaptureConfig, PathConfig};
use crate::error::{AppResult, KioskError};
use crate::storage::{write_container, DurableLog};
use crate::upload::{UploadQueue, UploadTicket};

/// Source of "now" for file naming; replaceable in tests.
pub type Clock = Arc<dyn Fn() -> DateTime<Local> + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
enum SessionState {
    Idle,
    Committing {
        generation: u64,
        meal_type: String,
        user: User,
    },
}

/// Result of a successful commit.
#[derive(Debug)]
pub struct CommittedCapture {
    /// The persisted capture, `upload_status = Pending`
    pub record: CaptureRecord,
    /// Handle to the queued upload
    pub upload: UploadTicket,
}

/// A scheduled commit.
#[derive(Debug)]
pub struct PendingCapture {
    result: oneshot::Receiver<AppResult<CommittedCapture>>,
}

impl PendingCapture {
    /// Wait for the scheduled commit to finish.
    pub async fn wait(self) -> AppResult<CommittedCapture> {
        self.result
            .await
            .map_err(|e| KioskError::TaskFailed(format!("capture task dropped: {}", e)))?
    }
}

/// Orchestrates one capture at a time.
pub struct CaptureSession {
    hub: Arc<SensorHub>,
    log: Arc<DurableLog>,
    uploads: Arc<UploadQueue>,
    save_dir: PathBuf,
    file_extension: String,
    settle_delay: Duration,
    clock: Clock,
    state: Mutex<SessionState>,
    generations: AtomicU64,
}

impl CaptureSession {
    /// Create an idle session.
    pub fn new(
        hub: Arc<SensorHub>,
        log: Arc<DurableLog>,
        uploads: Arc<UploadQueue>,
        paths: &PathConfig,
        capture: &CaptureConfig,
    ) -> Self {
        Self {
            hub,
            log,
            uploads,
            save_dir: paths.save_dir.clone(),
            file_extension: capture.file_extension.trim_start_matches('.').to_string(),
            settle_delay: capture.settle_delay(),
            clock: Arc::new(Local::now),
            state: Mutex::new(SessionState::Idle),
            generations: AtomicU64::new(0),
        }
    }

    /// Replace the wall clock used for naming.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Whether a capture is in progress.
    pub fn is_committing(&self) -> bool {
        *self.state.lock() != SessionState::Idle
    }

    /// Reserve the session and schedule a commit after the settle delay.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    /// `SessionBusy` if a capture is already committing, `InvalidMealType` if
    /// `meal_type` cannot be used in a file name. Neither changes state.
    pub fn begin(self: &Arc<Self>, meal_type: &str, user: &User) -> AppResult<PendingCapture> {
        validate_meal_type(meal_type)?;
        let generation = {
            let mut state = self.state.lock();
            if *state != SessionState::Idle {
                warn!(meal_type, user_id = user.id, "Capture requested while busy");
                return Err(KioskError::SessionBusy);
            }
            let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
            *state = SessionState::Committing {
                generation,
                meal_type: meal_type.to_string(),
                user: user.clone(),
            };
            generation
        };
        info!(meal_type, user_id = user.id, settle_ms = self.settle_delay.as_millis() as u64, "Capture scheduled");

        let (tx, rx) = oneshot::channel();
        let session = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(session.settle_delay).await;
            let committing = Arc::clone(&session);
            let result =
                match tokio::task::spawn_blocking(move || committing.commit_reservation(Some(generation))).await {
                    Ok(result) => result,
                    Err(e) => {
                        session.reset(generation);
                        Err(KioskError::TaskFailed(e.to_string()))
                    }
                };
            match &result {
                Err(KioskError::CaptureAlreadyCommitted) => {
                    info!(generation, "Scheduled commit skipped; capture already committed")
                }
                Err(e) => error!(error = %e, "Capture failed"),
                Ok(_) => {}
            }
            let _ = tx.send(result);
        });

        Ok(PendingCapture { result: rx })
    }

    /// Take the snapshot and persist the capture reserved by `begin` now,
    /// without waiting for the settle delay.
    ///
    /// Blocking: writes the container and the durable log synchronously. The
    /// scheduled commit of that reservation then resolves to
    /// `CaptureAlreadyCommitted`.
    ///
    /// # Errors
    /// - `SessionIdle` without a preceding `begin`
    /// - `SensorNotReady` before the first frame; nothing is written
    /// - `FileWriteFailure` if the container cannot be written
    pub fn commit(&self) -> AppResult<CommittedCapture> {
        self.commit_reservation(None)
    }

    /// Commit the current reservation, or only reservation `expected` when given.
    #[instrument(skip(self))]
    fn commit_reservation(&self, expected: Option<u64>) -> AppResult<CommittedCapture> {
        let (generation, meal_type, user) = match &*self.state.lock() {
            SessionState::Committing {
                generation,
                meal_type,
                user,
            } if expected.map_or(true, |e| e == *generation) => (*generation, meal_type.clone(), user.clone()),
            SessionState::Committing { .. } => return Err(KioskError::CaptureAlreadyCommitted),
            SessionState::Idle if expected.is_some() => return Err(KioskError::CaptureAlreadyCommitted),
            SessionState::Idle => return Err(KioskError::SessionIdle),
        };
        let _idle = IdleOnDrop {
            state: &self.state,
            generation,
        };

        // One read of each producer; no averaging
        let frame = self.hub.latest_frame().ok_or(KioskError::SensorNotReady)?;
        let weight = self.hub.latest_weight();

        let now = (self.clock)();
        let file_name = capture_file_name(now.naive_local(), user.id, &meal_type);
        let folder = day_folder(&self.save_dir, now.date_naive());
        fs::create_dir_all(&folder).map_err(|e| KioskError::FileWriteFailure {
            path: folder.clone(),
            message: e.to_string(),
        })?;

        let file_path = folder.join(format!("{}.{}", file_name, self.file_extension));
        write_container(&file_path, &frame)?;

        let record = CaptureRecord {
            user_id: user.id,
            meal_type,
            weight,
            meal_date: now.date_naive(),
            file_path,
            file_name,
            upload_status: UploadStatus::Pending,
        };

        if let Err(e) = self.log.merge(&folder, &record.file_name, &record.log_entry()) {
            error!(error = %e, file = %record.file_name, "Durable log update failed; capture kept");
        }

        let upload = self.uploads.enqueue(record.clone());
        info!(
            file = %record.file_path.display(),
            user_id = record.user_id,
            weight = record.weight,
            frame = frame.sequence,
            "Capture committed"
        );

        Ok(CommittedCapture { record, upload })
    }

    fn reset(&self, generation: u64) {
        release(&self.state, generation);
    }
}

/// Back to `Idle`, unless a newer reservation has taken the session.
fn release(state: &Mutex<SessionState>, generation: u64) {
    let mut state = state.lock();
    if matches!(&*state, SessionState::Committing { generation: g, .. } if *g == generation) {
        *state = SessionState::Idle;
    }
}

/// Returns the session to `Idle` on every exit path of `commit`.
struct IdleOnDrop<'a> {
    state: &'a Mutex<SessionState>,
    generation: u64,
}

impl Drop for IdleOnDrop<'_> {
    fn drop(&mut self) {
        release(self.state, self.generation);
    }
}
