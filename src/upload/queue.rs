//! Bounded, fire-and-observe upload pool.
//!
//! `enqueue` spawns the upload on the runtime captured at construction and
//! returns at once, so it is safe to call from a blocking commit thread. A
//! semaphore caps uploads in flight; queued tasks wait for a permit. There is
//! no retry, no cancellation and no ordering between uploads.
//!
//! Outcomes are observable per upload through the returned [`UploadTicket`]
//! and globally through [`UploadQueue::subscribe`]. The durable log is not
//! touched.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::capture::record::{CaptureRecord, UploadStatus};
use crate::error::{AppResult, KioskError};
use crate::upload::client::Uploader;

const OUTCOME_CHANNEL_CAPACITY: usize = 64;

/// Final result of one upload.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadOutcome {
    /// Durable log key of the capture
    pub file_name: String,
    /// `Success` or `Failed`
    pub status: UploadStatus,
    /// Failure description
    pub error: Option<String>,
}

/// Handle to one queued upload.
#[derive(Debug)]
pub struct UploadTicket {
    file_name: String,
    handle: JoinHandle<UploadOutcome>,
}

impl UploadTicket {
    /// Capture this ticket belongs to.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Whether the upload has completed.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the upload to finish.
    pub async fn outcome(self) -> UploadOutcome {
        match self.handle.await {
            Ok(outcome) => outcome,
            Err(e) => UploadOutcome {
                file_name: self.file_name,
                status: UploadStatus::Failed,
                error: Some(KioskError::TaskFailed(e.to_string()).to_string()),
            },
        }
    }
}

/// Upload pool with a fixed concurrency bound.
pub struct UploadQueue {
    uploader: Arc<dyn Uploader>,
    permits: Arc<Semaphore>,
    max_concurrent: usize,
    in_flight: Arc<AtomicUsize>,
    outcomes: broadcast::Sender<UploadOutcome>,
    runtime: Handle,
}

impl UploadQueue {
    /// Create a queue on the current Tokio runtime.
    ///
    /// # Errors
    /// `Configuration` when called outside a runtime.
    pub fn new(uploader: Arc<dyn Uploader>, max_concurrent: usize) -> AppResult<Self> {
        let runtime = Handle::try_current().map_err(|e| {
            KioskError::Configuration(format!("upload queue needs a Tokio runtime: {}", e))
        })?;
        Ok(Self::with_runtime(uploader, max_concurrent, runtime))
    }

    /// Create a queue that spawns onto `runtime`.
    pub fn with_runtime(uploader: Arc<dyn Uploader>, max_concurrent: usize, runtime: Handle) -> Self {
        let max_concurrent = max_concurrent.max(1);
        let (outcomes, _) = broadcast::channel(OUTCOME_CHANNEL_CAPACITY);
        Self {
            uploader,
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            in_flight: Arc::new(AtomicUsize::new(0)),
            outcomes,
            runtime,
        }
    }

    /// Queue `record` for upload and return immediately.
    pub fn enqueue(&self, record: CaptureRecord) -> UploadTicket {
        let file_name = record.file_name.clone();
        let uploader = Arc::clone(&self.uploader);
        let permits = Arc::clone(&self.permits);
        let in_flight = Arc::clone(&self.in_flight);
        let outcomes = self.outcomes.clone();

        let handle = self.runtime.spawn(async move {
            let result = match permits.acquire_owned().await {
                Ok(_permit) => {
                    in_flight.fetch_add(1, Ordering::SeqCst);
                    let result = uploader.upload(&record).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    result
                }
                Err(e) => Err(KioskError::TaskFailed(e.to_string())),
            };

            let outcome = match result {
                Ok(()) => {
                    info!(file = %record.file_name, user_id = record.user_id, "Upload succeeded");
                    UploadOutcome {
                        file_name: record.file_name,
                        status: UploadStatus::Success,
                        error: None,
                    }
                }
                Err(e) => {
                    warn!(file = %record.file_name, error = %e, "Upload failed");
                    UploadOutcome {
                        file_name: record.file_name,
                        status: UploadStatus::Failed,
                        error: Some(e.to_string()),
                    }
                }
            };

            // No subscribers is fine
            let _ = outcomes.send(outcome.clone());
            outcome
        });

        UploadTicket { file_name, handle }
    }

    /// Receive every outcome from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<UploadOutcome> {
        self.outcomes.subscribe()
    }

    /// Uploads currently holding a permit.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Concurrency bound.
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }
}
