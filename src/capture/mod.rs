//! Single-shot capture protocol.
//!
//! [`CaptureSession`] turns one operator action into a persisted RGBD file, a
//! durable log entry and a queued upload.

pub mod record;
pub mod session;

pub use record::{CaptureRecord, UploadStatus, User};
pub use session::{CaptureSession, Clock, CommittedCapture, PendingCapture};
