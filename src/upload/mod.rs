//! Asynchronous upload of committed captures.
//!
//! [`UploadQueue`] runs every upload as an independent Tokio task, bounded by a
//! semaphore, making exactly one attempt through an [`Uploader`].

pub mod client;
pub mod queue;

pub use client::{HttpUploader, Uploader};
pub use queue::{UploadOutcome, UploadQueue, UploadTicket};
