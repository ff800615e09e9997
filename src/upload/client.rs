//! Upload transport.
//!
//! The wire format is a multipart `POST {base_url}/api/meals` with the text
//! fields `user_id`, `weight`, `meal_date` (`YYYY-MM-DD`) and `type`, plus a
//! `file` part carrying the RGBD container as `application/octet-stream`.
//! Only HTTP 200 counts as success.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use tracing::debug;

use crate::capture::record::CaptureRecord;
use crate::config::ApiConfig;
use crate::error::{AppResult, KioskError};

/// Ships one capture to the remote service.
///
/// Implementations make a single attempt; retry policy, if any, belongs to the
/// caller.
#[async_trait]
pub trait Uploader: Send + Sync {
    /// Upload `record` and its container file.
    ///
    /// # Errors
    /// `NetworkFailure` when no response arrived, `NonSuccessStatus` for any
    /// status other than 200.
    async fn upload(&self, record: &CaptureRecord) -> AppResult<()>;
}

/// reqwest-backed [`Uploader`].
#[derive(Debug, Clone)]
pub struct HttpUploader {
    client: Client,
    endpoint: String,
}

impl HttpUploader {
    /// Path of the meal upload endpoint below the base URL.
    pub const MEALS_PATH: &'static str = "/api/meals";

    /// Build a client with the configured request timeout.
    pub fn new(config: &ApiConfig) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| KioskError::Configuration(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: format!(
                "{}{}",
                config.base_url.trim_end_matches('/'),
                Self::MEALS_PATH
            ),
        })
    }

    /// Full URL uploads are posted to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn form(record: &CaptureRecord) -> AppResult<Form> {
        let bytes = tokio::fs::read(&record.file_path).await?;
        let part = Part::bytes(bytes)
            .file_name(record.container_file_name())
            .mime_str("application/octet-stream")
            .map_err(|e| KioskError::NetworkFailure(e.to_string()))?;

        Ok(Form::new()
            .text("user_id", record.user_id.to_string())
            .text("weight", record.weight.to_string())
            .text("meal_date", record.meal_date.format("%Y-%m-%d").to_string())
            .text("type", record.meal_type.clone())
            .part("file", part))
    }
}

#[async_trait]
impl Uploader for HttpUploader {
    async fn upload(&self, record: &CaptureRecord) -> AppResult<()> {
        let form = Self::form(record).await?;
        debug!(endpoint = %self.endpoint, file = %record.file_name, "Posting capture");

        let response = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(|e| KioskError::NetworkFailure(e.to_string()))?;

        match response.status() {
            StatusCode::OK => Ok(()),
            status => Err(KioskError::NonSuccessStatus(status.as_u16())),
        }
    }
}
