//! Backend collaborator contract.
//!
//! The cloud database/storage service is opaque to the host: it only needs
//! these operations to succeed or fail with a clear error.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{CalendarEvent, CalendarMeta};

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("auth error: {0}")]
    Auth(String),
    #[error("request failed: {0}")]
    Request(String),
    #[error("request timeout: {0}")]
    Timeout(String),
    #[error("http error {status}: {message}")]
    Http { status: u16, message: String },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("config error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for BackendError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_timeout() {
            return Self::Timeout(value.to_string());
        }
        if value.is_decode() {
            return Self::InvalidResponse(value.to_string());
        }
        Self::Request(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageQuota {
    pub used_bytes: i64,
    pub limit_bytes: i64,
    pub photo_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoFolder {
    pub name: String,
    pub photo_count: i64,
}

/// A stored photo as returned by the backend, with its signed URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoRecord {
    pub id: String,
    pub storage_path: String,
    #[serde(default)]
    pub folder: Option<String>,
    pub size_bytes: i64,
    pub url: String,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPhotoRecord {
    pub storage_path: String,
    #[serde(default)]
    pub folder: Option<String>,
    pub size_bytes: i64,
    #[serde(default)]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    /// Window around `now` spanning `behind` into the past and `ahead` into
    /// the future.
    pub fn around(now: DateTime<Utc>, behind: Duration, ahead: Duration) -> Self {
        let behind =
            chrono::Duration::from_std(behind).unwrap_or_else(|_| chrono::Duration::zero());
        let ahead = chrono::Duration::from_std(ahead).unwrap_or_else(|_| chrono::Duration::zero());
        Self {
            start: now - behind,
            end: now + ahead,
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at <= self.end
    }
}

#[async_trait]
pub trait DataBackend: Send + Sync {
    async fn get_storage_quota(&self) -> Result<Option<StorageQuota>, BackendError>;

    async fn init_storage_quota(&self) -> Result<StorageQuota, BackendError>;

    /// Apply a signed change to the used byte count; returns the new quota.
    async fn update_storage_quota(&self, bytes_delta: i64) -> Result<StorageQuota, BackendError>;

    async fn list_folders(&self) -> Result<Vec<PhotoFolder>, BackendError>;

    async fn list_photos(
        &self,
        folder: Option<&str>,
        limit: usize,
    ) -> Result<Vec<PhotoRecord>, BackendError>;

    async fn create_photo_record(&self, meta: NewPhotoRecord) -> Result<PhotoRecord, BackendError>;

    async fn delete_photo(&self, id: &str) -> Result<(), BackendError>;

    /// Returns the number of deleted records.
    async fn delete_all_photos(&self) -> Result<usize, BackendError>;

    async fn list_calendars(&self) -> Result<Vec<CalendarMeta>, BackendError>;

    async fn list_events(
        &self,
        calendar_id: &str,
        range: TimeRange,
    ) -> Result<Vec<CalendarEvent>, BackendError>;
}
