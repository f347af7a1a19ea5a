//! PostgREST-style HTTP implementation of [`DataBackend`].
//!
//! Tables: `storage_quota`, `photo_folders`, `photos`, `calendars`,
//! `calendar_events`. Photo URLs are signed through the storage API with the
//! configured lifetime.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Method, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::BackendConfig;
use crate::core::{CalendarEvent, CalendarMeta};
use crate::services::auth::{require_token, AuthError, TokenProvider};
use crate::services::backend::{
    BackendError, DataBackend, NewPhotoRecord, PhotoFolder, PhotoRecord, StorageQuota, TimeRange,
};

impl From<AuthError> for BackendError {
    fn from(value: AuthError) -> Self {
        Self::Auth(value.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct QuotaRow {
    used_bytes: i64,
    limit_bytes: i64,
    #[serde(default)]
    photo_count: i64,
}

impl From<QuotaRow> for StorageQuota {
    fn from(row: QuotaRow) -> Self {
        Self {
            used_bytes: row.used_bytes,
            limit_bytes: row.limit_bytes,
            photo_count: row.photo_count,
        }
    }
}

#[derive(Debug, Deserialize)]
struct FolderRow {
    name: String,
    #[serde(default)]
    photo_count: i64,
}

#[derive(Debug, Deserialize)]
struct PhotoRow {
    id: String,
    storage_path: String,
    #[serde(default)]
    folder: Option<String>,
    #[serde(default)]
    size_bytes: i64,
    uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct PhotoInsert<'a> {
    storage_path: &'a str,
    folder: Option<&'a str>,
    size_bytes: i64,
    mime_type: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct SignedUrlRow {
    path: String,
    #[serde(rename = "signedURL")]
    signed_url: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CalendarRow {
    id: String,
    name: String,
    #[serde(default)]
    color: Option<String>,
    #[serde(default)]
    is_primary: bool,
}

#[derive(Debug, Deserialize)]
struct EventRow {
    id: String,
    calendar_id: String,
    title: String,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    #[serde(default)]
    all_day: bool,
    #[serde(default)]
    location: Option<String>,
}

pub struct RestBackend {
    base_url: String,
    api_key: Option<String>,
    bucket: String,
    signed_url_ttl: Duration,
    auth_provider: String,
    auth_profile: String,
    tokens: Arc<dyn TokenProvider>,
    client: reqwest::Client,
}

impl RestBackend {
    /// Build a client. Fails fast when the token service is not ready rather
    /// than degrading to unauthenticated requests.
    pub fn connect(
        config: &BackendConfig,
        signed_url_ttl: Duration,
        tokens: Arc<dyn TokenProvider>,
    ) -> Result<Self, BackendError> {
        let base_url = config
            .base_url
            .as_deref()
            .map(|url| url.trim().trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty())
            .ok_or_else(|| BackendError::Config("backend base_url is not configured".to_string()))?;
        if config.timeout_ms == 0 {
            return Err(BackendError::Config(
                "backend timeout must be greater than 0".to_string(),
            ));
        }
        if !tokens.is_service_ready() {
            return Err(BackendError::Auth(
                "token service is not ready; refusing to start an unauthenticated backend"
                    .to_string(),
            ));
        }

        Ok(Self {
            base_url,
            api_key: config.api_key.clone(),
            bucket: config.bucket.clone(),
            signed_url_ttl,
            auth_provider: config.auth_provider.clone(),
            auth_profile: config.auth_profile.clone(),
            tokens,
            client: reqwest::Client::builder()
                .timeout(Duration::from_millis(config.timeout_ms))
                .build()
                .map_err(|error| BackendError::Config(error.to_string()))?,
        })
    }

    async fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, BackendError> {
        let token = require_token(
            self.tokens.as_ref(),
            &self.auth_provider,
            &self.auth_profile,
        )
        .await?;
        let mut builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(token);
        if let Some(key) = self.api_key.as_deref() {
            builder = builder.header("apikey", key);
        }
        Ok(builder)
    }

    async fn send_json<T: serde::de::DeserializeOwned>(
        &self,
        builder: RequestBuilder,
    ) -> Result<T, BackendError> {
        let response = check_status(builder.send().await?).await?;
        Ok(response.json::<T>().await?)
    }

    async fn sign_urls(&self, paths: &[String]) -> Result<Vec<SignedUrlRow>, BackendError> {
        if paths.is_empty() {
            return Ok(Vec::new());
        }
        let builder = self
            .request(
                Method::POST,
                &format!("/storage/v1/object/sign/{}", urlencoding::encode(&self.bucket)),
            )
            .await?
            .json(&json!({
                "expiresIn": self.signed_url_ttl.as_secs(),
                "paths": paths,
            }));
        self.send_json(builder).await
    }

    async fn attach_urls(&self, rows: Vec<PhotoRow>) -> Result<Vec<PhotoRecord>, BackendError> {
        let paths: Vec<String> = rows.iter().map(|row| row.storage_path.clone()).collect();
        let signed = self.sign_urls(&paths).await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let url = signed
                .iter()
                .find(|entry| entry.path == row.storage_path)
                .and_then(|entry| match (&entry.signed_url, &entry.error) {
                    (Some(url), None) => Some(url.clone()),
                    (_, Some(error)) => {
                        tracing::warn!(path = %entry.path, %error, "failed to sign photo url");
                        None
                    }
                    _ => None,
                });
            let Some(url) = url else {
                continue;
            };
            records.push(PhotoRecord {
                id: row.id,
                storage_path: row.storage_path,
                folder: row.folder,
                size_bytes: row.size_bytes,
                url: format!("{}/storage/v1{}", self.base_url, url),
                uploaded_at: row.uploaded_at,
            });
        }
        Ok(records)
    }
}

async fn check_status(response: Response) -> Result<Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    if status.as_u16() == 401 || status.as_u16() == 403 {
        return Err(BackendError::Auth(format!("status {}: {message}", status.as_u16())));
    }
    Err(BackendError::Http {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl DataBackend for RestBackend {
    async fn get_storage_quota(&self) -> Result<Option<StorageQuota>, BackendError> {
        let builder = self
            .request(Method::GET, "/rest/v1/storage_quota?select=*&limit=1")
            .await?;
        let rows: Vec<QuotaRow> = self.send_json(builder).await?;
        Ok(rows.into_iter().next().map(StorageQuota::from))
    }

    async fn init_storage_quota(&self) -> Result<StorageQuota, BackendError> {
        let builder = self
            .request(Method::POST, "/rest/v1/storage_quota")
            .await?
            .header("Prefer", "return=representation")
            .json(&json!({ "used_bytes": 0, "photo_count": 0 }));
        let rows: Vec<QuotaRow> = self.send_json(builder).await?;
        rows.into_iter()
            .next()
            .map(StorageQuota::from)
            .ok_or_else(|| {
                BackendError::InvalidResponse("quota insert returned no row".to_string())
            })
    }

    async fn update_storage_quota(&self, bytes_delta: i64) -> Result<StorageQuota, BackendError> {
        let builder = self
            .request(Method::POST, "/rest/v1/rpc/update_storage_quota")
            .await?
            .json(&json!({ "bytes_delta": bytes_delta }));
        let row: QuotaRow = self.send_json(builder).await?;
        Ok(row.into())
    }

    async fn list_folders(&self) -> Result<Vec<PhotoFolder>, BackendError> {
        let builder = self
            .request(Method::GET, "/rest/v1/photo_folders?select=*&order=name.asc")
            .await?;
        let rows: Vec<FolderRow> = self.send_json(builder).await?;
        Ok(rows
            .into_iter()
            .map(|row| PhotoFolder {
                name: row.name,
                photo_count: row.photo_count,
            })
            .collect())
    }

    async fn list_photos(
        &self,
        folder: Option<&str>,
        limit: usize,
    ) -> Result<Vec<PhotoRecord>, BackendError> {
        let mut path = format!("/rest/v1/photos?select=*&order=uploaded_at.desc&limit={limit}");
        if let Some(folder) = folder {
            path.push_str(&format!("&folder=eq.{}", urlencoding::encode(folder)));
        }
        let builder = self.request(Method::GET, &path).await?;
        let rows: Vec<PhotoRow> = self.send_json(builder).await?;
        self.attach_urls(rows).await
    }

    async fn create_photo_record(&self, meta: NewPhotoRecord) -> Result<PhotoRecord, BackendError> {
        let builder = self
            .request(Method::POST, "/rest/v1/photos")
            .await?
            .header("Prefer", "return=representation")
            .json(&PhotoInsert {
                storage_path: &meta.storage_path,
                folder: meta.folder.as_deref(),
                size_bytes: meta.size_bytes,
                mime_type: meta.mime_type.as_deref(),
            });
        let rows: Vec<PhotoRow> = self.send_json(builder).await?;
        self.attach_urls(rows).await?.into_iter().next().ok_or_else(|| {
            BackendError::InvalidResponse("photo insert returned no signable row".to_string())
        })
    }

    async fn delete_photo(&self, id: &str) -> Result<(), BackendError> {
        let builder = self
            .request(
                Method::DELETE,
                &format!("/rest/v1/photos?id=eq.{}", urlencoding::encode(id)),
            )
            .await?
            .header("Prefer", "return=representation");
        let rows: Vec<serde_json::Value> = self.send_json(builder).await?;
        if rows.is_empty() {
            return Err(BackendError::NotFound(format!("photo {id}")));
        }
        Ok(())
    }

    async fn delete_all_photos(&self) -> Result<usize, BackendError> {
        let builder = self
            .request(Method::DELETE, "/rest/v1/photos?id=not.is.null")
            .await?
            .header("Prefer", "return=representation");
        let rows: Vec<serde_json::Value> = self.send_json(builder).await?;
        Ok(rows.len())
    }

    async fn list_calendars(&self) -> Result<Vec<CalendarMeta>, BackendError> {
        let builder = self
            .request(Method::GET, "/rest/v1/calendars?select=*&order=name.asc")
            .await?;
        let rows: Vec<CalendarRow> = self.send_json(builder).await?;
        Ok(rows
            .into_iter()
            .map(|row| CalendarMeta {
                id: row.id,
                name: row.name,
                color: row.color,
                primary: row.is_primary,
            })
            .collect())
    }

    async fn list_events(
        &self,
        calendar_id: &str,
        range: TimeRange,
    ) -> Result<Vec<CalendarEvent>, BackendError> {
        let path = format!(
            "/rest/v1/calendar_events?select=*&calendar_id=eq.{}&start_time=lte.{}&end_time=gte.{}&order=start_time.asc",
            urlencoding::encode(calendar_id),
            urlencoding::encode(&range.end.to_rfc3339()),
            urlencoding::encode(&range.start.to_rfc3339()),
        );
        let builder = self.request(Method::GET, &path).await?;
        let rows: Vec<EventRow> = self.send_json(builder).await?;
        Ok(rows
            .into_iter()
            .map(|row| CalendarEvent {
                id: row.id,
                calendar_id: row.calendar_id,
                title: row.title,
                start: row.start_time,
                end: row.end_time,
                all_day: row.all_day,
                location: row.location,
            })
            .collect())
    }
}
