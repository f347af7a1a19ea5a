use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::AbortHandle;

use crate::core::{next_timestamp, PhotoSnapshot};
use crate::services::backend::{DataBackend, NewPhotoRecord, PhotoFolder, PhotoRecord, StorageQuota};
use crate::services::DataError;

#[derive(Debug, Clone, Default)]
pub struct PhotoRefreshOptions {
    pub folder: Option<String>,
    pub limit: Option<usize>,
}

/// Fetches photo records and owns the signed-URL regeneration timer.
///
/// Signed URLs expire on the backend's clock regardless of how fresh the
/// cached listing looks, so regeneration runs on its own cadence (shorter
/// than the URL lifetime) in addition to normal staleness refreshes.
pub struct PhotoDataService {
    backend: Arc<dyn DataBackend>,
    default_folder: Option<String>,
    limit: usize,
    url_refresh_interval: Duration,
    last_updated: Mutex<Option<i64>>,
    /// Sizes of the most recently listed photos, for quota bookkeeping on delete.
    known_sizes: Mutex<HashMap<String, i64>>,
    url_timer: Mutex<Option<AbortHandle>>,
}

impl PhotoDataService {
    pub fn new(
        backend: Arc<dyn DataBackend>,
        default_folder: Option<String>,
        limit: usize,
        url_refresh_interval: Duration,
    ) -> Self {
        Self {
            backend,
            default_folder,
            limit,
            url_refresh_interval,
            last_updated: Mutex::new(None),
            known_sizes: Mutex::new(HashMap::new()),
            url_timer: Mutex::new(None),
        }
    }

    pub async fn refresh(&self, options: PhotoRefreshOptions) -> Result<PhotoSnapshot, DataError> {
        let folder = options.folder.or_else(|| self.default_folder.clone());
        let limit = options.limit.unwrap_or(self.limit);
        let records = self.backend.list_photos(folder.as_deref(), limit).await?;

        {
            let mut sizes = self.known_sizes.lock().expect("photo size mutex poisoned");
            sizes.clear();
            sizes.extend(records.iter().map(|r| (r.id.clone(), r.size_bytes)));
        }

        let urls: Vec<String> = records
            .into_iter()
            .map(|record| record.url)
            .filter(|url| !url.is_empty())
            .collect();
        let last_updated = {
            let mut guard = self.last_updated.lock().expect("photo stamp mutex poisoned");
            let stamp = next_timestamp(*guard);
            *guard = Some(stamp);
            stamp
        };

        tracing::debug!(count = urls.len(), folder = ?folder, "photo refresh complete");
        Ok(PhotoSnapshot {
            count: urls.len(),
            urls,
            folder,
            last_updated,
        })
    }

    /// Start the signed-URL regeneration loop if it is not already running.
    /// `regenerate` runs every `url_refresh_interval` until cancelled.
    pub fn ensure_url_refresh<F, Fut>(&self, regenerate: F) -> bool
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut guard = self.url_timer.lock().expect("url timer mutex poisoned");
        if guard.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return false;
        }

        let interval = self.url_refresh_interval;
        let task = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                tracing::info!("regenerating signed photo urls before expiry");
                regenerate().await;
            }
        });
        *guard = Some(task.abort_handle());
        true
    }

    pub fn cancel_url_refresh(&self) {
        if let Some(handle) = self.url_timer.lock().expect("url timer mutex poisoned").take() {
            handle.abort();
        }
    }

    pub fn url_refresh_active(&self) -> bool {
        self.url_timer
            .lock()
            .expect("url timer mutex poisoned")
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub async fn list_folders(&self) -> Result<Vec<PhotoFolder>, DataError> {
        Ok(self.backend.list_folders().await?)
    }

    /// Current quota, creating the quota row on first use.
    pub async fn storage_quota(&self) -> Result<StorageQuota, DataError> {
        match self.backend.get_storage_quota().await? {
            Some(quota) => Ok(quota),
            None => {
                tracing::info!("initializing storage quota");
                Ok(self.backend.init_storage_quota().await?)
            }
        }
    }

    /// Record an uploaded file and charge its size to the quota.
    pub async fn record_upload(&self, meta: NewPhotoRecord) -> Result<PhotoRecord, DataError> {
        let quota = self.storage_quota().await?;
        let fits = quota
            .used_bytes
            .checked_add(meta.size_bytes)
            .is_some_and(|total| total <= quota.limit_bytes);
        if meta.size_bytes < 0 || !fits {
            return Err(DataError::QuotaExceeded {
                used: quota.used_bytes,
                requested: meta.size_bytes,
                limit: quota.limit_bytes,
            });
        }

        let size = meta.size_bytes;
        let record = self.backend.create_photo_record(meta).await?;
        self.known_sizes
            .lock()
            .expect("photo size mutex poisoned")
            .insert(record.id.clone(), size);
        self.backend.update_storage_quota(size).await?;
        Ok(record)
    }

    pub async fn delete_photo(&self, id: &str) -> Result<(), DataError> {
        self.backend.delete_photo(id).await?;
        let size = self
            .known_sizes
            .lock()
            .expect("photo size mutex poisoned")
            .remove(id);
        match size {
            Some(size) => {
                self.backend.update_storage_quota(-size).await?;
            }
            None => tracing::debug!(id, "deleted photo size unknown, quota left unchanged"),
        }
        Ok(())
    }

    pub async fn delete_all_photos(&self) -> Result<usize, DataError> {
        let removed = self.backend.delete_all_photos().await?;
        self.known_sizes
            .lock()
            .expect("photo size mutex poisoned")
            .clear();
        if let Some(quota) = self.backend.get_storage_quota().await? {
            self.backend.update_storage_quota(-quota.used_bytes).await?;
        }
        Ok(removed)
    }
}

impl Drop for PhotoDataService {
    fn drop(&mut self) {
        self.cancel_url_refresh();
    }
}
