//! In-process [`DataBackend`] used when no backend URL is configured.
//!
//! Every `list_photos` call re-signs URLs with a new token, mirroring how a
//! real storage service hands out fresh time-limited links.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use uuid::Uuid;

use crate::core::{CalendarEvent, CalendarMeta};
use crate::services::backend::{
    BackendError, DataBackend, NewPhotoRecord, PhotoFolder, PhotoRecord, StorageQuota, TimeRange,
};

const DEFAULT_QUOTA_LIMIT: i64 = 5 * 1024 * 1024 * 1024;

#[derive(Default)]
struct MemoryStore {
    quota: Option<StorageQuota>,
    photos: Vec<PhotoRecord>,
    calendars: Vec<CalendarMeta>,
    events: Vec<CalendarEvent>,
}

pub struct MemoryBackend {
    bucket: String,
    store: Mutex<MemoryStore>,
    signature: AtomicU64,
}

impl MemoryBackend {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            store: Mutex::new(MemoryStore::default()),
            signature: AtomicU64::new(0),
        }
    }

    /// A backend pre-populated with one calendar, a few events around today,
    /// and a handful of photos.
    pub fn with_demo_data(bucket: impl Into<String>) -> Self {
        let backend = Self::new(bucket);
        backend.add_calendar(CalendarMeta {
            id: "family".to_string(),
            name: "Family".to_string(),
            color: Some("#e67e22".to_string()),
            primary: true,
        });
        let today = Utc::now();
        let demo_events = [
            (0, "School pickup"),
            (1, "Soccer practice"),
            (3, "Dinner at grandma's"),
        ];
        for (offset, title) in demo_events {
            let start = today + ChronoDuration::days(offset);
            backend.add_event(CalendarEvent {
                id: format!("demo-{offset}"),
                calendar_id: "family".to_string(),
                title: title.to_string(),
                start,
                end: start + ChronoDuration::hours(1),
                all_day: false,
                location: None,
            });
        }
        for name in ["beach.jpg", "birthday.jpg", "snow.jpg"] {
            backend.add_photo(&format!("family/{name}"), Some("family"), 250_000);
        }
        backend
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryStore> {
        self.store.lock().expect("memory backend mutex poisoned")
    }

    pub fn add_calendar(&self, calendar: CalendarMeta) {
        self.lock().calendars.push(calendar);
    }

    pub fn add_event(&self, event: CalendarEvent) {
        self.lock().events.push(event);
    }

    pub fn add_photo(
        &self,
        storage_path: &str,
        folder: Option<&str>,
        size_bytes: i64,
    ) -> PhotoRecord {
        let record = PhotoRecord {
            id: Uuid::new_v4().to_string(),
            storage_path: storage_path.to_string(),
            folder: folder.map(str::to_string),
            size_bytes,
            url: String::new(),
            uploaded_at: Utc::now(),
        };
        self.lock().photos.push(record.clone());
        record
    }

    pub fn photo_count(&self) -> usize {
        self.lock().photos.len()
    }

    fn sign(&self, record: &PhotoRecord) -> PhotoRecord {
        let signature = self.signature.fetch_add(1, Ordering::Relaxed);
        PhotoRecord {
            url: format!(
                "memory://{}/{}?token={signature}",
                self.bucket, record.storage_path
            ),
            ..record.clone()
        }
    }
}

#[async_trait]
impl DataBackend for MemoryBackend {
    async fn get_storage_quota(&self) -> Result<Option<StorageQuota>, BackendError> {
        Ok(self.lock().quota)
    }

    async fn init_storage_quota(&self) -> Result<StorageQuota, BackendError> {
        let mut store = self.lock();
        let photo_count = store.photos.len() as i64;
        let used_bytes = store.photos.iter().map(|p| p.size_bytes).sum();
        let quota = *store.quota.get_or_insert(StorageQuota {
            used_bytes,
            limit_bytes: DEFAULT_QUOTA_LIMIT,
            photo_count,
        });
        Ok(quota)
    }

    async fn update_storage_quota(&self, bytes_delta: i64) -> Result<StorageQuota, BackendError> {
        let mut store = self.lock();
        let photo_count = store.photos.len() as i64;
        let Some(quota) = store.quota.as_mut() else {
            return Err(BackendError::NotFound("storage quota".to_string()));
        };
        quota.used_bytes = (quota.used_bytes + bytes_delta).max(0);
        quota.photo_count = photo_count;
        Ok(*quota)
    }

    async fn list_folders(&self) -> Result<Vec<PhotoFolder>, BackendError> {
        let store = self.lock();
        let mut folders: Vec<PhotoFolder> = Vec::new();
        for photo in &store.photos {
            let Some(name) = photo.folder.as_deref() else {
                continue;
            };
            match folders.iter_mut().find(|f| f.name == name) {
                Some(folder) => folder.photo_count += 1,
                None => folders.push(PhotoFolder {
                    name: name.to_string(),
                    photo_count: 1,
                }),
            }
        }
        folders.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(folders)
    }

    async fn list_photos(
        &self,
        folder: Option<&str>,
        limit: usize,
    ) -> Result<Vec<PhotoRecord>, BackendError> {
        let mut matching: Vec<PhotoRecord> = self
            .lock()
            .photos
            .iter()
            .filter(|photo| folder.is_none() || photo.folder.as_deref() == folder)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        matching.truncate(limit);
        Ok(matching.iter().map(|record| self.sign(record)).collect())
    }

    async fn create_photo_record(&self, meta: NewPhotoRecord) -> Result<PhotoRecord, BackendError> {
        if meta.storage_path.trim().is_empty() {
            return Err(BackendError::Request("storage_path cannot be empty".to_string()));
        }
        let record = self.add_photo(&meta.storage_path, meta.folder.as_deref(), meta.size_bytes);
        Ok(self.sign(&record))
    }

    async fn delete_photo(&self, id: &str) -> Result<(), BackendError> {
        let mut store = self.lock();
        let before = store.photos.len();
        store.photos.retain(|photo| photo.id != id);
        if store.photos.len() == before {
            return Err(BackendError::NotFound(format!("photo {id}")));
        }
        Ok(())
    }

    async fn delete_all_photos(&self) -> Result<usize, BackendError> {
        let mut store = self.lock();
        let removed = store.photos.len();
        store.photos.clear();
        Ok(removed)
    }

    async fn list_calendars(&self) -> Result<Vec<CalendarMeta>, BackendError> {
        Ok(self.lock().calendars.clone())
    }

    async fn list_events(
        &self,
        calendar_id: &str,
        range: TimeRange,
    ) -> Result<Vec<CalendarEvent>, BackendError> {
        Ok(self
            .lock()
            .events
            .iter()
            .filter(|event| event.calendar_id == calendar_id)
            .filter(|event| event.start <= range.end && event.end >= range.start)
            .cloned()
            .collect())
    }
}
