//! Domain data services and the collaborator contracts they depend on.
//!
//! - `backend`: the opaque cloud data/storage contract ([`DataBackend`])
//! - `auth`: the token provider contract ([`TokenProvider`])
//! - `calendar` / `photos`: translate backend shapes into snapshots
//! - `rest` / `memory`: concrete backends (HTTP and in-process)

pub mod auth;
pub mod backend;
pub mod calendar;
pub mod memory;
pub mod photos;
pub mod rest;

pub use auth::{
    require_token, wait_until_ready, AuthError, StaticTokenProvider, TokenProvider, TokenResult,
};
pub use backend::{
    BackendError, DataBackend, NewPhotoRecord, PhotoFolder, PhotoRecord, StorageQuota, TimeRange,
};
pub use calendar::{CalendarRefreshOptions, CalendarService};
pub use memory::MemoryBackend;
pub use photos::{PhotoDataService, PhotoRefreshOptions};
pub use rest::RestBackend;

#[derive(Debug, thiserror::Error)]
pub enum DataError {
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
    #[error("all {count} calendars failed to load: {source}")]
    AllCalendarsFailed { count: usize, source: BackendError },
    #[error("storage quota exceeded: {used} + {requested} bytes > {limit}")]
    QuotaExceeded { used: i64, requested: i64, limit: i64 },
}
