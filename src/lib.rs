//! Hearth dashboard host library.
//!
//! Keeps the authoritative dashboard state (auth, theme, calendar, photos) on
//! the host side and propagates it to a changing set of sandboxed widget
//! frames. It handles:
//! - Fetching and caching data with staleness-driven refresh
//! - Signed photo URL regeneration ahead of expiry
//! - Deduplicated full-snapshot broadcasts to every live widget frame
//! - Widget handshakes, late widgets, and widget-initiated requests
//!
//! # Architecture
//!
//! - `bus`: event bus every component communicates through
//! - `cache`: per-key TTL cache with refresh timers
//! - `services`: backend and auth contracts, calendar and photo services
//! - `runtime`: data manager and widget registration coordinator
//! - `messenger`: state owner, widget protocol and transports
//! - `config`: host configuration
//! - `core`: shared snapshot types

pub mod bus;
pub mod cache;
pub mod config;
pub mod core;
pub mod messenger;
pub mod runtime;
pub mod services;

#[cfg(test)]
mod testing;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;

use crate::bus::{AppEvent, EventBus};
use crate::config::{ConfigError, DashboardConfig};
use crate::core::UserRef;
use crate::messenger::{TransportError, WidgetMessenger, WidgetTransport};
use crate::runtime::{DataManager, DataManagerOptions, WaitOutcome, WidgetRegistrationCoordinator};
use crate::services::{
    AuthError, BackendError, CalendarService, DataBackend, DataError, MemoryBackend,
    PhotoDataService, RestBackend, StaticTokenProvider, TokenProvider,
};

// ---------------------------------------------------------------------------
// Shared error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Backend(#[from] BackendError),
    #[error("{0}")]
    Auth(#[from] AuthError),
    #[error("{0}")]
    Data(#[from] DataError),
    #[error("{0}")]
    Transport(#[from] TransportError),
    #[error("{0}")]
    Other(String),
}

impl Serialize for AppError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

/// Install the global fmt subscriber. `RUST_LOG` overrides the default
/// filter. Safe to call more than once.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("hearth=debug,info")),
        )
        .try_init();
}

// ---------------------------------------------------------------------------
// Backend wiring
// ---------------------------------------------------------------------------

const TOKEN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Token provider for the configured access token, or one that stays
/// not-ready when none is configured.
pub fn token_provider_from_config(config: &DashboardConfig) -> Arc<StaticTokenProvider> {
    match config.backend.access_token.as_deref() {
        Some(token) => Arc::new(StaticTokenProvider::new(
            token,
            Duration::from_secs(config.backend.access_token_ttl_secs),
        )),
        None => Arc::new(StaticTokenProvider::pending()),
    }
}

/// The REST backend when a URL is configured, otherwise an in-memory backend
/// seeded with demo data.
///
/// With a URL configured, the token service must become ready within the
/// backend timeout; there is no unauthenticated fallback.
pub async fn connect_backend(
    config: &DashboardConfig,
    tokens: Arc<dyn TokenProvider>,
) -> Result<Arc<dyn DataBackend>, AppError> {
    if config.backend.base_url.is_none() {
        tracing::info!("no backend url configured, using in-memory demo backend");
        return Ok(Arc::new(MemoryBackend::with_demo_data(&config.backend.bucket)));
    }

    services::wait_until_ready(
        tokens.as_ref(),
        Duration::from_millis(config.backend.timeout_ms),
        TOKEN_POLL_INTERVAL,
    )
    .await?;
    let backend = RestBackend::connect(&config.backend, config.signed_url_ttl(), tokens)?;
    tracing::info!("connected to rest backend");
    Ok(Arc::new(backend))
}

// ---------------------------------------------------------------------------
// Host
// ---------------------------------------------------------------------------

/// Every host component, wired explicitly.
///
/// Construction order: bus, services, registration coordinator, data
/// manager, messenger. Nothing runs until [`DashboardHost::start`].
pub struct DashboardHost {
    config: DashboardConfig,
    bus: Arc<EventBus>,
    coordinator: Arc<WidgetRegistrationCoordinator>,
    data: Arc<DataManager>,
    messenger: Arc<WidgetMessenger>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl DashboardHost {
    pub fn new(
        config: DashboardConfig,
        backend: Arc<dyn DataBackend>,
        transport: Arc<dyn WidgetTransport>,
    ) -> Self {
        let bus = Arc::new(EventBus::with_max_listeners(config.max_listeners));

        let calendar = CalendarService::new(backend.clone(), config.calendar_window());
        let photos = PhotoDataService::new(
            backend,
            config.photo_folder.clone(),
            config.photo_limit,
            config.signed_url_refresh(),
        );

        let coordinator = WidgetRegistrationCoordinator::new(&bus, transport.clone());
        let data = DataManager::new(
            bus.clone(),
            calendar,
            photos,
            Some(coordinator.clone()),
            DataManagerOptions::from_config(&config),
        );
        let messenger = WidgetMessenger::new(bus.clone(), transport, config.default_theme.clone());

        Self {
            config,
            bus,
            coordinator,
            data,
            messenger,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the messenger and data manager loops.
    pub fn start(&self) {
        let mut tasks = self.tasks.lock().expect("host task mutex poisoned");
        if !tasks.is_empty() {
            tracing::warn!("dashboard host already started");
            return;
        }
        tasks.push(self.messenger.start());
        tasks.push(self.data.start());
        tracing::info!(
            manual_trigger = self.config.manual_trigger,
            expected_widgets = ?self.config.expected_widgets,
            "dashboard host started"
        );
    }

    pub fn config(&self) -> &DashboardConfig {
        &self.config
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn coordinator(&self) -> &Arc<WidgetRegistrationCoordinator> {
        &self.coordinator
    }

    pub fn data(&self) -> &Arc<DataManager> {
        &self.data
    }

    pub fn messenger(&self) -> &Arc<WidgetMessenger> {
        &self.messenger
    }

    pub fn sign_in(&self, user: UserRef) {
        self.bus.emit(AppEvent::AuthSuccess { user });
    }

    pub fn sign_out(&self) {
        self.bus.emit(AppEvent::AuthSignout);
    }

    pub fn set_theme(&self, theme: impl Into<String>) {
        self.bus.emit(AppEvent::ThemeChanged {
            theme: theme.into(),
        });
    }

    /// Leave manual-trigger mode; see [`DataManager::release`].
    pub async fn release(&self) -> Option<WaitOutcome> {
        self.data.release().await
    }

    pub fn shutdown(&self) {
        let mut tasks = self.tasks.lock().expect("host task mutex poisoned");
        for task in tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for DashboardHost {
    fn drop(&mut self) {
        self.shutdown();
    }
}
