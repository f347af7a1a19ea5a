//! Orchestrates the data services against the cache.
//!
//! The manager decides *when* to fetch (staleness, explicit requests, timers,
//! auth changes) and publishes every successful result as `data-loaded` on
//! the bus. It never talks to widgets directly.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::bus::event_types::{EVENT_AUTH_SIGNOUT, EVENT_AUTH_SUCCESS};
use crate::bus::{AppEvent, EventBus, Subscription};
use crate::cache::DataCache;
use crate::config::DashboardConfig;
use crate::core::{DataSnapshot, DataType};
use crate::runtime::registration::{WaitOptions, WaitOutcome, WidgetRegistrationCoordinator};
use crate::services::{
    CalendarRefreshOptions, CalendarService, DataError, NewPhotoRecord, PhotoDataService,
    PhotoRecord, PhotoRefreshOptions,
};

#[derive(Debug, Clone)]
pub struct DataManagerOptions {
    pub calendar_refresh: Duration,
    pub photo_refresh: Duration,
    /// Defer all loading until [`DataManager::release`].
    pub manual_trigger: bool,
    /// Widgets `release` waits for before the initial load.
    pub expected_widgets: Vec<String>,
    pub wait: WaitOptions,
}

impl DataManagerOptions {
    pub fn from_config(config: &DashboardConfig) -> Self {
        Self {
            calendar_refresh: config.calendar_refresh_interval(),
            photo_refresh: config.photo_refresh_interval(),
            manual_trigger: config.manual_trigger,
            expected_widgets: config.expected_widgets.clone(),
            wait: WaitOptions {
                timeout: config.widget_wait_timeout(),
                min_wait: config.widget_min_wait(),
            },
        }
    }
}

impl Default for DataManagerOptions {
    fn default() -> Self {
        Self {
            calendar_refresh: Duration::from_secs(5 * 60),
            photo_refresh: Duration::from_secs(30 * 60),
            manual_trigger: false,
            expected_widgets: Vec::new(),
            wait: WaitOptions::default(),
        }
    }
}

pub struct DataManager {
    me: Weak<DataManager>,
    bus: Arc<EventBus>,
    cache: DataCache<DataSnapshot>,
    calendar: CalendarService,
    photos: PhotoDataService,
    coordinator: Option<Arc<WidgetRegistrationCoordinator>>,
    options: DataManagerOptions,
    /// Bumped on sign-out; fetches started under an older value are dropped.
    generation: AtomicU64,
    released: AtomicBool,
    signed_in: AtomicBool,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl DataManager {
    pub fn new(
        bus: Arc<EventBus>,
        calendar: CalendarService,
        photos: PhotoDataService,
        coordinator: Option<Arc<WidgetRegistrationCoordinator>>,
        options: DataManagerOptions,
    ) -> Arc<Self> {
        let manager = Arc::new_cyclic(|me| Self {
            me: me.clone(),
            bus,
            cache: DataCache::new(),
            calendar,
            photos,
            coordinator,
            released: AtomicBool::new(!options.manual_trigger),
            options,
            generation: AtomicU64::new(0),
            signed_in: AtomicBool::new(false),
            subscriptions: Mutex::new(Vec::new()),
        });
        manager.initialize_cache();

        // Auth transitions are applied inside `emit`, before any fetch that
        // completes afterwards can check the generation.
        let weak = Arc::downgrade(&manager);
        let signed_in = manager.bus.on(EVENT_AUTH_SUCCESS, move |_| {
            if let Some(manager) = weak.upgrade() {
                manager.signed_in.store(true, Ordering::SeqCst);
            }
        });
        let weak = Arc::downgrade(&manager);
        let signed_out = manager.bus.on(EVENT_AUTH_SIGNOUT, move |_| {
            if let Some(manager) = weak.upgrade() {
                manager.sign_out();
            }
        });
        manager
            .subscriptions
            .lock()
            .expect("data manager subscription mutex poisoned")
            .extend([signed_in, signed_out]);
        manager
    }

    fn initialize_cache(&self) {
        self.cache
            .initialize(DataType::Calendar.as_str(), self.options.calendar_refresh, None);
        self.cache
            .initialize(DataType::Photos.as_str(), self.options.photo_refresh, None);
    }

    /// Spawn the bus listener loop.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let mut events = self.bus.subscribe();
        tokio::spawn(async move {
            tracing::info!(manual_trigger = manager.options.manual_trigger, "data manager started");
            loop {
                match events.recv().await {
                    Ok(envelope) => manager.handle_event(&envelope.event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "data manager lagged behind the event bus");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// React to one bus event. Fetches are spawned, so this never blocks on
    /// the backend. The auth flags themselves were already updated by the
    /// synchronous handlers registered in [`DataManager::new`].
    pub fn handle_event(&self, event: &AppEvent) {
        match event {
            AppEvent::AuthSuccess { user } => {
                if !self.is_signed_in() {
                    tracing::debug!(user = %user.id, "signed out again before the load started");
                } else if self.is_released() {
                    tracing::info!(user = %user.id, "signed in, loading data");
                    self.spawn_load_all(false);
                } else {
                    tracing::info!(
                        user = %user.id,
                        "signed in, initial load deferred until release"
                    );
                }
            }
            AppEvent::RefreshRequested { data_type, widget } => {
                tracing::debug!(data_type = ?data_type, widget = ?widget, "refresh requested");
                match data_type {
                    Some(data_type) => self.spawn_refresh(*data_type, true),
                    None => self.spawn_load_all(true),
                }
            }
            AppEvent::UploadRequested { widget } => {
                tracing::info!(widget = ?widget, "upload requested, no upload handler attached");
            }
            _ => {}
        }
    }

    /// Latest cached snapshot, possibly stale.
    pub fn current(&self, data_type: DataType) -> Option<DataSnapshot> {
        self.cache.get(data_type.as_str(), true)
    }

    pub fn is_loading(&self, data_type: DataType) -> bool {
        self.cache.is_loading(data_type.as_str())
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    pub fn is_signed_in(&self) -> bool {
        self.signed_in.load(Ordering::SeqCst)
    }

    pub fn photos(&self) -> &PhotoDataService {
        &self.photos
    }

    /// Load `data_type` unless a fetch is already in flight or (without
    /// `force`) the cached copy is still fresh.
    ///
    /// Returns the snapshot now held for the type. A fetch error is also
    /// published as `data-error`; the cached data is left untouched and the
    /// regular timer retries later.
    pub async fn refresh(
        &self,
        data_type: DataType,
        force: bool,
    ) -> Result<Option<DataSnapshot>, DataError> {
        let key = data_type.as_str();
        // Read before the sign-in check so a sign-out racing with it still
        // invalidates this fetch.
        let generation = self.generation.load(Ordering::SeqCst);
        if !self.is_released() {
            tracing::debug!(%data_type, "refresh deferred until release");
            return Ok(self.current(data_type));
        }
        if !self.is_signed_in() {
            tracing::debug!(%data_type, "not signed in, skipping refresh");
            return Ok(self.current(data_type));
        }
        if self.cache.is_loading(key) {
            tracing::debug!(%data_type, "refresh already in flight");
            return Ok(self.current(data_type));
        }
        if !force {
            if let Some(fresh) = self.cache.get(key, false) {
                return Ok(Some(fresh));
            }
        }
        if !self.cache.try_begin_loading(key) {
            return Ok(self.current(data_type));
        }

        let result = self.fetch(data_type).await;
        if self.generation.load(Ordering::SeqCst) != generation {
            tracing::debug!(%data_type, "session changed during fetch, discarding result");
            return Ok(None);
        }

        match result {
            Ok(snapshot) => {
                self.cache.set(key, snapshot.clone());
                self.schedule(data_type);
                if data_type == DataType::Photos {
                    self.arm_url_refresh();
                }
                self.bus.emit(AppEvent::DataLoaded {
                    snapshot: snapshot.clone(),
                });
                Ok(Some(snapshot))
            }
            Err(error) => {
                tracing::warn!(%data_type, %error, "data refresh failed, keeping cached data");
                self.cache.set_loading(key, false);
                self.schedule(data_type);
                self.bus.emit(AppEvent::DataError {
                    data_type,
                    error: error.to_string(),
                });
                Err(error)
            }
        }
    }

    async fn fetch(&self, data_type: DataType) -> Result<DataSnapshot, DataError> {
        match data_type {
            DataType::Calendar => self
                .calendar
                .refresh(CalendarRefreshOptions::default())
                .await
                .map(DataSnapshot::Calendar),
            DataType::Photos => self
                .photos
                .refresh(PhotoRefreshOptions::default())
                .await
                .map(DataSnapshot::Photos),
        }
    }

    /// Refresh every data type concurrently.
    pub async fn load_all(&self, force: bool) {
        let (calendar, photos) = futures::join!(
            self.refresh(DataType::Calendar, force),
            self.refresh(DataType::Photos, force)
        );
        for (data_type, result) in [(DataType::Calendar, calendar), (DataType::Photos, photos)] {
            if let Err(error) = result {
                tracing::debug!(%data_type, %error, "initial load incomplete");
            }
        }
    }

    /// Leave manual-trigger mode and run the deferred initial load, after
    /// waiting (bounded) for the expected widgets.
    ///
    /// Returns the wait outcome when a wait happened. Calling it again is a
    /// no-op.
    pub async fn release(&self) -> Option<WaitOutcome> {
        if self.released.swap(true, Ordering::SeqCst) {
            tracing::debug!("data manager already released");
            return None;
        }

        let outcome = match &self.coordinator {
            Some(coordinator) if !self.options.expected_widgets.is_empty() => Some(
                coordinator
                    .wait_for_widgets(&self.options.expected_widgets, self.options.wait)
                    .await,
            ),
            _ => None,
        };

        if self.is_signed_in() {
            tracing::info!("released, running initial data load");
            self.load_all(false).await;
        } else {
            tracing::info!("released, initial load waits for sign-in");
        }
        outcome
    }

    /// Record an upload, then refresh photos so widgets see it.
    pub async fn record_upload(&self, meta: NewPhotoRecord) -> Result<PhotoRecord, DataError> {
        let record = self.photos.record_upload(meta).await?;
        self.spawn_refresh(DataType::Photos, true);
        Ok(record)
    }

    pub async fn delete_photo(&self, id: &str) -> Result<(), DataError> {
        self.photos.delete_photo(id).await?;
        self.spawn_refresh(DataType::Photos, true);
        Ok(())
    }

    fn sign_out(&self) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.signed_in.store(false, Ordering::SeqCst);
        self.photos.cancel_url_refresh();
        self.cache.clear_all();
        self.initialize_cache();
        tracing::info!(generation, "signed out, data cache cleared");
    }

    fn schedule(&self, data_type: DataType) {
        let manager = self.me.clone();
        self.cache.schedule_refresh(data_type.as_str(), move || async move {
            let Some(manager) = manager.upgrade() else {
                return;
            };
            tracing::debug!(%data_type, "scheduled refresh");
            // Errors are already published as data-error.
            let _ = manager.refresh(data_type, true).await;
        });
    }

    fn arm_url_refresh(&self) {
        let manager = self.me.clone();
        let armed = self.photos.ensure_url_refresh(move || {
            let manager = manager.clone();
            async move {
                if let Some(manager) = manager.upgrade() {
                    let _ = manager.refresh(DataType::Photos, true).await;
                }
            }
        });
        if armed {
            tracing::debug!("signed url regeneration armed");
        }
    }

    fn spawn_refresh(&self, data_type: DataType, force: bool) {
        let Some(manager) = self.me.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            let _ = manager.refresh(data_type, force).await;
        });
    }

    fn spawn_load_all(&self, force: bool) {
        let Some(manager) = self.me.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            manager.load_all(force).await;
        });
    }
}

impl Drop for DataManager {
    fn drop(&mut self) {
        if let Ok(subscriptions) = self.subscriptions.get_mut() {
            for subscription in subscriptions.drain(..) {
                subscription.unsubscribe();
            }
        }
    }
}
