//! Tracks which widgets have completed their ready handshake and lets the
//! host wait (bounded) for a set of them before the initial data load.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::bus::event_types::{EVENT_AUTH_SIGNOUT, EVENT_WIDGET_READY};
use crate::bus::{AppEvent, EventBus, Subscription};
use crate::messenger::WidgetTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOptions {
    pub timeout: Duration,
    /// Total time the wait takes at minimum, even if every widget is
    /// already registered.
    pub min_wait: Duration,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            min_wait: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitOutcome {
    pub success: bool,
    pub registered: Vec<String>,
    pub timed_out: Vec<String>,
}

pub struct WidgetRegistrationCoordinator {
    registered: Mutex<HashMap<String, DateTime<Utc>>>,
    announcements: broadcast::Sender<String>,
    transport: Arc<dyn WidgetTransport>,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl WidgetRegistrationCoordinator {
    /// Create the coordinator and hook it to `widget-ready` and
    /// `auth-signout` on the bus.
    pub fn new(bus: &EventBus, transport: Arc<dyn WidgetTransport>) -> Arc<Self> {
        let (announcements, _) = broadcast::channel(64);
        let coordinator = Arc::new(Self {
            registered: Mutex::new(HashMap::new()),
            announcements,
            transport,
            subscriptions: Mutex::new(Vec::new()),
        });

        let weak = Arc::downgrade(&coordinator);
        let ready = bus.on(EVENT_WIDGET_READY, move |event| {
            if let (AppEvent::WidgetReady { widget, .. }, Some(coordinator)) =
                (event, weak.upgrade())
            {
                coordinator.mark_registered(widget);
            }
        });
        let weak = Arc::downgrade(&coordinator);
        let signout = bus.on(EVENT_AUTH_SIGNOUT, move |_| {
            if let Some(coordinator) = weak.upgrade() {
                coordinator.reset();
            }
        });
        coordinator
            .subscriptions
            .lock()
            .expect("coordinator subscription mutex poisoned")
            .extend([ready, signout]);
        coordinator
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, DateTime<Utc>>> {
        self.registered.lock().expect("coordinator registry mutex poisoned")
    }

    /// Unregistered -> Registered. Repeated handshakes keep the first time.
    pub fn mark_registered(&self, widget: &str) {
        let newly = {
            let mut registered = self.lock();
            if registered.contains_key(widget) {
                false
            } else {
                registered.insert(widget.to_string(), Utc::now());
                true
            }
        };
        if newly {
            tracing::debug!(widget, "widget registered");
        }
        // Waiters filter by name, so a repeat announcement is harmless.
        let _ = self.announcements.send(widget.to_string());
    }

    pub fn is_registered(&self, widget: &str) -> bool {
        self.lock().contains_key(widget)
    }

    pub fn registered(&self) -> Vec<String> {
        let registered = self.lock();
        let mut names: Vec<(DateTime<Utc>, String)> = registered
            .iter()
            .map(|(name, at)| (*at, name.clone()))
            .collect();
        names.sort();
        names.into_iter().map(|(_, name)| name).collect()
    }

    pub fn reset(&self) {
        let cleared = {
            let mut registered = self.lock();
            let count = registered.len();
            registered.clear();
            count
        };
        tracing::debug!(cleared, "widget registrations reset");
    }

    /// Wait until every name in `names` has registered or `timeout` passes.
    ///
    /// A timeout is not an error: the outcome lists what arrived and what did
    /// not, and the shortfall is logged.
    pub async fn wait_for_widgets<S: AsRef<str>>(
        &self,
        names: &[S],
        options: WaitOptions,
    ) -> WaitOutcome {
        let started = Instant::now();
        let deadline = started + options.timeout;
        // Subscribe before scanning so a registration between the scan and
        // the first recv is not lost.
        let mut announcements = self.announcements.subscribe();

        let mut pending: Vec<String> = Vec::new();
        for name in names {
            let name = name.as_ref().to_string();
            if !pending.contains(&name) {
                pending.push(name);
            }
        }

        let loaded_frames: HashSet<String> = self
            .transport
            .frames()
            .into_iter()
            .filter(|frame| frame.loaded)
            .filter_map(|frame| frame.widget)
            .collect();
        let mut registered = Vec::new();
        pending.retain(|name| {
            let present = self.is_registered(name) || loaded_frames.contains(name);
            if present {
                registered.push(name.clone());
            }
            !present
        });

        while !pending.is_empty() {
            match tokio::time::timeout_at(deadline, announcements.recv()).await {
                Ok(Ok(name)) => {
                    if let Some(index) = pending.iter().position(|candidate| *candidate == name) {
                        registered.push(pending.remove(index));
                    }
                }
                Ok(Err(broadcast::error::RecvError::Lagged(_))) => {
                    pending.retain(|name| {
                        let present = self.is_registered(name);
                        if present {
                            registered.push(name.clone());
                        }
                        !present
                    });
                }
                Ok(Err(broadcast::error::RecvError::Closed)) | Err(_) => break,
            }
        }

        let elapsed = started.elapsed();
        if elapsed < options.min_wait {
            tokio::time::sleep(options.min_wait - elapsed).await;
        }

        if pending.is_empty() {
            tracing::info!(widgets = ?registered, "all expected widgets registered");
        } else {
            tracing::warn!(
                registered = ?registered,
                timed_out = ?pending,
                timeout_ms = options.timeout.as_millis() as u64,
                "continuing without every expected widget"
            );
        }

        WaitOutcome {
            success: pending.is_empty(),
            registered,
            timed_out: pending,
        }
    }
}

impl Drop for WidgetRegistrationCoordinator {
    fn drop(&mut self) {
        if let Ok(subscriptions) = self.subscriptions.get_mut() {
            for subscription in subscriptions.drain(..) {
                subscription.unsubscribe();
            }
        }
    }
}
