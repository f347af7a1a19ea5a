use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;

use crate::core::{next_timestamp, CalendarSnapshot};
use crate::services::backend::{DataBackend, TimeRange};
use crate::services::DataError;

#[derive(Debug, Clone, Default)]
pub struct CalendarRefreshOptions {
    /// Overrides the configured window around now.
    pub range: Option<TimeRange>,
}

/// Fetches calendars and their events and normalizes them into a
/// [`CalendarSnapshot`].
pub struct CalendarService {
    backend: Arc<dyn DataBackend>,
    behind: Duration,
    ahead: Duration,
    last_updated: Mutex<Option<i64>>,
}

impl CalendarService {
    pub fn new(backend: Arc<dyn DataBackend>, window: (Duration, Duration)) -> Self {
        Self {
            backend,
            behind: window.0,
            ahead: window.1,
            last_updated: Mutex::new(None),
        }
    }

    /// Load every calendar's events in the window, merged and sorted by start.
    ///
    /// One failing calendar is skipped; only when every calendar fails is the
    /// refresh reported as an error.
    pub async fn refresh(
        &self,
        options: CalendarRefreshOptions,
    ) -> Result<CalendarSnapshot, DataError> {
        let range = options
            .range
            .unwrap_or_else(|| TimeRange::around(Utc::now(), self.behind, self.ahead));
        let calendars = self.backend.list_calendars().await?;

        let results = join_all(
            calendars
                .iter()
                .map(|calendar| self.backend.list_events(&calendar.id, range)),
        )
        .await;

        let mut events = Vec::new();
        let mut failures = 0usize;
        let mut last_error = None;
        for (calendar, result) in calendars.iter().zip(results) {
            match result {
                Ok(batch) => events.extend(batch),
                Err(error) => {
                    tracing::warn!(
                        calendar = %calendar.id,
                        %error,
                        "failed to load calendar events"
                    );
                    failures += 1;
                    last_error = Some(error);
                }
            }
        }
        if let Some(error) = last_error {
            if failures == calendars.len() {
                return Err(DataError::AllCalendarsFailed {
                    count: failures,
                    source: error,
                });
            }
        }

        let mut seen = HashSet::new();
        events.retain(|event| seen.insert(event.id.clone()));
        events.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.id.cmp(&b.id)));

        let last_updated = {
            let mut guard = self.last_updated.lock().expect("calendar stamp mutex poisoned");
            let stamp = next_timestamp(*guard);
            *guard = Some(stamp);
            stamp
        };

        tracing::debug!(
            calendars = calendars.len(),
            events = events.len(),
            "calendar refresh complete"
        );
        Ok(CalendarSnapshot {
            events,
            calendars,
            last_updated,
        })
    }
}
