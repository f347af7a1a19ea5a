use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::core::{AuthState, CalendarSnapshot, DataSnapshot, PhotoSnapshot, UserRef};

use super::protocol::StatePayload;

/// Authoritative host state. Only the messenger mutates it.
#[derive(Debug, Clone, PartialEq)]
pub struct SystemState {
    pub calendar: Option<CalendarSnapshot>,
    pub photos: Option<PhotoSnapshot>,
    pub auth: AuthState,
    pub theme: String,
}

impl SystemState {
    pub fn new(theme: impl Into<String>) -> Self {
        Self {
            calendar: None,
            photos: None,
            auth: AuthState::default(),
            theme: theme.into(),
        }
    }

    pub fn apply_snapshot(&mut self, snapshot: DataSnapshot) {
        match snapshot {
            DataSnapshot::Calendar(calendar) => self.calendar = Some(calendar),
            DataSnapshot::Photos(photos) => self.photos = Some(photos),
        }
    }

    pub fn sign_in(&mut self, user: UserRef) {
        self.auth = AuthState {
            ready: true,
            user: Some(user),
        };
    }

    /// Drop everything tied to the signed-in user. Theme survives.
    pub fn sign_out(&mut self) {
        self.auth = AuthState::default();
        self.calendar = None;
        self.photos = None;
    }

    pub fn baseline(&self) -> DedupBaseline {
        DedupBaseline {
            theme: self.theme.clone(),
            calendar_updated: self.calendar.as_ref().map(|c| c.last_updated),
            photos_updated: self.photos.as_ref().map(|p| p.last_updated),
            auth_ready: self.auth.ready,
            user_id: self.auth.user.as_ref().map(|u| u.id.clone()),
        }
    }

    pub fn to_payload(&self) -> StatePayload {
        StatePayload {
            calendar: self.calendar.clone(),
            photos: self.photos.clone(),
            auth: self.auth.clone(),
            theme: self.theme.clone(),
            timestamp: Utc::now().timestamp_millis(),
        }
    }
}

/// The fields compared to decide whether a frame already has the current
/// state. Snapshot contents are not compared; `lastUpdated` stands in for them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupBaseline {
    pub theme: String,
    pub calendar_updated: Option<i64>,
    pub photos_updated: Option<i64>,
    pub auth_ready: bool,
    pub user_id: Option<String>,
}

/// Opaque per-handshake identifier. A frame that reloads and handshakes again
/// gets a new one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WidgetSessionId(Uuid);

impl WidgetSessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for WidgetSessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for WidgetSessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// What the host remembers about one frame.
#[derive(Debug, Clone, Default)]
pub(crate) struct WidgetSession {
    /// Set once the frame has sent `widget-ready`.
    pub session_id: Option<WidgetSessionId>,
    pub name: Option<String>,
    pub ready_at: Option<DateTime<Utc>>,
    pub last_sent: Option<DedupBaseline>,
}

impl WidgetSession {
    pub fn registered(name: String) -> Self {
        Self {
            session_id: Some(WidgetSessionId::new()),
            name: Some(name),
            ready_at: Some(Utc::now()),
            last_sent: None,
        }
    }

    pub fn is_registered(&self) -> bool {
        self.session_id.is_some()
    }

    pub fn needs(&self, baseline: &DedupBaseline) -> bool {
        self.last_sent.as_ref() != Some(baseline)
    }
}

/// Public view of a handshaken widget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredWidget {
    pub name: String,
    pub session_id: WidgetSessionId,
    pub ready_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PhotoSnapshot;

    fn photos(last_updated: i64) -> DataSnapshot {
        DataSnapshot::Photos(PhotoSnapshot {
            urls: vec!["u".to_string()],
            folder: None,
            count: 1,
            last_updated,
        })
    }

    #[test]
    fn baseline_tracks_freshness_not_contents() {
        let mut state = SystemState::new("dark");
        state.apply_snapshot(photos(10));
        let before = state.baseline();

        let mut same_stamp = state.clone();
        if let Some(p) = same_stamp.photos.as_mut() {
            p.urls.push("another".to_string());
        }
        assert_eq!(same_stamp.baseline(), before);

        state.apply_snapshot(photos(11));
        assert_ne!(state.baseline(), before);
    }

    #[test]
    fn sign_out_keeps_theme() {
        let mut state = SystemState::new("halloween-light");
        state.sign_in(UserRef {
            id: "u1".to_string(),
            email: None,
            display_name: None,
        });
        state.apply_snapshot(photos(5));
        state.sign_out();

        assert_eq!(state, SystemState::new("halloween-light"));
    }

    #[test]
    fn any_single_baseline_field_makes_a_session_stale() {
        let sent = DedupBaseline {
            theme: "dark".to_string(),
            calendar_updated: Some(10),
            photos_updated: Some(20),
            auth_ready: true,
            user_id: Some("mom".to_string()),
        };
        let session = WidgetSession {
            last_sent: Some(sent.clone()),
            ..WidgetSession::registered("clock".to_string())
        };
        assert!(!session.needs(&sent));

        let changes: [(&str, fn(&mut DedupBaseline)); 6] = [
            ("theme", |b| b.theme = "light".to_string()),
            ("calendar newer", |b| b.calendar_updated = Some(11)),
            ("calendar cleared", |b| b.calendar_updated = None),
            ("photos newer", |b| b.photos_updated = Some(21)),
            ("auth ready only", |b| b.auth_ready = false),
            ("user", |b| b.user_id = Some("dad".to_string())),
        ];
        for (field, change) in changes {
            let mut baseline = sent.clone();
            change(&mut baseline);
            assert!(session.needs(&baseline), "{field}");
        }

        let never_loaded = DedupBaseline {
            calendar_updated: None,
            ..sent.clone()
        };
        let waiting = WidgetSession {
            last_sent: Some(never_loaded),
            ..WidgetSession::registered("calendar".to_string())
        };
        assert!(waiting.needs(&sent), "calendar appearing");
    }

    #[test]
    fn fresh_session_needs_any_baseline() {
        let session = WidgetSession::registered("clock".to_string());
        assert!(session.is_registered());
        assert!(session.needs(&SystemState::new("dark").baseline()));
    }
}
