use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The data families the host fetches and pushes to widgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Calendar,
    Photos,
}

impl DataType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Calendar => "calendar",
            Self::Photos => "photos",
        }
    }

    pub const fn all() -> &'static [DataType] {
        &[DataType::Calendar, DataType::Photos]
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DataType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "calendar" => Ok(Self::Calendar),
            "photos" | "photo" => Ok(Self::Photos),
            _ => Err(format!("unknown data type: {value}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEvent {
    pub id: String,
    pub calendar_id: String,
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub all_day: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarMeta {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default)]
    pub primary: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarSnapshot {
    pub events: Vec<CalendarEvent>,
    pub calendars: Vec<CalendarMeta>,
    /// Epoch milliseconds of the refresh that produced this snapshot.
    pub last_updated: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoSnapshot {
    /// Signed URLs, valid until the backend-issued expiry.
    pub urls: Vec<String>,
    pub folder: Option<String>,
    pub count: usize,
    pub last_updated: i64,
}

/// A normalized result of one data refresh, tagged by family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "dataType", content = "data", rename_all = "lowercase")]
pub enum DataSnapshot {
    Calendar(CalendarSnapshot),
    Photos(PhotoSnapshot),
}

impl DataSnapshot {
    pub fn data_type(&self) -> DataType {
        match self {
            Self::Calendar(_) => DataType::Calendar,
            Self::Photos(_) => DataType::Photos,
        }
    }

    pub fn last_updated(&self) -> i64 {
        match self {
            Self::Calendar(snapshot) => snapshot.last_updated,
            Self::Photos(snapshot) => snapshot.last_updated,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRef {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthState {
    pub ready: bool,
    pub user: Option<UserRef>,
}

/// Directional input forwarded from the shell to the focused widget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NavigationAction {
    Up,
    Down,
    Left,
    Right,
    Enter,
    Back,
}

/// Produces a `lastUpdated` stamp that is strictly greater than `previous`,
/// even when the wall clock has not advanced (or went backwards).
pub fn next_timestamp(previous: Option<i64>) -> i64 {
    let now = Utc::now().timestamp_millis();
    match previous {
        Some(prev) if now <= prev => prev + 1,
        _ => now,
    }
}
