//! Typed application events and their wire names.
//!
//! Every component talks to every other component through these events; the
//! names double as the keys handlers are registered under.

use serde::{Deserialize, Serialize};

use crate::core::{DataSnapshot, DataType, NavigationAction, UserRef};

// ---------------------------------------------------------------------------
// Event names
// ---------------------------------------------------------------------------

pub const EVENT_AUTH_SUCCESS: &str = "auth-success";
pub const EVENT_AUTH_SIGNOUT: &str = "auth-signout";
pub const EVENT_DATA_LOADED: &str = "data-loaded";
pub const EVENT_DATA_ERROR: &str = "data-error";
pub const EVENT_THEME_CHANGED: &str = "theme-changed";
pub const EVENT_WIDGET_READY: &str = "widget-ready";
pub const EVENT_WIDGET_ERROR: &str = "widget-error";
pub const EVENT_UPLOAD_REQUESTED: &str = "upload-requested";
pub const EVENT_REFRESH_REQUESTED: &str = "refresh-requested";
pub const EVENT_NAVIGATION: &str = "navigation";

// ---------------------------------------------------------------------------
// Categories
// ---------------------------------------------------------------------------

pub const CATEGORY_AUTH: &str = "auth";
pub const CATEGORY_DATA: &str = "data";
pub const CATEGORY_THEME: &str = "theme";
pub const CATEGORY_WIDGET: &str = "widget";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum AppEvent {
    AuthSuccess {
        user: UserRef,
    },
    AuthSignout,
    DataLoaded {
        snapshot: DataSnapshot,
    },
    DataError {
        data_type: DataType,
        error: String,
    },
    ThemeChanged {
        theme: String,
    },
    /// A widget frame completed its handshake and was assigned a session.
    WidgetReady {
        widget: String,
        session_id: String,
    },
    WidgetError {
        widget: Option<String>,
        error: String,
        details: Option<serde_json::Value>,
    },
    UploadRequested {
        widget: Option<String>,
    },
    /// `data_type: None` asks for every data family.
    RefreshRequested {
        data_type: Option<DataType>,
        widget: Option<String>,
    },
    Navigation {
        action: NavigationAction,
    },
}

impl AppEvent {
    /// Name handlers are registered under.
    pub fn name(&self) -> &'static str {
        match self {
            AppEvent::AuthSuccess { .. } => EVENT_AUTH_SUCCESS,
            AppEvent::AuthSignout => EVENT_AUTH_SIGNOUT,
            AppEvent::DataLoaded { .. } => EVENT_DATA_LOADED,
            AppEvent::DataError { .. } => EVENT_DATA_ERROR,
            AppEvent::ThemeChanged { .. } => EVENT_THEME_CHANGED,
            AppEvent::WidgetReady { .. } => EVENT_WIDGET_READY,
            AppEvent::WidgetError { .. } => EVENT_WIDGET_ERROR,
            AppEvent::UploadRequested { .. } => EVENT_UPLOAD_REQUESTED,
            AppEvent::RefreshRequested { .. } => EVENT_REFRESH_REQUESTED,
            AppEvent::Navigation { .. } => EVENT_NAVIGATION,
        }
    }

    pub fn category(&self) -> &'static str {
        match self {
            AppEvent::AuthSuccess { .. } | AppEvent::AuthSignout => CATEGORY_AUTH,
            AppEvent::DataLoaded { .. }
            | AppEvent::DataError { .. }
            | AppEvent::RefreshRequested { .. } => CATEGORY_DATA,
            AppEvent::ThemeChanged { .. } => CATEGORY_THEME,
            AppEvent::WidgetReady { .. }
            | AppEvent::WidgetError { .. }
            | AppEvent::UploadRequested { .. }
            | AppEvent::Navigation { .. } => CATEGORY_WIDGET,
        }
    }
}
