//! Host/widget wire messages.
//!
//! Outbound traffic is always the complete state snapshot, never a delta, so
//! any single delivered message fully resynchronizes a widget.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::{AuthState, CalendarSnapshot, DataType, NavigationAction, PhotoSnapshot};

pub const MSG_WIDGET_READY: &str = "widget-ready";
pub const MSG_WIDGET_ERROR: &str = "widget-error";
pub const MSG_REQUEST_UPLOAD_MODAL: &str = "request-upload-modal";
pub const MSG_REQUEST_REFRESH: &str = "request-refresh";

/// A message posted by a widget frame, after parsing.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    WidgetReady {
        widget: String,
    },
    WidgetError {
        widget: Option<String>,
        error: String,
        details: Option<Value>,
    },
    RequestUploadModal {
        widget: Option<String>,
    },
    RequestRefresh {
        widget: Option<String>,
        data_type: Option<DataType>,
    },
    /// Plain `{ action }` with no `type` field.
    Navigation {
        action: NavigationAction,
    },
    /// Anything else, including malformed known types.
    Unknown {
        kind: Option<String>,
    },
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum TypedInbound {
    WidgetReady {
        widget: String,
    },
    WidgetError {
        #[serde(default)]
        widget: Option<String>,
        #[serde(default)]
        error: Option<Value>,
        #[serde(default)]
        details: Option<Value>,
    },
    RequestUploadModal {
        #[serde(default)]
        widget: Option<String>,
    },
    RequestRefresh {
        #[serde(default)]
        widget: Option<String>,
        #[serde(default, rename = "dataType")]
        data_type: Option<String>,
    },
}

impl InboundMessage {
    pub fn parse(raw: &Value) -> Self {
        match raw.get("type") {
            Some(Value::String(kind)) => match serde_json::from_value::<TypedInbound>(raw.clone()) {
                Ok(typed) => typed.into(),
                Err(_) => InboundMessage::Unknown {
                    kind: Some(kind.clone()),
                },
            },
            Some(_) => InboundMessage::Unknown { kind: None },
            None => raw
                .get("action")
                .and_then(|action| serde_json::from_value::<NavigationAction>(action.clone()).ok())
                .map(|action| InboundMessage::Navigation { action })
                .unwrap_or(InboundMessage::Unknown { kind: None }),
        }
    }
}

impl From<TypedInbound> for InboundMessage {
    fn from(typed: TypedInbound) -> Self {
        match typed {
            TypedInbound::WidgetReady { widget } => InboundMessage::WidgetReady { widget },
            TypedInbound::WidgetError {
                widget,
                error,
                details,
            } => InboundMessage::WidgetError {
                widget,
                error: match error {
                    Some(Value::String(message)) => message,
                    Some(other) => other.to_string(),
                    None => "unspecified widget error".to_string(),
                },
                details,
            },
            TypedInbound::RequestUploadModal { widget } => {
                InboundMessage::RequestUploadModal { widget }
            }
            TypedInbound::RequestRefresh { widget, data_type } => {
                // An unrecognized dataType degrades to "refresh everything".
                let data_type = data_type.and_then(|value| value.parse().ok());
                InboundMessage::RequestRefresh { widget, data_type }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpdateAction {
    StateUpdate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatePayload {
    pub calendar: Option<CalendarSnapshot>,
    pub photos: Option<PhotoSnapshot>,
    pub auth: AuthState,
    pub theme: String,
    /// Epoch milliseconds at send time.
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum OutboundMessage {
    WidgetUpdate {
        action: UpdateAction,
        payload: StatePayload,
    },
    WidgetCommand {
        action: NavigationAction,
    },
}

impl OutboundMessage {
    pub fn state_update(payload: StatePayload) -> Self {
        OutboundMessage::WidgetUpdate {
            action: UpdateAction::StateUpdate,
            payload,
        }
    }
}
