//! Process-wide publish/subscribe hub.
//!
//! The event bus provides:
//! - Synchronous handlers keyed by event name (`on`/`once`/`off`/`emit`),
//!   each isolated so one failing handler cannot break unrelated subsystems
//! - A broadcast channel of sequenced envelopes for long-running async loops
//!
//! # Architecture
//!
//! Components never reach into each other's state. Auth, data, theme and
//! widget lifecycle changes are requested by emitting an [`AppEvent`]:
//! - `DataManager` listens for auth and refresh requests, emits data events
//! - `WidgetMessenger` listens for auth, data and theme changes, emits widget
//!   lifecycle events
//! - `WidgetRegistrationCoordinator` listens for widget lifecycle events

mod event_bus;
pub mod event_types;

pub use event_bus::{BusEvent, EventBus, Handler, ListenerId, Subscription, DEFAULT_MAX_LISTENERS};
pub use event_types::AppEvent;
