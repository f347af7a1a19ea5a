//! Shared domain types used across the bus, services and messenger.

pub mod snapshot;

pub use snapshot::{
    next_timestamp, AuthState, CalendarEvent, CalendarMeta, CalendarSnapshot, DataSnapshot,
    DataType, NavigationAction, PhotoSnapshot, UserRef,
};
