//! Long-running host components driven by bus events.

pub mod data_manager;
pub mod registration;

pub use data_manager::{DataManager, DataManagerOptions};
pub use registration::{WaitOptions, WaitOutcome, WidgetRegistrationCoordinator};
