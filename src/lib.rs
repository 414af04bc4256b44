//! Phyn Gateway Library
//!
//! This library polls the Phyn cloud for every water monitor on an account,
//! keeps the last good reading of each device and publishes typed readings
//! plus a per-cycle report to subscribed listeners.

pub mod config;
pub mod devices;
pub mod error;
pub mod listeners;
pub mod models;
pub mod phyn_api;
pub mod polling_coordinator;
pub mod registry;

#[cfg(test)]
pub(crate) mod mock_api;

// Re-export commonly used types for easier access
pub use config::{Brand, Config};
pub use devices::{DeviceReadings, DeviceVariant, PhynDevice, ReadingValue};
pub use error::{CycleFailure, FetchError, RequestError, UnrecognizedDeviceVariant};
pub use listeners::{CycleListener, CycleReport, ListenerId};
pub use phyn_api::{PhynApi, PhynClient};
pub use polling_coordinator::{CoordinatorOptions, FailurePolicy, PollingCoordinator};
