use crate::config::{
    DEFAULT_DEVICE_TIMEOUT_SECS, DEFAULT_FIRMWARE_CHECK_CYCLES, DEFAULT_POLL_INTERVAL_SECS,
};
use crate::devices::{DeviceIdentity, PhynDevice, UpdateContext};
use crate::error::{CycleFailure, FetchError, UnrecognizedDeviceVariant};
use crate::listeners::{CycleListener, CycleReport, ListenerId, Listeners};
use crate::models::Home;
use crate::phyn_api::PhynApi;
use crate::registry::DeviceRegistry;
use chrono::{DateTime, Utc};
use serde_derive::Serialize;
use std::future::Future;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// What a cycle does after a device fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Stop at the first failing device; devices after it keep their previous snapshot
    #[default]
    AbortOnFirst,
    /// Keep polling the remaining devices; only the failing ones go stale
    IsolateDevices,
}

#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    pub update_interval: Duration,
    /// Budget for one device's whole update, firmware check included
    pub device_deadline: Duration,
    /// Firmware is checked every this many successful updates of a device
    pub firmware_cadence: NonZeroU64,
    pub failure_policy: FailurePolicy,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            update_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            device_deadline: Duration::from_secs(DEFAULT_DEVICE_TIMEOUT_SECS),
            firmware_cadence: NonZeroU64::new(DEFAULT_FIRMWARE_CHECK_CYCLES)
                .unwrap_or(NonZeroU64::MIN),
            failure_policy: FailurePolicy::AbortOnFirst,
        }
    }
}

/// Aggregate freshness of the data the coordinator publishes
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CoordinatorHealth {
    pub cycles: u64,
    pub last_update_success: bool,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
}

impl CoordinatorHealth {
    fn record(&mut self, report: &CycleReport) {
        self.cycles += 1;
        self.last_update_success = report.success;
        if report.success {
            self.last_success_at = Some(report.completed_at);
            self.consecutive_failures = 0;
        } else {
            self.last_failure_at = Some(report.completed_at);
            self.last_error = report.error.clone();
            self.consecutive_failures += 1;
        }
    }
}

/// Polls every registered Phyn device on a fixed interval.
/// Cycles run one at a time and devices are updated sequentially within a cycle.
pub struct PollingCoordinator {
    api: Arc<dyn PhynApi>,
    options: CoordinatorOptions,
    devices: DeviceRegistry,
    listeners: Listeners,
    health: Mutex<CoordinatorHealth>,
    cycle_count: AtomicU64,
}

impl PollingCoordinator {
    pub fn new(api: Arc<dyn PhynApi>, options: CoordinatorOptions) -> Self {
        Self {
            api,
            options,
            devices: DeviceRegistry::new(),
            listeners: Listeners::default(),
            health: Mutex::new(CoordinatorHealth::default()),
            cycle_count: AtomicU64::new(0),
        }
    }

    pub fn options(&self) -> &CoordinatorOptions {
        &self.options
    }

    /// Registers the adapter matching `product_code`.
    /// Unknown product codes are logged and leave the registry unchanged.
    pub fn add_device(
        &mut self,
        home_id: &str,
        device_id: &str,
        product_code: &str,
    ) -> Result<Arc<PhynDevice>, UnrecognizedDeviceVariant> {
        let identity = DeviceIdentity {
            home_id: home_id.to_string(),
            device_id: device_id.to_string(),
            product_code: product_code.to_string(),
        };
        match PhynDevice::new(identity) {
            Some(device) => {
                info!(
                    home_id,
                    device_id,
                    product_code,
                    variant = ?device.variant(),
                    "Registered Phyn device"
                );
                Ok(self.devices.add(device))
            }
            None => {
                let error = UnrecognizedDeviceVariant {
                    home_id: home_id.to_string(),
                    device_id: device_id.to_string(),
                    product_code: product_code.to_string(),
                };
                warn!("Skipping device: {}", error);
                Err(error)
            }
        }
    }

    /// Registers every device of every home, skipping unknown product codes.
    /// Returns how many devices were registered.
    pub fn register_homes(&mut self, homes: &[Home]) -> usize {
        let mut registered = 0;
        for home in homes {
            debug!(
                home_id = %home.id,
                alias = home.alias_name.as_deref().unwrap_or("-"),
                devices = home.devices.len(),
                "Discovered home"
            );
            for device in &home.devices {
                if self
                    .add_device(&home.id, &device.device_id, &device.product_code)
                    .is_ok()
                {
                    registered += 1;
                }
            }
        }
        registered
    }

    pub fn devices(&self) -> &[Arc<PhynDevice>] {
        self.devices.as_slice()
    }

    pub fn device(&self, device_id: &str) -> Option<&Arc<PhynDevice>> {
        self.devices.get(device_id)
    }

    pub fn subscribe(&self, listener: impl CycleListener + 'static) -> ListenerId {
        self.listeners.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.listeners.unsubscribe(id)
    }

    pub fn health(&self) -> CoordinatorHealth {
        self.health
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// One-time initialization of every device, run before the first cycle
    pub async fn setup(&self) -> Result<(), FetchError> {
        for device in self.devices.iter() {
            device
                .setup(self.api.as_ref(), self.options.device_deadline)
                .await?;
        }
        info!("Set up {} Phyn device(s)", self.devices.len());
        Ok(())
    }

    /// Updates every registered device once and notifies listeners of the outcome
    pub async fn run_cycle(&self) -> Result<(), CycleFailure> {
        let cycle = self.cycle_count.fetch_add(1, Ordering::Relaxed);
        let ctx = UpdateContext::new(self.options.device_deadline, self.options.firmware_cadence);
        debug!(cycle, devices = self.devices.len(), "Starting poll cycle");

        let mut failures = Vec::new();
        for device in self.devices.iter() {
            if let Err(error) = device.update(self.api.as_ref(), &ctx).await {
                warn!(device_id = device.device_id(), %error, "Device update failed");
                failures.push(error);
                if self.options.failure_policy == FailurePolicy::AbortOnFirst {
                    break;
                }
            }
        }

        let result = if failures.is_empty() {
            Ok(())
        } else {
            Err(CycleFailure { failures })
        };
        let report = CycleReport::new(cycle, &result);
        self.health
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(&report);
        self.listeners.notify(&report);
        result
    }

    /// Runs a cycle immediately and then every `update_interval` until `shutdown` resolves.
    /// A failed cycle is logged and the schedule carries on.
    pub async fn run<S>(&self, shutdown: S)
    where
        S: Future<Output = ()>,
    {
        info!(
            "Polling {} device(s) every {:?}",
            self.devices.len(),
            self.options.update_interval
        );
        let mut ticker = interval(self.options.update_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Polling coordinator shutting down");
                    return;
                }
                _ = ticker.tick() => {}
            }

            if let Err(failure) = self.run_cycle().await {
                error!("Error fetching Phyn data: {}", failure);
            }
        }
    }
}
