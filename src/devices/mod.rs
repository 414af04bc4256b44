//! Device adapters, one per Phyn product line.
//!
//! Each adapter fetches its device's telemetry from the cloud, keeps the last
//! good result as an immutable snapshot and derives typed readings from it.
//! A refresh either commits a complete new snapshot or leaves the previous
//! one in place, so readers never observe a half-updated device.

mod classic;
mod plus;
mod water_sensor;

pub use classic::ClassicDevice;
pub use plus::PlusDevice;
pub use water_sensor::WaterSensorDevice;

use crate::error::{FetchError, RequestError};
use crate::models::FirmwareInfo;
use crate::phyn_api::PhynApi;
use chrono::{DateTime, Local, NaiveDate, Utc};
use serde_derive::Serialize;
use std::collections::BTreeMap;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tracing::debug;

/// Identity of a device as reported by the account's home listing
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DeviceIdentity {
    pub home_id: String,
    pub device_id: String,
    pub product_code: String,
}

/// Product lines with a known adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DeviceVariant {
    Classic,
    Plus,
    WaterSensor,
}

impl DeviceVariant {
    pub fn from_product_code(product_code: &str) -> Option<Self> {
        match product_code {
            "PP1" | "PP2" => Some(DeviceVariant::Plus),
            "PC1" => Some(DeviceVariant::Classic),
            "PW1" => Some(DeviceVariant::WaterSensor),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadingKind {
    Sensor,
    BinarySensor,
    Valve,
    Update,
}

/// A named reading a device publishes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReadingBinding {
    pub key: &'static str,
    pub name: &'static str,
    pub kind: ReadingKind,
    pub unit: Option<&'static str>,
}

impl ReadingBinding {
    pub(crate) const fn sensor(key: &'static str, name: &'static str, unit: &'static str) -> Self {
        Self {
            key,
            name,
            kind: ReadingKind::Sensor,
            unit: Some(unit),
        }
    }

    pub(crate) const fn flag(key: &'static str, name: &'static str, kind: ReadingKind) -> Self {
        Self {
            key,
            name,
            kind,
            unit: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ReadingValue {
    Number(f64),
    Flag(bool),
}

impl From<f64> for ReadingValue {
    fn from(value: f64) -> Self {
        ReadingValue::Number(value)
    }
}

impl From<bool> for ReadingValue {
    fn from(value: bool) -> Self {
        ReadingValue::Flag(value)
    }
}

/// Freshness of one device's cached data
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeviceStatus {
    pub last_updated: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Everything a device currently publishes, ready for serialization
#[derive(Debug, Clone, Serialize)]
pub struct DeviceReadings {
    #[serde(flatten)]
    pub identity: DeviceIdentity,
    pub online: bool,
    pub firmware_version: Option<String>,
    #[serde(flatten)]
    pub status: DeviceStatus,
    pub readings: BTreeMap<&'static str, Option<ReadingValue>>,
}

/// Parameters shared by every device update within one cycle
#[derive(Debug, Clone)]
pub struct UpdateContext {
    pub deadline: Duration,
    pub firmware_cadence: NonZeroU64,
    pub today: NaiveDate,
    pub now: DateTime<Utc>,
}

impl UpdateContext {
    pub fn new(deadline: Duration, firmware_cadence: NonZeroU64) -> Self {
        Self {
            deadline,
            firmware_cadence,
            today: Local::now().date_naive(),
            now: Utc::now(),
        }
    }
}

/// Last committed value, replaced wholesale by a single pointer swap
#[derive(Debug, Default)]
pub(crate) struct Snapshot<T> {
    current: RwLock<Arc<T>>,
}

impl<T> Snapshot<T> {
    pub fn load(&self) -> Arc<T> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn store(&self, value: T) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(value);
    }
}

/// Bookkeeping common to every adapter
#[derive(Debug)]
pub(crate) struct DeviceCore {
    identity: DeviceIdentity,
    update_count: AtomicU64,
    status: Mutex<DeviceStatus>,
}

impl DeviceCore {
    fn new(identity: DeviceIdentity) -> Self {
        Self {
            identity,
            update_count: AtomicU64::new(0),
            status: Mutex::new(DeviceStatus::default()),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.identity.device_id
    }

    /// Firmware is checked on successful-update counts 0, N, 2N, ...
    pub fn firmware_due(&self, cadence: NonZeroU64) -> bool {
        self.update_count.load(Ordering::Relaxed) % cadence.get() == 0
    }

    /// Refreshes firmware info when due, otherwise carries the previous info forward.
    /// A response that is not exactly one entry keeps the previous info too.
    pub async fn refresh_firmware(
        &self,
        api: &dyn PhynApi,
        ctx: &UpdateContext,
        previous: Option<&FirmwareInfo>,
    ) -> Result<Option<FirmwareInfo>, RequestError> {
        if !self.firmware_due(ctx.firmware_cadence) {
            return Ok(previous.cloned());
        }
        let mut latest = api.get_latest_firmware_info(self.device_id()).await?;
        if latest.len() == 1 {
            debug!(device_id = self.device_id(), "Updated firmware information");
            Ok(latest.pop())
        } else {
            debug!(
                device_id = self.device_id(),
                entries = latest.len(),
                "Ignoring ambiguous firmware information"
            );
            Ok(previous.cloned())
        }
    }

    fn record_success(&self, now: DateTime<Utc>) {
        self.update_count.fetch_add(1, Ordering::Relaxed);
        let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
        status.last_updated = Some(now);
        status.last_error = None;
    }

    fn record_failure(&self, error: &FetchError) {
        let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
        status.last_error = Some(error.to_string());
    }
}

/// Firmware update availability given installed and latest versions
pub(crate) fn firmware_update_available(
    installed: Option<String>,
    latest: Option<&FirmwareInfo>,
) -> bool {
    match (installed, latest) {
        (Some(installed), Some(latest)) => latest.is_newer_than(&installed),
        _ => false,
    }
}

/// A registered device, closed over the supported product lines
#[derive(Debug)]
pub enum PhynDevice {
    Classic(ClassicDevice),
    Plus(PlusDevice),
    WaterSensor(WaterSensorDevice),
}

impl PhynDevice {
    /// Builds the adapter for `identity`, or `None` for an unknown product code
    pub fn new(identity: DeviceIdentity) -> Option<Self> {
        let variant = DeviceVariant::from_product_code(&identity.product_code)?;
        let device = match variant {
            DeviceVariant::Classic => PhynDevice::Classic(ClassicDevice::new(identity)),
            DeviceVariant::Plus => PhynDevice::Plus(PlusDevice::new(identity)),
            DeviceVariant::WaterSensor => {
                PhynDevice::WaterSensor(WaterSensorDevice::new(identity))
            }
        };
        Some(device)
    }

    fn core(&self) -> &DeviceCore {
        match self {
            PhynDevice::Classic(device) => &device.core,
            PhynDevice::Plus(device) => &device.core,
            PhynDevice::WaterSensor(device) => &device.core,
        }
    }

    pub fn variant(&self) -> DeviceVariant {
        match self {
            PhynDevice::Classic(_) => DeviceVariant::Classic,
            PhynDevice::Plus(_) => DeviceVariant::Plus,
            PhynDevice::WaterSensor(_) => DeviceVariant::WaterSensor,
        }
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.core().identity
    }

    pub fn device_id(&self) -> &str {
        self.core().device_id()
    }

    /// Number of successful updates so far
    pub fn update_count(&self) -> u64 {
        self.core().update_count.load(Ordering::Relaxed)
    }

    pub fn status(&self) -> DeviceStatus {
        self.core()
            .status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// One-time initialization before the first cycle
    pub async fn setup(&self, api: &dyn PhynApi, deadline: Duration) -> Result<(), FetchError> {
        let setup = async {
            match self {
                PhynDevice::Plus(device) => device.setup(api).await,
                PhynDevice::Classic(_) | PhynDevice::WaterSensor(_) => Ok(()),
            }
        };
        self.within_deadline(deadline, setup).await
    }

    /// Refreshes the device's cached state within `ctx.deadline`.
    /// On any failure the previous snapshot stays in place.
    pub async fn update(&self, api: &dyn PhynApi, ctx: &UpdateContext) -> Result<(), FetchError> {
        let refresh = async {
            match self {
                PhynDevice::Classic(device) => device.refresh(api, ctx).await,
                PhynDevice::Plus(device) => device.refresh(api, ctx).await,
                PhynDevice::WaterSensor(device) => device.refresh(api, ctx).await,
            }
        };
        let result = self.within_deadline(ctx.deadline, refresh).await;
        match &result {
            Ok(()) => self.core().record_success(ctx.now),
            Err(error) => self.core().record_failure(error),
        }
        result
    }

    async fn within_deadline<F>(&self, deadline: Duration, work: F) -> Result<(), FetchError>
    where
        F: std::future::Future<Output = Result<(), RequestError>>,
    {
        match tokio::time::timeout(deadline, work).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(FetchError::Request {
                device_id: self.device_id().to_string(),
                source,
            }),
            Err(_) => Err(FetchError::Timeout {
                device_id: self.device_id().to_string(),
                deadline,
            }),
        }
    }

    pub fn is_online(&self) -> bool {
        match self {
            PhynDevice::Classic(device) => device.is_online(),
            PhynDevice::Plus(device) => device.is_online(),
            PhynDevice::WaterSensor(device) => device.is_online(),
        }
    }

    pub fn firmware_version(&self) -> Option<String> {
        match self {
            PhynDevice::Classic(device) => device.firmware_version(),
            PhynDevice::Plus(device) => device.firmware_version(),
            PhynDevice::WaterSensor(device) => device.firmware_version(),
        }
    }

    pub fn firmware_update_available(&self) -> bool {
        match self {
            PhynDevice::Classic(device) => device.firmware_update_available(),
            PhynDevice::Plus(device) => device.firmware_update_available(),
            PhynDevice::WaterSensor(device) => device.firmware_update_available(),
        }
    }

    /// Readings this device publishes, in presentation order
    pub fn bindings(&self) -> &'static [ReadingBinding] {
        match self {
            PhynDevice::Classic(_) => ClassicDevice::BINDINGS,
            PhynDevice::Plus(_) => PlusDevice::BINDINGS,
            PhynDevice::WaterSensor(_) => WaterSensorDevice::BINDINGS,
        }
    }

    /// Current value of the reading bound to `key`
    pub fn reading(&self, key: &str) -> Option<ReadingValue> {
        match self {
            PhynDevice::Classic(device) => device.reading(key),
            PhynDevice::Plus(device) => device.reading(key),
            PhynDevice::WaterSensor(device) => device.reading(key),
        }
    }

    pub fn snapshot(&self) -> DeviceReadings {
        DeviceReadings {
            identity: self.identity().clone(),
            online: self.is_online(),
            firmware_version: self.firmware_version(),
            status: self.status(),
            readings: self
                .bindings()
                .iter()
                .map(|binding| (binding.key, self.reading(binding.key)))
                .collect(),
        }
    }
}
