use super::{
    firmware_update_available, DeviceCore, DeviceIdentity, ReadingBinding, ReadingKind,
    ReadingValue, Snapshot, UpdateContext,
};
use crate::error::RequestError;
use crate::models::{round_to, DeviceState, FirmwareInfo, WaterStatistics};
use crate::phyn_api::PhynApi;
use chrono::Duration;
use tracing::debug;

/// Trailing window of history requested each cycle
const STATISTICS_WINDOW_HOURS: i64 = 12;

#[derive(Debug, Default)]
struct WaterSensorCache {
    state: DeviceState,
    statistics: Option<WaterStatistics>,
    firmware: Option<FirmwareInfo>,
}

/// Phyn Water Sensor (PW1): battery powered leak and climate sensor
#[derive(Debug)]
pub struct WaterSensorDevice {
    pub(super) core: DeviceCore,
    cache: Snapshot<WaterSensorCache>,
}

impl WaterSensorDevice {
    pub const BINDINGS: &'static [ReadingBinding] = &[
        ReadingBinding::sensor("temperature", "Air temperature", "°F"),
        ReadingBinding::sensor("humidity", "Humidity", "%"),
        ReadingBinding::sensor("battery", "Battery", "%"),
        ReadingBinding::flag("leak_detected", "Water detected", ReadingKind::BinarySensor),
        ReadingBinding::flag(
            "firmware_update_available",
            "Firmware update available",
            ReadingKind::Update,
        ),
    ];

    pub(super) fn new(identity: DeviceIdentity) -> Self {
        Self {
            core: DeviceCore::new(identity),
            cache: Snapshot::default(),
        }
    }

    pub(super) async fn refresh(
        &self,
        api: &dyn PhynApi,
        ctx: &UpdateContext,
    ) -> Result<(), RequestError> {
        let device_id = self.core.device_id();
        let previous = self.cache.load();

        let state = api.get_state(device_id).await?;
        let to_ts = ctx.now.timestamp_millis();
        let from_ts = (ctx.now - Duration::hours(STATISTICS_WINDOW_HOURS)).timestamp_millis();
        let history = api.get_water_statistics(device_id, from_ts, to_ts).await?;
        let latest = history.into_iter().max_by_key(|entry| entry.ts);
        if latest.is_none() {
            debug!(device_id, "No water statistics in window, keeping last entry");
        }
        let firmware = self
            .core
            .refresh_firmware(api, ctx, previous.firmware.as_ref())
            .await?;

        self.cache.store(WaterSensorCache {
            state,
            statistics: latest.or_else(|| previous.statistics.clone()),
            firmware,
        });
        Ok(())
    }

    /// Air temperature in °F
    pub fn temperature(&self) -> Option<f64> {
        self.cache
            .load()
            .statistics
            .as_ref()
            .and_then(|stats| stats.temperature.as_ref())
            .map(|metric| metric.value_or_mean(2))
    }

    /// Relative humidity in percent
    pub fn humidity(&self) -> Option<f64> {
        self.cache
            .load()
            .statistics
            .as_ref()
            .and_then(|stats| stats.humidity.as_ref())
            .map(|metric| metric.value_or_mean(2))
    }

    /// Battery level in percent
    pub fn battery(&self) -> Option<f64> {
        self.cache
            .load()
            .statistics
            .as_ref()
            .and_then(|stats| stats.battery_level)
            .map(|level| round_to(level, 0))
    }

    pub fn leak_detected(&self) -> bool {
        self.cache
            .load()
            .statistics
            .as_ref()
            .and_then(|stats| stats.water_detected)
            .unwrap_or(false)
    }

    pub fn is_online(&self) -> bool {
        self.cache.load().state.is_online()
    }

    pub fn firmware_version(&self) -> Option<String> {
        self.cache.load().state.firmware_version()
    }

    pub fn firmware_update_available(&self) -> bool {
        let cache = self.cache.load();
        firmware_update_available(cache.state.firmware_version(), cache.firmware.as_ref())
    }

    pub(super) fn reading(&self, key: &str) -> Option<ReadingValue> {
        match key {
            "temperature" => self.temperature().map(ReadingValue::from),
            "humidity" => self.humidity().map(ReadingValue::from),
            "battery" => self.battery().map(ReadingValue::from),
            "leak_detected" => Some(self.leak_detected().into()),
            "firmware_update_available" => Some(self.firmware_update_available().into()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_api::MockPhynApi;
    use serde_json::json;
    use std::num::NonZeroU64;

    fn device() -> WaterSensorDevice {
        WaterSensorDevice::new(DeviceIdentity {
            home_id: "home-1".to_string(),
            device_id: "pw-1".to_string(),
            product_code: "PW1".to_string(),
        })
    }

    fn context() -> UpdateContext {
        UpdateContext::new(
            std::time::Duration::from_secs(20),
            NonZeroU64::new(60).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_newest_statistics_entry_wins() {
        let api = MockPhynApi::default();
        api.set_water_statistics(
            "pw-1",
            json!([
                { "ts": 3000, "temperature": { "v": 70.0 }, "water_detected": false },
                { "ts": 9000, "temperature": { "mean": 68.456 }, "humidity": { "v": 41.0 },
                  "battery_level": 87.4, "water_detected": true },
                { "ts": 5000, "temperature": { "v": 72.0 } }
            ]),
        );
        let device = device();
        let ctx = context();

        device.refresh(&api, &ctx).await.unwrap();

        assert_eq!(device.temperature(), Some(68.46));
        assert_eq!(device.humidity(), Some(41.0));
        assert_eq!(device.battery(), Some(87.0));
        assert!(device.leak_detected());

        let (from_ts, to_ts) = api.statistics_window("pw-1").unwrap();
        assert_eq!(to_ts, ctx.now.timestamp_millis());
        assert_eq!(to_ts - from_ts, STATISTICS_WINDOW_HOURS * 3600 * 1000);
    }

    #[tokio::test]
    async fn test_empty_window_keeps_last_entry() {
        let api = MockPhynApi::default();
        api.set_water_statistics("pw-1", json!([{ "ts": 1, "humidity": { "v": 55.0 } }]));
        let device = device();
        device.refresh(&api, &context()).await.unwrap();

        api.set_water_statistics("pw-1", json!([]));
        device.refresh(&api, &context()).await.unwrap();

        assert_eq!(device.humidity(), Some(55.0));
    }

    #[test]
    fn test_no_statistics_yet() {
        let device = device();
        assert_eq!(device.reading("temperature"), None);
        assert_eq!(device.reading("battery"), None);
        assert_eq!(device.reading("leak_detected"), Some(ReadingValue::Flag(false)));
    }
}
