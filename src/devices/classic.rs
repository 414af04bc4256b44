use super::{
    firmware_update_available, DeviceCore, DeviceIdentity, ReadingBinding, ReadingKind,
    ReadingValue, Snapshot, UpdateContext,
};
use crate::error::RequestError;
use crate::models::{ConsumptionSnapshot, DeviceState, FirmwareInfo};
use crate::phyn_api::PhynApi;
use tracing::debug;

#[derive(Debug, Default)]
struct ClassicCache {
    state: DeviceState,
    consumption: Option<ConsumptionSnapshot>,
    firmware: Option<FirmwareInfo>,
}

/// Phyn Classic (PC1): separate hot and cold lines
#[derive(Debug)]
pub struct ClassicDevice {
    pub(super) core: DeviceCore,
    cache: Snapshot<ClassicCache>,
}

impl ClassicDevice {
    pub const BINDINGS: &'static [ReadingBinding] = &[
        ReadingBinding::sensor("consumption_today", "Daily water usage", "gal"),
        ReadingBinding::sensor("current_flow_rate", "Current flow rate", "gal/min"),
        ReadingBinding::sensor("temperature1", "Average hot water temperature", "°F"),
        ReadingBinding::sensor("temperature2", "Average cold water temperature", "°F"),
        ReadingBinding::sensor("current_psi1", "Average hot water pressure", "psi"),
        ReadingBinding::sensor("current_psi2", "Average cold water pressure", "psi"),
        ReadingBinding::flag("leak_test_running", "Leak test running", ReadingKind::BinarySensor),
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
        let duration = ctx.today.format("%Y/%m/%d").to_string();
        let usage = api.get_consumption(device_id, &duration).await?;
        debug!(device_id, ?usage, "Updated Phyn consumption data");
        let firmware = self
            .core
            .refresh_firmware(api, ctx, previous.firmware.as_ref())
            .await?;

        self.cache.store(ClassicCache {
            state,
            consumption: Some(ConsumptionSnapshot {
                date: ctx.today,
                data: usage,
            }),
            firmware,
        });
        Ok(())
    }

    pub fn cold_line_num(&self) -> Option<i64> {
        self.cache.load().state.cold_line_num
    }

    pub fn hot_line_num(&self) -> Option<i64> {
        self.cache.load().state.hot_line_num
    }

    /// Today's consumption in gallons
    pub fn consumption_today(&self) -> Option<f64> {
        self.cache
            .load()
            .consumption
            .as_ref()
            .and_then(|snapshot| snapshot.data.water_consumption)
    }

    /// Flow rate in gallons per minute
    pub fn current_flow_rate(&self) -> f64 {
        self.cache.load().state.metric("flow").value_or_mean(3)
    }

    /// Hot line pressure in psi
    pub fn current_psi1(&self) -> f64 {
        self.cache.load().state.metric("pressure1").value_or_mean(2)
    }

    /// Cold line pressure in psi
    pub fn current_psi2(&self) -> f64 {
        self.cache.load().state.metric("pressure2").value_or_mean(2)
    }

    /// Hot line temperature in °F
    pub fn temperature1(&self) -> f64 {
        self.cache.load().state.metric("temperature1").value_or_mean(2)
    }

    /// Cold line temperature in °F
    pub fn temperature2(&self) -> f64 {
        self.cache.load().state.metric("temperature2").value_or_mean(2)
    }

    pub fn leak_test_running(&self) -> bool {
        self.cache.load().state.metric("sov_status").status() == Some("LeakExp")
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
            "consumption_today" => self.consumption_today().map(ReadingValue::from),
            "current_flow_rate" => Some(self.current_flow_rate().into()),
            "temperature1" => Some(self.temperature1().into()),
            "temperature2" => Some(self.temperature2().into()),
            "current_psi1" => Some(self.current_psi1().into()),
            "current_psi2" => Some(self.current_psi2().into()),
            "leak_test_running" => Some(self.leak_test_running().into()),
            "firmware_update_available" => Some(self.firmware_update_available().into()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_api::{Call, MockPhynApi};
    use chrono::NaiveDate;
    use serde_json::json;
    use std::num::NonZeroU64;
    use std::time::Duration;

    fn device() -> ClassicDevice {
        ClassicDevice::new(DeviceIdentity {
            home_id: "home-1".to_string(),
            device_id: "pc-1".to_string(),
            product_code: "PC1".to_string(),
        })
    }

    fn context() -> UpdateContext {
        UpdateContext {
            today: NaiveDate::from_ymd_opt(2024, 5, 17).unwrap(),
            ..UpdateContext::new(Duration::from_secs(20), NonZeroU64::new(60).unwrap())
        }
    }

    async fn refreshed(state: serde_json::Value) -> ClassicDevice {
        let api = MockPhynApi::default();
        api.set_state("pc-1", state);
        let device = device();
        device.refresh(&api, &context()).await.unwrap();
        device
    }

    #[tokio::test]
    async fn test_pressure_prefers_instant_value() {
        let device = refreshed(json!({
            "pressure1": { "v": 42.567, "mean": 40.0 },
            "pressure2": { "mean": 40.0 }
        }))
        .await;
        assert_eq!(device.current_psi1(), 42.57);
        assert_eq!(device.current_psi2(), 40.0);
    }

    #[tokio::test]
    async fn test_empty_metrics_read_zero() {
        let device = refreshed(json!({ "pressure1": {}, "temperature1": {} })).await;
        assert_eq!(device.current_psi1(), 0.0);
        assert_eq!(device.temperature1(), 0.0);
        assert_eq!(device.temperature2(), 0.0);
        assert_eq!(device.current_flow_rate(), 0.0);
    }

    #[tokio::test]
    async fn test_temperatures_and_flow() {
        let device = refreshed(json!({
            "temperature1": { "v": 118.456 },
            "temperature2": { "mean": 61.234, "v": null },
            "flow": { "v": 1.23456 }
        }))
        .await;
        assert_eq!(device.temperature1(), 118.46);
        assert_eq!(device.temperature2(), 61.23);
        assert_eq!(device.current_flow_rate(), 1.235);
    }

    #[tokio::test]
    async fn test_leak_test_running_matches_exact_status() {
        for (status, expected) in [
            (json!("LeakExp"), true),
            (json!("leakexp"), false),
            (json!("Open"), false),
            (json!("SomeFutureState"), false),
            (json!(1), false),
        ] {
            let device = refreshed(json!({ "sov_status": { "v": status } })).await;
            assert_eq!(device.leak_test_running(), expected);
        }
        assert!(!refreshed(json!({})).await.leak_test_running());
    }

    #[tokio::test]
    async fn test_line_numbers_and_consumption() {
        let api = MockPhynApi::default();
        api.set_state("pc-1", json!({ "cold_line_num": 2, "hot_line_num": 1 }));
        api.set_consumption("pc-1", json!({ "water_consumption": 37.2 }));
        let device = device();
        assert_eq!(device.consumption_today(), None);
        assert_eq!(device.reading("consumption_today"), None);

        device.refresh(&api, &context()).await.unwrap();

        assert_eq!(device.cold_line_num(), Some(2));
        assert_eq!(device.hot_line_num(), Some(1));
        assert_eq!(device.consumption_today(), Some(37.2));
        assert_eq!(api.consumption_durations("pc-1"), vec!["2024/05/17"]);
        assert_eq!(api.calls("pc-1", Call::AwayMode), 0);
    }

    #[tokio::test]
    async fn test_failed_consumption_keeps_previous_state() {
        let api = MockPhynApi::default();
        api.set_state("pc-1", json!({ "pressure1": { "v": 50.0 } }));
        let device = device();
        device.refresh(&api, &context()).await.unwrap();

        api.set_state("pc-1", json!({ "pressure1": { "v": 10.0 } }));
        api.fail("pc-1", Call::Consumption);
        assert!(device.refresh(&api, &context()).await.is_err());

        assert_eq!(device.current_psi1(), 50.0);
    }

    #[test]
    fn test_every_binding_has_a_reading() {
        let device = device();
        for binding in ClassicDevice::BINDINGS {
            if binding.key != "consumption_today" {
                assert!(device.reading(binding.key).is_some(), "{}", binding.key);
            }
        }
        assert_eq!(device.reading("humidity"), None);
    }
}
