use super::{
    firmware_update_available, DeviceCore, DeviceIdentity, ReadingBinding, ReadingKind,
    ReadingValue, Snapshot, UpdateContext,
};
use crate::error::RequestError;
use crate::models::{AwayModePreference, ConsumptionSnapshot, DeviceState, FirmwareInfo};
use crate::phyn_api::PhynApi;
use tracing::debug;

#[derive(Debug, Default)]
struct PlusCache {
    state: DeviceState,
    consumption: Option<ConsumptionSnapshot>,
    firmware: Option<FirmwareInfo>,
    away_mode: Option<AwayModePreference>,
}

/// Phyn Plus (PP1, PP2): single line with a shutoff valve
#[derive(Debug)]
pub struct PlusDevice {
    pub(super) core: DeviceCore,
    cache: Snapshot<PlusCache>,
}

impl PlusDevice {
    pub const BINDINGS: &'static [ReadingBinding] = &[
        ReadingBinding::sensor("consumption_today", "Daily water usage", "gal"),
        ReadingBinding::sensor("current_flow_rate", "Current flow rate", "gal/min"),
        ReadingBinding::sensor("temperature", "Average water temperature", "°F"),
        ReadingBinding::sensor("current_psi", "Average water pressure", "psi"),
        ReadingBinding::flag("leak_test_running", "Leak test running", ReadingKind::BinarySensor),
        ReadingBinding::flag("valve_open", "Shutoff valve", ReadingKind::Valve),
        ReadingBinding::flag("away_mode", "Away mode", ReadingKind::BinarySensor),
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

    /// Primes the away mode preference so it is known before the first cycle
    pub(super) async fn setup(&self, api: &dyn PhynApi) -> Result<(), RequestError> {
        let away_mode = api.get_away_mode(self.core.device_id()).await?;
        let previous = self.cache.load();
        self.cache.store(PlusCache {
            state: previous.state.clone(),
            consumption: previous.consumption.clone(),
            firmware: previous.firmware.clone(),
            away_mode: Some(away_mode),
        });
        Ok(())
    }

    pub(super) async fn refresh(
        &self,
        api: &dyn PhynApi,
        ctx: &UpdateContext,
    ) -> Result<(), RequestError> {
        let device_id = self.core.device_id();
        let previous = self.cache.load();

        let state = api.get_state(device_id).await?;
        let away_mode = api.get_away_mode(device_id).await?;
        let duration = ctx.today.format("%Y/%m/%d").to_string();
        let usage = api.get_consumption(device_id, &duration).await?;
        debug!(device_id, ?usage, "Updated Phyn consumption data");
        let firmware = self
            .core
            .refresh_firmware(api, ctx, previous.firmware.as_ref())
            .await?;

        self.cache.store(PlusCache {
            state,
            consumption: Some(ConsumptionSnapshot {
                date: ctx.today,
                data: usage,
            }),
            firmware,
            away_mode: Some(away_mode),
        });
        Ok(())
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

    /// Line pressure in psi
    pub fn current_psi(&self) -> f64 {
        self.cache.load().state.metric("pressure").value_or_mean(2)
    }

    /// Water temperature in °F
    pub fn temperature(&self) -> f64 {
        self.cache.load().state.metric("temperature").value_or_mean(2)
    }

    pub fn leak_test_running(&self) -> bool {
        self.cache.load().state.metric("sov_status").status() == Some("LeakExp")
    }

    pub fn valve_open(&self) -> bool {
        self.cache.load().state.metric("sov_status").status() == Some("Open")
    }

    pub fn away_mode(&self) -> bool {
        self.cache
            .load()
            .away_mode
            .as_ref()
            .is_some_and(AwayModePreference::is_enabled)
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
            "temperature" => Some(self.temperature().into()),
            "current_psi" => Some(self.current_psi().into()),
            "leak_test_running" => Some(self.leak_test_running().into()),
            "valve_open" => Some(self.valve_open().into()),
            "away_mode" => Some(self.away_mode().into()),
            "firmware_update_available" => Some(self.firmware_update_available().into()),
            _ => None,
        }
    }
}
