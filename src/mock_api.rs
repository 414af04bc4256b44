//! In-memory `PhynApi` used by unit tests

use crate::error::RequestError;
use crate::models::{
    AwayModePreference, ConsumptionData, DeviceState, FirmwareInfo, Home, WaterStatistics,
};
use crate::phyn_api::PhynApi;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Call {
    Homes,
    State,
    Consumption,
    Firmware,
    AwayMode,
    WaterStatistics,
}

#[derive(Default)]
pub struct MockPhynApi {
    payloads: Mutex<HashMap<(String, Call), Value>>,
    failing: Mutex<HashSet<(String, Call)>>,
    delays: Mutex<HashMap<String, Duration>>,
    calls: Mutex<HashMap<(String, Call), usize>>,
    durations: Mutex<HashMap<String, Vec<String>>>,
    windows: Mutex<HashMap<String, (i64, i64)>>,
}

impl MockPhynApi {
    fn set(&self, key: &str, call: Call, payload: Value) {
        self.payloads
            .lock()
            .unwrap()
            .insert((key.to_string(), call), payload);
    }

    pub fn set_homes(&self, user_id: &str, homes: Value) {
        self.set(user_id, Call::Homes, homes);
    }

    pub fn set_state(&self, device_id: &str, state: Value) {
        self.set(device_id, Call::State, state);
    }

    pub fn set_consumption(&self, device_id: &str, usage: Value) {
        self.set(device_id, Call::Consumption, usage);
    }

    pub fn set_firmware(&self, device_id: &str, firmware: Value) {
        self.set(device_id, Call::Firmware, firmware);
    }

    pub fn set_away_mode(&self, device_id: &str, away_mode: Value) {
        self.set(device_id, Call::AwayMode, away_mode);
    }

    pub fn set_water_statistics(&self, device_id: &str, history: Value) {
        self.set(device_id, Call::WaterStatistics, history);
    }

    pub fn fail(&self, device_id: &str, call: Call) {
        self.failing
            .lock()
            .unwrap()
            .insert((device_id.to_string(), call));
    }

    pub fn recover(&self, device_id: &str, call: Call) {
        self.failing
            .lock()
            .unwrap()
            .remove(&(device_id.to_string(), call));
    }

    /// Every call for `device_id` sleeps this long before answering
    pub fn delay(&self, device_id: &str, delay: Duration) {
        self.delays
            .lock()
            .unwrap()
            .insert(device_id.to_string(), delay);
    }

    pub fn clear_delay(&self, device_id: &str) {
        self.delays.lock().unwrap().remove(device_id);
    }

    pub fn calls(&self, device_id: &str, call: Call) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(&(device_id.to_string(), call))
            .copied()
            .unwrap_or_default()
    }

    pub fn consumption_durations(&self, device_id: &str) -> Vec<String> {
        self.durations
            .lock()
            .unwrap()
            .get(device_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn statistics_window(&self, device_id: &str) -> Option<(i64, i64)> {
        self.windows.lock().unwrap().get(device_id).copied()
    }

    async fn respond<T: DeserializeOwned>(
        &self,
        key: &str,
        call: Call,
        fallback: Value,
    ) -> Result<T, RequestError> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry((key.to_string(), call))
            .or_default() += 1;

        let delay = self.delays.lock().unwrap().get(key).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self
            .failing
            .lock()
            .unwrap()
            .contains(&(key.to_string(), call))
        {
            return Err(RequestError::Status {
                status: 503,
                path: format!("{:?}/{}", call, key),
                body: "injected failure".to_string(),
            });
        }

        let payload = self
            .payloads
            .lock()
            .unwrap()
            .get(&(key.to_string(), call))
            .cloned()
            .unwrap_or(fallback);
        Ok(serde_json::from_value(payload).expect("mock payload must match the model"))
    }
}

#[async_trait]
impl PhynApi for MockPhynApi {
    async fn get_homes(&self, user_id: &str) -> Result<Vec<Home>, RequestError> {
        self.respond(user_id, Call::Homes, json!([])).await
    }

    async fn get_state(&self, device_id: &str) -> Result<DeviceState, RequestError> {
        self.respond(device_id, Call::State, json!({})).await
    }

    async fn get_consumption(
        &self,
        device_id: &str,
        duration: &str,
    ) -> Result<ConsumptionData, RequestError> {
        self.durations
            .lock()
            .unwrap()
            .entry(device_id.to_string())
            .or_default()
            .push(duration.to_string());
        self.respond(device_id, Call::Consumption, json!({})).await
    }

    async fn get_latest_firmware_info(
        &self,
        device_id: &str,
    ) -> Result<Vec<FirmwareInfo>, RequestError> {
        self.respond(device_id, Call::Firmware, json!([])).await
    }

    async fn get_away_mode(&self, device_id: &str) -> Result<AwayModePreference, RequestError> {
        self.respond(device_id, Call::AwayMode, json!({})).await
    }

    async fn get_water_statistics(
        &self,
        device_id: &str,
        from_ts: i64,
        to_ts: i64,
    ) -> Result<Vec<WaterStatistics>, RequestError> {
        self.windows
            .lock()
            .unwrap()
            .insert(device_id.to_string(), (from_ts, to_ts));
        self.respond(device_id, Call::WaterStatistics, json!([]))
            .await
    }
}
