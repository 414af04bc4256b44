//! Payloads returned by the Phyn cloud API.
//!
//! The API reports most metrics as `{ "v": <instant>, "mean": <windowed mean> }`
//! and alternates between live and aggregated modes, so every numeric reading
//! goes through [`Metric::value_or_mean`].

use chrono::NaiveDate;
use serde_derive::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Rounds `value` to `digits` decimal places.
/// Works on the exact binary value, so `2.675` rounds down to `2.67` and exact
/// ties go to the even digit.
pub fn round_to(value: f64, digits: i32) -> f64 {
    let digits = usize::try_from(digits).unwrap_or_default();
    format!("{value:.digits$}").parse().unwrap_or(value)
}

/// A single reported metric, live (`v`) and/or aggregated (`mean`)
#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub v: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mean: Option<f64>,
}

impl Metric {
    /// Instantaneous numeric value, if reported
    pub fn instant(&self) -> Option<f64> {
        self.v.as_ref().and_then(Value::as_f64)
    }

    /// Prefers the instantaneous value, falls back to the mean, then zero
    pub fn value_or_mean(&self, precision: i32) -> f64 {
        let raw = self.instant().or(self.mean).unwrap_or_default();
        round_to(raw, precision)
    }

    /// Status-style metrics carry a string in `v`
    pub fn status(&self) -> Option<&str> {
        self.v.as_ref().and_then(Value::as_str)
    }
}

/// Raw device state as returned by `/devices/{id}/state`
#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceState {
    #[serde(default)]
    pub cold_line_num: Option<i64>,
    #[serde(default)]
    pub hot_line_num: Option<i64>,
    #[serde(default)]
    pub fw_version: Option<Value>,
    #[serde(default)]
    pub online_status: Option<Metric>,
    #[serde(default)]
    pub serial_number: Option<String>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl DeviceState {
    /// Looks up a named metric; absent or malformed parts read as empty.
    /// `v` and `mean` are read independently so a bad `mean` never hides a good `v`.
    pub fn metric(&self, name: &str) -> Metric {
        let Some(Value::Object(raw)) = self.fields.get(name) else {
            return Metric::default();
        };
        Metric {
            v: raw.get("v").filter(|v| !v.is_null()).cloned(),
            mean: raw.get("mean").and_then(Value::as_f64),
        }
    }

    pub fn is_online(&self) -> bool {
        self.online_status
            .as_ref()
            .and_then(Metric::status)
            .is_some_and(|status| status == "online")
    }

    pub fn firmware_version(&self) -> Option<String> {
        self.fw_version.as_ref().and_then(version_string)
    }
}

/// Daily usage from `/devices/{id}/consumption/details`
#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumptionData {
    #[serde(default)]
    pub water_consumption: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Today's usage, tagged with the local date it was requested for
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumptionSnapshot {
    pub date: NaiveDate,
    pub data: ConsumptionData,
}

#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FirmwareInfo {
    #[serde(default)]
    pub fw_version: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FirmwareInfo {
    pub fn version(&self) -> Option<String> {
        self.fw_version.as_ref().and_then(version_string)
    }

    /// True when this release is newer than `installed`.
    /// Numeric versions compare numerically, anything else by inequality.
    pub fn is_newer_than(&self, installed: &str) -> bool {
        let Some(latest) = self.version() else {
            return false;
        };
        match (latest.parse::<u64>(), installed.parse::<u64>()) {
            (Ok(latest), Ok(installed)) => latest > installed,
            _ => latest != installed,
        }
    }
}

fn version_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Leak-sensor away mode preference of a Phyn Plus
#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AwayModePreference {
    #[serde(default)]
    pub value: Option<Value>,
}

impl AwayModePreference {
    pub fn is_enabled(&self) -> bool {
        match &self.value {
            Some(Value::Bool(enabled)) => *enabled,
            Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
            _ => false,
        }
    }
}

/// One history entry of a Phyn Water Sensor
#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaterStatistics {
    #[serde(default)]
    pub ts: i64,
    #[serde(default)]
    pub temperature: Option<Metric>,
    #[serde(default)]
    pub humidity: Option<Metric>,
    #[serde(default)]
    pub battery_level: Option<f64>,
    #[serde(default)]
    pub water_detected: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Home {
    pub id: String,
    #[serde(default)]
    pub alias_name: Option<String>,
    #[serde(default)]
    pub devices: Vec<HomeDevice>,
}

#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HomeDevice {
    pub device_id: String,
    pub product_code: String,
}
