//! Runtime configuration read from the environment.

use crate::error::ConfigError;
use crate::polling_coordinator::{CoordinatorOptions, FailurePolicy};
use std::env;
use std::fmt;
use std::num::NonZeroU64;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "https://api.phyn.com";
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_DEVICE_TIMEOUT_SECS: u64 = 20;
pub const DEFAULT_FIRMWARE_CHECK_CYCLES: u64 = 60;

/// Account brand the credentials belong to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Brand {
    #[default]
    Phyn,
    Kohler,
}

impl Brand {
    pub fn as_str(&self) -> &'static str {
        match self {
            Brand::Phyn => "phyn",
            Brand::Kohler => "kohler",
        }
    }
}

impl fmt::Display for Brand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Brand {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "phyn" => Ok(Brand::Phyn),
            "kohler" => Ok(Brand::Kohler),
            _ => Err(ConfigError::Invalid {
                key: "PHYN_BRAND",
                value: s.to_string(),
                reason: "expected phyn or kohler".to_string(),
            }),
        }
    }
}

#[derive(Clone)]
pub struct Config {
    pub username: String,
    pub password: String,
    pub brand: Brand,
    pub api_url: String,
    pub poll_interval: Duration,
    pub device_timeout: Duration,
    pub firmware_check_cycles: NonZeroU64,
    pub isolate_device_failures: bool,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("brand", &self.brand)
            .field("api_url", &self.api_url)
            .field("poll_interval", &self.poll_interval)
            .field("device_timeout", &self.device_timeout)
            .field("firmware_check_cycles", &self.firmware_check_cycles)
            .field("isolate_device_failures", &self.isolate_device_failures)
            .finish()
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup, so tests need not touch the process environment
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &'static str| {
            lookup(key)
                .filter(|value| !value.trim().is_empty())
                .ok_or(ConfigError::Missing(key))
        };

        let username = required("PHYN_USERNAME")?;
        let password = required("PHYN_PASSWORD")?;
        let brand = match lookup("PHYN_BRAND") {
            Some(value) if !value.trim().is_empty() => value.parse()?,
            _ => Brand::default(),
        };
        let api_url = lookup("PHYN_API_URL")
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());

        let poll_interval_secs =
            parse_positive(&lookup, "PHYN_POLL_INTERVAL_SECS", DEFAULT_POLL_INTERVAL_SECS)?;
        let device_timeout_secs =
            parse_positive(&lookup, "PHYN_DEVICE_TIMEOUT_SECS", DEFAULT_DEVICE_TIMEOUT_SECS)?;
        let firmware_check_cycles = parse_positive(
            &lookup,
            "PHYN_FIRMWARE_CHECK_CYCLES",
            DEFAULT_FIRMWARE_CHECK_CYCLES,
        )?;

        Ok(Config {
            username,
            password,
            brand,
            api_url,
            poll_interval: Duration::from_secs(poll_interval_secs.get()),
            device_timeout: Duration::from_secs(device_timeout_secs.get()),
            firmware_check_cycles,
            isolate_device_failures: parse_bool_safe(lookup("PHYN_ISOLATE_DEVICE_FAILURES")),
        })
    }

    pub fn coordinator_options(&self) -> CoordinatorOptions {
        CoordinatorOptions {
            update_interval: self.poll_interval,
            device_deadline: self.device_timeout,
            firmware_cadence: self.firmware_check_cycles,
            failure_policy: if self.isolate_device_failures {
                FailurePolicy::IsolateDevices
            } else {
                FailurePolicy::AbortOnFirst
            },
        }
    }
}

fn parse_positive<F>(lookup: &F, key: &'static str, default: u64) -> Result<NonZeroU64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = match lookup(key) {
        Some(value) if !value.trim().is_empty() => value,
        _ => return Ok(NonZeroU64::new(default).unwrap_or(NonZeroU64::MIN)),
    };
    raw.trim()
        .parse::<u64>()
        .ok()
        .and_then(NonZeroU64::new)
        .ok_or_else(|| ConfigError::Invalid {
            key,
            value: raw.clone(),
            reason: "expected a positive integer".to_string(),
        })
}

/// Safely parses a boolean from an optional string, defaulting to false
fn parse_bool_safe(val: Option<String>) -> bool {
    val.unwrap_or_default()
        .to_ascii_lowercase()
        .parse()
        .unwrap_or_default()
}
