//! Error types for the Phyn gateway

use std::time::Duration;
use thiserror::Error;

/// A single call to the remote Phyn API failed
#[derive(Error, Debug)]
pub enum RequestError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected status {status} from {path}: {body}")]
    Status {
        status: u16,
        path: String,
        body: String,
    },

    #[error("Authentication error: {0}")]
    Auth(String),
}

/// One device failed to refresh within its cycle
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("device {device_id} did not respond within {deadline:?}")]
    Timeout {
        device_id: String,
        deadline: Duration,
    },

    #[error("request for device {device_id} failed: {source}")]
    Request {
        device_id: String,
        #[source]
        source: RequestError,
    },
}

impl FetchError {
    pub fn device_id(&self) -> &str {
        match self {
            FetchError::Timeout { device_id, .. } => device_id,
            FetchError::Request { device_id, .. } => device_id,
        }
    }
}

/// Aggregate failure of a polling cycle
#[derive(Error, Debug)]
#[error("update failed for {} device(s): {}", .failures.len(), describe_failures(.failures))]
pub struct CycleFailure {
    pub failures: Vec<FetchError>,
}

impl CycleFailure {
    /// Device ids that failed, in cycle order
    pub fn failed_devices(&self) -> Vec<String> {
        self.failures
            .iter()
            .map(|failure| failure.device_id().to_string())
            .collect()
    }
}

fn describe_failures(failures: &[FetchError]) -> String {
    failures
        .iter()
        .map(|failure| failure.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// The account reported a product code no adapter exists for
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unrecognized product code {product_code:?} for device {device_id} in home {home_id}")]
pub struct UnrecognizedDeviceVariant {
    pub home_id: String,
    pub device_id: String,
    pub product_code: String,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required setting {0}")]
    Missing(&'static str),

    #[error("Invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_failure_lists_every_device() {
        let failure = CycleFailure {
            failures: vec![
                FetchError::Timeout {
                    device_id: "dev-a".to_string(),
                    deadline: Duration::from_secs(20),
                },
                FetchError::Request {
                    device_id: "dev-b".to_string(),
                    source: RequestError::Auth("expired".to_string()),
                },
            ],
        };

        assert_eq!(failure.failed_devices(), vec!["dev-a", "dev-b"]);
        let message = failure.to_string();
        assert!(message.starts_with("update failed for 2 device(s)"));
        assert!(message.contains("dev-a did not respond within 20s"));
        assert!(message.contains("Authentication error: expired"));
    }
}
