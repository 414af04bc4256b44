use crate::config::Brand;
use crate::error::RequestError;
use crate::models::{
    AwayModePreference, ConsumptionData, DeviceState, FirmwareInfo, Home, WaterStatistics,
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_derive::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

/// Remote operations the gateway needs from the Phyn cloud
#[async_trait]
pub trait PhynApi: Send + Sync {
    async fn get_homes(&self, user_id: &str) -> Result<Vec<Home>, RequestError>;

    async fn get_state(&self, device_id: &str) -> Result<DeviceState, RequestError>;

    /// `duration` is a local calendar date formatted `YYYY/MM/DD`
    async fn get_consumption(
        &self,
        device_id: &str,
        duration: &str,
    ) -> Result<ConsumptionData, RequestError>;

    async fn get_latest_firmware_info(
        &self,
        device_id: &str,
    ) -> Result<Vec<FirmwareInfo>, RequestError>;

    async fn get_away_mode(&self, device_id: &str) -> Result<AwayModePreference, RequestError>;

    /// Timestamps are milliseconds since the epoch
    async fn get_water_statistics(
        &self,
        device_id: &str,
        from_ts: i64,
        to_ts: i64,
    ) -> Result<Vec<WaterStatistics>, RequestError>;
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
    brand: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    access_token: String,
}

/// HTTP client for the Phyn REST API
pub struct PhynClient {
    endpoint_url: String,
    auth_token: String,
    client: reqwest::Client,
}

impl fmt::Debug for PhynClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhynClient")
            .field("endpoint_url", &self.endpoint_url)
            .field("auth_token", &"<redacted>")
            .finish()
    }
}

impl PhynClient {
    /// Builds a client around an already issued token
    pub fn with_token(endpoint_url: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            endpoint_url: endpoint_url.into().trim_end_matches('/').to_string(),
            auth_token: auth_token.into(),
            client: reqwest::Client::new(),
        }
    }

    /// Exchanges account credentials for a session token
    pub async fn login(
        endpoint_url: &str,
        username: &str,
        password: &str,
        brand: Brand,
    ) -> Result<Self, RequestError> {
        let endpoint_url = endpoint_url.trim_end_matches('/');
        let client = reqwest::Client::new();
        let response = client
            .post(format!("{endpoint_url}/auth/login"))
            .json(&LoginRequest {
                username,
                password,
                brand: brand.as_str(),
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RequestError::Auth(format!(
                "login for {username} rejected with status {}",
                status.as_u16()
            )));
        }
        let login: LoginResponse = response.json().await?;
        info!("Logged in to {} as {}", brand, username);

        Ok(Self {
            endpoint_url: endpoint_url.to_string(),
            auth_token: login.access_token,
            client,
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, RequestError> {
        debug!(path, "Requesting Phyn API");
        let response = self
            .client
            .get(format!("{}{}", self.endpoint_url, path))
            .bearer_auth(&self.auth_token)
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RequestError::Status {
                status: status.as_u16(),
                path: path.to_string(),
                body,
            });
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl PhynApi for PhynClient {
    async fn get_homes(&self, user_id: &str) -> Result<Vec<Home>, RequestError> {
        self.get_json("/homes", &[("user_id", user_id.to_string())])
            .await
    }

    async fn get_state(&self, device_id: &str) -> Result<DeviceState, RequestError> {
        self.get_json(&format!("/devices/{device_id}/state"), &[])
            .await
    }

    async fn get_consumption(
        &self,
        device_id: &str,
        duration: &str,
    ) -> Result<ConsumptionData, RequestError> {
        self.get_json(
            &format!("/devices/{device_id}/consumption/details"),
            &[
                ("duration", duration.to_string()),
                ("precision", "6".to_string()),
            ],
        )
        .await
    }

    async fn get_latest_firmware_info(
        &self,
        device_id: &str,
    ) -> Result<Vec<FirmwareInfo>, RequestError> {
        self.get_json(
            "/firmware/latestVersion/v2",
            &[("device_id", device_id.to_string())],
        )
        .await
    }

    async fn get_away_mode(&self, device_id: &str) -> Result<AwayModePreference, RequestError> {
        self.get_json(
            &format!("/preferences/device/{device_id}/leak_sensor_away_mode"),
            &[],
        )
        .await
    }

    async fn get_water_statistics(
        &self,
        device_id: &str,
        from_ts: i64,
        to_ts: i64,
    ) -> Result<Vec<WaterStatistics>, RequestError> {
        self.get_json(
            &format!("/devices/{device_id}/water_statistics/history/"),
            &[
                ("from_ts", from_ts.to_string()),
                ("to_ts", to_ts.to_string()),
            ],
        )
        .await
    }
}
