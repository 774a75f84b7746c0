use std::sync::Mutex;
use std::sync::PoisonError;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use super::ApiError;
use super::ApiKeys;
use super::DeviceStatus;
use super::QsApiClient;
use crate::config::ApiConfig;

/// Default base URL of the QwikSwitch cloud API.
pub const DEFAULT_BASE_URL: &str = "https://qwikswitch.com/api/v1";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Wire format of the key-generation response.
#[derive(Debug, Deserialize)]
struct KeysResponse {
    ok: u8,
    #[serde(default)]
    r: String,
    #[serde(default)]
    rw: String,
    #[serde(default)]
    err: Option<String>,
}

/// Wire format of control and key-deletion responses.
#[derive(Debug, Deserialize)]
struct AckResponse {
    ok: u8,
    #[serde(default)]
    err: Option<String>,
}

/// Wire format of the all-device status response.
#[derive(Debug, Deserialize)]
struct StatusResponse {
    ok: u8,
    #[serde(default)]
    statuses: Vec<DeviceStatus>,
    #[serde(default)]
    err: Option<String>,
}

/// Blocking client for the QwikSwitch cloud REST API.
///
/// Holds the keys generated by `generate_api_keys` for the lifetime of the
/// client; keyed endpoints fail with `ApiError::MissingKeys` before that.
pub struct RestClient {
    http: reqwest::blocking::Client,
    base_url: String,
    email: String,
    master_key: String,
    keys: Mutex<Option<ApiKeys>>,
}

impl RestClient {
    pub fn new(config: &ApiConfig) -> Result<Self, ApiError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ApiError::Request(e.to_string()))?;

        Ok(Self {
            http,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            email: config.email.clone(),
            master_key: config.master_key.clone(),
            keys: Mutex::new(None),
        })
    }

    fn keys(&self) -> std::sync::MutexGuard<'_, Option<ApiKeys>> {
        self.keys.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_key(&self) -> Result<String, ApiError> {
        self.keys()
            .as_ref()
            .map(|keys| keys.read_only.clone())
            .ok_or(ApiError::MissingKeys)
    }

    fn read_write_key(&self) -> Result<String, ApiError> {
        self.keys()
            .as_ref()
            .map(|keys| keys.read_write.clone())
            .ok_or(ApiError::MissingKeys)
    }

    fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, ApiError> {
        self.http
            .get(url)
            .send()
            .and_then(|response| response.error_for_status())
            .and_then(|response| response.json())
            .map_err(|e| ApiError::Request(e.to_string()))
    }
}

impl QsApiClient for RestClient {
    fn generate_api_keys(&self) -> Result<ApiKeys, ApiError> {
        let url = format!("{}/keys", self.base_url);
        let response: KeysResponse = self
            .http
            .post(&url)
            .json(&serde_json::json!({
                "email": self.email,
                "master_key": self.master_key,
            }))
            .send()
            .and_then(|response| response.error_for_status())
            .and_then(|response| response.json())
            .map_err(|e| ApiError::Request(e.to_string()))?;

        if response.ok != 1 {
            return Err(ApiError::Rejected(
                response.err.unwrap_or_else(|| "key generation failed".to_string()),
            ));
        }

        let keys = ApiKeys {
            read_write: response.rw,
            read_only: response.r,
        };
        *self.keys() = Some(keys.clone());
        debug!("generated API keys");
        Ok(keys)
    }

    fn delete_api_keys(&self) -> Result<(), ApiError> {
        let url = format!("{}/keys/delete", self.base_url);
        let response: AckResponse = self
            .http
            .post(&url)
            .json(&serde_json::json!({
                "email": self.email,
                "master_key": self.master_key,
            }))
            .send()
            .and_then(|response| response.error_for_status())
            .and_then(|response| response.json())
            .map_err(|e| ApiError::Request(e.to_string()))?;

        if response.ok != 1 {
            return Err(ApiError::Rejected(
                response.err.unwrap_or_else(|| "key deletion failed".to_string()),
            ));
        }

        *self.keys() = None;
        Ok(())
    }

    fn control_device(&self, device_id: &str, level: u8) -> Result<(), ApiError> {
        let key = self.read_write_key()?;
        let url = format!(
            "{}/control/{}/?device={}&setlevel={}",
            self.base_url, key, device_id, level
        );
        let response: AckResponse = self.get_json(&url)?;

        if response.ok != 1 {
            return Err(ApiError::Rejected(
                response
                    .err
                    .unwrap_or_else(|| format!("control of {device_id} failed")),
            ));
        }
        Ok(())
    }

    fn get_all_device_status(&self) -> Result<Vec<DeviceStatus>, ApiError> {
        let key = self.read_key()?;
        let url = format!("{}/state/{}/", self.base_url, key);
        let response: StatusResponse = self.get_json(&url)?;

        if response.ok != 1 {
            return Err(ApiError::Rejected(
                response.err.unwrap_or_else(|| "status fetch failed".to_string()),
            ));
        }
        Ok(response.statuses)
    }
}
