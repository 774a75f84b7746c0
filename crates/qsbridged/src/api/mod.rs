//! Types and client seam for the QwikSwitch cloud API.
//!
//! The client trait is blocking: the cloud API is plain request/response
//! HTTP and the vendor rate-limits aggressively. All calls are routed
//! through the command queue, which drives them on the blocking thread pool.

mod rest;

pub use rest::RestClient;

use serde::Deserialize;
use serde::Serialize;

/// Device classes reported by the status feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    /// Dimmable light module, level 0..=100.
    Dimmer,
    /// On/off relay module, reports 0 or 100.
    Relay,
}

/// Status of a single device as reported by the cloud API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub device_id: String,
    pub device_class: DeviceClass,
    /// Current level in 0..=100.
    pub value: u8,
}

/// API keys issued for a registered email/master key pair.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiKeys {
    pub read_write: String,
    pub read_only: String,
}

/// Errors from the cloud API client.
///
/// `Clone` because a single poll result settles every caller that joined
/// the poll.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    /// Transport-level failure (connection, TLS, malformed body).
    #[error("request failed: {0}")]
    Request(String),

    /// The API answered but rejected the call.
    #[error("api rejected the call: {0}")]
    Rejected(String),

    /// A keyed endpoint was called before `generate_api_keys`.
    #[error("api keys have not been generated")]
    MissingKeys,
}

/// Blocking client for the QwikSwitch cloud API.
///
/// Once the command queue is started it is the sole caller of
/// `control_device` and `get_all_device_status`; nothing else may issue
/// those calls, or the inter-command delay stops meaning anything.
pub trait QsApiClient: Send + Sync {
    /// Exchange the configured credentials for read/read-write API keys.
    fn generate_api_keys(&self) -> Result<ApiKeys, ApiError>;

    /// Revoke the keys generated by this client.
    fn delete_api_keys(&self) -> Result<(), ApiError>;

    /// Set a device to a level in 0..=100.
    fn control_device(&self, device_id: &str, level: u8) -> Result<(), ApiError>;

    /// Fetch the current status of every device on the account.
    fn get_all_device_status(&self) -> Result<Vec<DeviceStatus>, ApiError>;
}

#[cfg(test)]
pub(crate) mod mock {
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::sync::Mutex;

    use tokio::time::Instant;

    use super::ApiError;
    use super::ApiKeys;
    use super::DeviceStatus;
    use super::QsApiClient;

    /// A recorded API call with the time it was issued at.
    #[derive(Debug, Clone)]
    pub(crate) enum MockCall {
        Control {
            device_id: String,
            level: u8,
            at: Instant,
        },
        Status {
            at: Instant,
        },
    }

    /// Scriptable in-memory client.
    ///
    /// Results are consumed front-to-back; an empty script means every call
    /// succeeds (status polls return an empty device list).
    #[derive(Default)]
    pub(crate) struct MockClient {
        calls: Mutex<Vec<MockCall>>,
        control_results: Mutex<VecDeque<Result<(), ApiError>>>,
        status_results: Mutex<VecDeque<Result<Vec<DeviceStatus>, ApiError>>>,
    }

    impl MockClient {
        pub(crate) fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub(crate) fn push_control_result(&self, result: Result<(), ApiError>) {
            self.control_results.lock().unwrap().push_back(result);
        }

        pub(crate) fn push_status_result(&self, result: Result<Vec<DeviceStatus>, ApiError>) {
            self.status_results.lock().unwrap().push_back(result);
        }

        pub(crate) fn calls(&self) -> Vec<MockCall> {
            self.calls.lock().unwrap().clone()
        }

        pub(crate) fn control_calls(&self) -> Vec<(String, u8)> {
            self.calls()
                .into_iter()
                .filter_map(|call| match call {
                    MockCall::Control {
                        device_id, level, ..
                    } => Some((device_id, level)),
                    MockCall::Status { .. } => None,
                })
                .collect()
        }

        pub(crate) fn status_call_count(&self) -> usize {
            self.calls()
                .iter()
                .filter(|call| matches!(call, MockCall::Status { .. }))
                .count()
        }
    }

    impl QsApiClient for MockClient {
        fn generate_api_keys(&self) -> Result<ApiKeys, ApiError> {
            Ok(ApiKeys {
                read_write: "rw-key".to_string(),
                read_only: "r-key".to_string(),
            })
        }

        fn delete_api_keys(&self) -> Result<(), ApiError> {
            Ok(())
        }

        fn control_device(&self, device_id: &str, level: u8) -> Result<(), ApiError> {
            self.calls.lock().unwrap().push(MockCall::Control {
                device_id: device_id.to_string(),
                level,
                at: Instant::now(),
            });
            self.control_results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(()))
        }

        fn get_all_device_status(&self) -> Result<Vec<DeviceStatus>, ApiError> {
            self.calls
                .lock()
                .unwrap()
                .push(MockCall::Status { at: Instant::now() });
            self.status_results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }
    }
}
