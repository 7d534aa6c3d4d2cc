//! Typed HTTP client for the remote authority API
//!
//! Wraps `reqwest::Client` with base URL construction, JSON bodies, and the
//! connectivity/rejection classification the enforcement core depends on.
//!
//! ## Endpoints
//!
//! | Exchange            | Method | Path                                        |
//! |---------------------|--------|---------------------------------------------|
//! | Heartbeat           | POST   | `/devices/{device_id}/heartbeat`            |
//! | Management command  | POST   | `/devices/{device_id}/management`           |
//! | Mismatch alert      | POST   | `/devices/{device_id}/mismatch-alerts`      |
//! | Suspicious activity | POST   | `/devices/{device_id}/suspicious-activity`  |

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use custodia_core::domain::{command::ManagementCommand, newtypes::DeviceId};
use custodia_core::ports::{
    CommandResponse, HeartbeatRequest, HeartbeatResponse, ITransport, MismatchAlert,
    SuspiciousActivityAlert, TransportError,
};

/// Wire body for a management command: action and reason only
#[derive(Debug, Serialize)]
struct CommandBody<'a> {
    action: String,
    reason: &'a str,
}

/// HTTP implementation of the transport port
pub struct HttpTransport {
    client: Client,
    base_url: String,
    /// Seconds before an in-flight request is abandoned
    timeout_secs: u64,
}

impl HttpTransport {
    /// Creates a transport against the given authority base URL
    ///
    /// `timeout_secs` bounds every request; sensible values are 10-30.
    pub fn new(base_url: impl Into<String>, timeout_secs: u64) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self {
            client,
            base_url,
            timeout_secs,
        })
    }

    fn url(&self, device_id: &DeviceId, suffix: &str) -> String {
        format!("{}/devices/{}/{}", self.base_url, device_id, suffix)
    }

    /// POSTs a JSON body and decodes a JSON response
    async fn post_json<B, R>(&self, url: &str, body: &B) -> Result<R, TransportError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        debug!(url, "Sending request to authority");
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if status.is_success() {
            response
                .json::<R>()
                .await
                .map_err(|e| TransportError::Rejected(format!("Malformed response: {e}")))
        } else if status.is_server_error() {
            // 5xx reads as a connectivity-class failure: retry next cycle
            Err(TransportError::Connectivity(format!(
                "Authority returned {status}"
            )))
        } else {
            let detail = response
                .text()
                .await
                .unwrap_or_else(|_| status.to_string());
            Err(TransportError::Rejected(detail))
        }
    }

    /// POSTs a JSON body, ignoring the response payload
    async fn post_fire_and_forget<B>(&self, url: &str, body: &B) -> Result<(), TransportError>
    where
        B: Serialize + ?Sized,
    {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else if status.is_server_error() {
            Err(TransportError::Connectivity(format!(
                "Authority returned {status}"
            )))
        } else {
            Err(TransportError::Rejected(status.to_string()))
        }
    }

    /// Maps reqwest errors onto the port's taxonomy
    fn classify(&self, error: reqwest::Error) -> TransportError {
        if error.is_timeout() {
            TransportError::Timeout(self.timeout_secs)
        } else if let Some(status) = error.status() {
            if status == StatusCode::REQUEST_TIMEOUT {
                TransportError::Timeout(self.timeout_secs)
            } else {
                TransportError::Rejected(status.to_string())
            }
        } else {
            TransportError::Connectivity(error.to_string())
        }
    }
}

#[async_trait::async_trait]
impl ITransport for HttpTransport {
    async fn send_heartbeat(
        &self,
        request: &HeartbeatRequest,
    ) -> Result<HeartbeatResponse, TransportError> {
        let url = self.url(&request.device_id, "heartbeat");
        self.post_json(&url, request).await
    }

    async fn send_command(
        &self,
        device_id: &DeviceId,
        command: &ManagementCommand,
    ) -> Result<CommandResponse, TransportError> {
        let url = self.url(device_id, "management");
        let body = CommandBody {
            action: command.action().to_string(),
            reason: command.reason(),
        };
        self.post_json(&url, &body).await
    }

    async fn send_mismatch_alert(&self, alert: &MismatchAlert) -> Result<(), TransportError> {
        let url = self.url(&alert.device_id, "mismatch-alerts");
        self.post_fire_and_forget(&url, alert).await
    }

    async fn send_suspicious_activity(
        &self,
        alert: &SuspiciousActivityAlert,
    ) -> Result<(), TransportError> {
        let url = self.url(&alert.device_id, "suspicious-activity");
        self.post_fire_and_forget(&url, alert).await
    }
}
