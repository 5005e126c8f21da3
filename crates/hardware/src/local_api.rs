//! HTTP gateway to the kiosk's local hardware API.

use async_trait::async_trait;
use rvm_config::LocalApiConfig;
use rvm_core::error::HardwareError;
use rvm_core::{HardwareCommand, HardwareGateway, ModuleId};
use std::time::Duration;
use tracing::{debug, warn};

use crate::protocol::{self, ApiRequest};

/// Issues commands as JSON `POST`s against the local API and resolves once
/// the API answers with a success status.
pub struct LocalApiGateway {
    base_url: String,
    timeout_ms: u64,
    client: reqwest::Client,
}

impl LocalApiGateway {
    pub fn new(base_url: impl Into<String>, timeout_ms: u64) -> Result<Self, HardwareError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| HardwareError::Transport(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout_ms,
            client,
        })
    }

    pub fn from_config(config: &LocalApiConfig) -> Result<Self, HardwareError> {
        Self::new(config.base_url.clone(), config.timeout_ms)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post(&self, action: &str, request: ApiRequest) -> Result<(), HardwareError> {
        let url = format!("{}{}", self.base_url, request.path);
        debug!(action, %url, "Hardware request");

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&request.body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    HardwareError::Timeout {
                        action: action.to_string(),
                        timeout_ms: self.timeout_ms,
                    }
                } else {
                    HardwareError::Request {
                        action: action.to_string(),
                        reason: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(action, status = status.as_u16(), body = %body, "Hardware API returned error");
            return Err(HardwareError::Rejected {
                action: action.to_string(),
                status_code: status.as_u16(),
            });
        }

        Ok(())
    }
}

#[async_trait]
impl HardwareGateway for LocalApiGateway {
    fn name(&self) -> &str {
        "local-api"
    }

    async fn send(&self, module: &ModuleId, command: &HardwareCommand) -> Result<(), HardwareError> {
        self.post(command.action(), protocol::encode(module, command))
            .await
    }

    async fn request_module_id(&self) -> Result<(), HardwareError> {
        self.post("get_module_id", protocol::module_id_request())
            .await
    }

    async fn health_check(&self) -> Result<bool, HardwareError> {
        // Any HTTP answer means the API process is up.
        match self.client.get(&self.base_url).send().await {
            Ok(_) => Ok(true),
            Err(e) if e.is_connect() || e.is_timeout() => Ok(false),
            Err(e) => Err(HardwareError::Transport(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slash_is_trimmed() {
        let gateway = LocalApiGateway::new("http://localhost:8081/", 1_000).unwrap();
        assert_eq!(gateway.base_url(), "http://localhost:8081");
        assert_eq!(gateway.name(), "local-api");
    }

    #[tokio::test]
    async fn unreachable_api_is_a_request_error() {
        // Port 9 (discard) is closed on test machines.
        let gateway = LocalApiGateway::new("http://127.0.0.1:9", 500).unwrap();
        let err = gateway
            .send(&ModuleId("11".into()), &HardwareCommand::OpenGate)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            HardwareError::Request { .. } | HardwareError::Timeout { .. }
        ));
        assert!(!gateway.health_check().await.unwrap_or(false));
    }
}
