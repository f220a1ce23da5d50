use crate::config::NotifyConfig;
use crate::logging::SourceLog;
use anyhow::{Context, Result};
use std::time::Duration;
use tracing::debug;

/// Outbound trigger asking the app backend to send the scheduled notifications.
pub struct NotifyClient {
    inner: reqwest::Client,
    endpoint: String,
}

impl NotifyClient {
    /// `None` when no endpoint is configured.
    pub fn new(config: &NotifyConfig, user_agent: &str) -> Result<Option<Self>> {
        let Some(endpoint) = config.endpoint.clone().filter(|e| !e.trim().is_empty()) else {
            return Ok(None);
        };

        let inner = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            // The backend's certificate chain does not validate.
            .danger_accept_invalid_certs(true)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Some(Self { inner, endpoint }))
    }

    /// One POST, no retry. True iff the endpoint answered 200.
    pub async fn trigger(&self, log: &SourceLog) -> bool {
        debug!("POST {}", self.endpoint);
        match self.inner.post(&self.endpoint).send().await {
            Ok(resp) if resp.status() == reqwest::StatusCode::OK => {
                log.info("API call successful");
                true
            }
            Ok(resp) => {
                log.warn(format!("API call failed with status {}", resp.status().as_u16()));
                false
            }
            Err(e) => {
                log.error(format!("API call failed: {}", e));
                false
            }
        }
    }
}
