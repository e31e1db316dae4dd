//! Push client for services that report matches to the hub

use serde::Deserialize;
use std::time::Duration;

use crate::error::ClientError;
use crate::protocol::{now_iso, PushRequest, MATCH_EVENT};

/// Keep the caller (a recognition request) from stalling on a slow hub
const PUSH_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize)]
struct PushAck {
    delivered: usize,
}

#[derive(Debug, Clone)]
pub struct PushClient {
    http: reqwest::Client,
    endpoint: String,
}

impl PushClient {
    /// `base_url` is the hub root, e.g. `http://localhost:3001`
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder().timeout(PUSH_TIMEOUT).build()?;
        Ok(Self {
            http,
            endpoint: format!("{}/api/push", base_url.trim_end_matches('/')),
        })
    }

    /// Report a recognised face. Returns how many clients the hub reached.
    pub async fn push_match(
        &self,
        name: &str,
        timestamp: Option<String>,
    ) -> Result<usize, ClientError> {
        let body = PushRequest {
            event: Some(MATCH_EVENT.to_string()),
            name: Some(name.to_string()),
            timestamp: Some(timestamp.unwrap_or_else(now_iso)),
        };

        let response = self.http.post(&self.endpoint).json(&body).send().await?;
        if !response.status().is_success() {
            tracing::warn!(status = %response.status(), "Hub rejected match push");
            return Err(ClientError::Rejected(response.status()));
        }

        let ack: PushAck = response.json().await?;
        tracing::info!(name, delivered = ack.delivered, "Pushed match event to hub");
        Ok(ack.delivered)
    }
}
