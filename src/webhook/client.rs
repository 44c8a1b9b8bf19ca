use anyhow::{Context, Result};
use chrono::Utc;

use crate::crypto::sign_payload;
use crate::{SIGNATURE_HEADER, TIMESTAMP_HEADER};

/// Signs and posts webhook bodies the way Uber Eats delivers them.
///
/// Used to replay captured deliveries against a running ingress endpoint.
pub struct WebhookClient {
    http_client: reqwest::Client,
}

impl WebhookClient {
    pub fn new() -> Self {
        Self {
            http_client: reqwest::Client::new(),
        }
    }

    /// Deliver `body` to `url`, returning the receiver's JSON receipt
    pub async fn deliver(&self, url: &str, secret: &str, body: &[u8]) -> Result<serde_json::Value> {
        let timestamp = Utc::now().timestamp().to_string();
        let signature = sign_payload(body, &timestamp, secret);

        let response = self
            .http_client
            .post(url)
            .header("Content-Type", "application/json")
            .header(SIGNATURE_HEADER, signature)
            .header(TIMESTAMP_HEADER, &timestamp)
            .body(body.to_vec())
            .timeout(std::time::Duration::from_secs(10))
            .send()
            .await
            .context("Failed to send webhook")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Webhook delivery failed: {} - {}", status, body);
        }

        response
            .json()
            .await
            .context("Failed to parse webhook receipt")
    }
}

impl Default for WebhookClient {
    fn default() -> Self {
        Self::new()
    }
}
