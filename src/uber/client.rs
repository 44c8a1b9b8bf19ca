use anyhow::{Context, Result};
use reqwest::Method;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::Arc;

use super::TokenProvider;
use crate::config::UberSettings;
use crate::webhook::WebhookEventType;

const WEBHOOKS_PATH: &str = "/v1/eats/webhooks";

/// A webhook endpoint registered with Uber Eats
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookSubscription {
    #[serde(default, alias = "webhook_id")]
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub events: Vec<String>,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub created_at: Option<String>,
}

fn default_active() -> bool {
    true
}

/// Partial update of a subscription; unset fields are left alone
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubscriptionUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub events: Option<Vec<WebhookEventType>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SubscriptionList {
    Wrapped { webhooks: Vec<WebhookSubscription> },
    Bare(Vec<WebhookSubscription>),
}

/// Bearer-authenticated client for the Uber Eats REST API
#[derive(Clone)]
pub struct UberEatsClient {
    client: reqwest::Client,
    base_url: String,
    tokens: Arc<dyn TokenProvider>,
}

impl UberEatsClient {
    pub fn new(settings: &UberSettings, tokens: Arc<dyn TokenProvider>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.http_timeout)
            .user_agent(concat!("eatsd/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            tokens,
        })
    }

    async fn send(&self, method: Method, path: &str, body: Option<&serde_json::Value>) -> Result<reqwest::Response> {
        let token = self.tokens.get_token().await?;
        let url = format!("{}{}", self.base_url, path);

        tracing::debug!(method = %method, path, "Uber Eats API request");
        let mut req = self
            .client
            .request(method.clone(), &url)
            .bearer_auth(&token)
            .header("Accept", "application/json");
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = req
            .send()
            .await
            .with_context(|| format!("Failed to call {} {}", method, path))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let error = resp.text().await.unwrap_or_default();
            tracing::warn!(method = %method, path, status = status.as_u16(), "Uber Eats API error");
            anyhow::bail!("Uber Eats API returned {}: {}", status, error);
        }
        Ok(resp)
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<T> {
        self.send(method, path, body)
            .await?
            .json()
            .await
            .with_context(|| format!("Failed to parse response from {}", path))
    }

    /// Register `url` for the given event types
    pub async fn configure_webhook(&self, url: &str, events: &[WebhookEventType]) -> Result<WebhookSubscription> {
        let body = serde_json::json!({ "url": url, "events": events, "active": true });
        self.request(Method::POST, WEBHOOKS_PATH, Some(&body)).await
    }

    pub async fn list_webhooks(&self) -> Result<Vec<WebhookSubscription>> {
        let list: SubscriptionList = self.request(Method::GET, WEBHOOKS_PATH, None).await?;
        Ok(match list {
            SubscriptionList::Wrapped { webhooks } => webhooks,
            SubscriptionList::Bare(webhooks) => webhooks,
        })
    }

    pub async fn update_webhook(&self, id: &str, update: &SubscriptionUpdate) -> Result<()> {
        let body = serde_json::to_value(update)?;
        let path = format!("{}/{}", WEBHOOKS_PATH, urlencoding::encode(id));
        self.send(Method::PUT, &path, Some(&body)).await?;
        Ok(())
    }

    pub async fn delete_webhook(&self, id: &str) -> Result<()> {
        let path = format!("{}/{}", WEBHOOKS_PATH, urlencoding::encode(id));
        self.send(Method::DELETE, &path, None).await?;
        Ok(())
    }

    /// Ask Uber Eats to send a test delivery to `url`
    pub async fn test_webhook(&self, url: &str) -> Result<()> {
        let body = serde_json::json!({
            "url": url,
            "event_type": WebhookEventType::OrderCreated.as_str(),
        });
        let path = format!("{}/test", WEBHOOKS_PATH);
        self.send(Method::POST, &path, Some(&body)).await?;
        Ok(())
    }
}
