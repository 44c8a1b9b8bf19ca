mod events;
mod health;
mod sign;

pub use events::*;
pub use health::*;
pub use sign::*;

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Human,
    Json,
}

impl OutputFormat {
    pub fn print<T: Serialize + std::fmt::Display>(&self, value: &T) -> Result<()> {
        match self {
            OutputFormat::Human => println!("{}", value),
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        }
        Ok(())
    }

    pub fn print_json<T: Serialize>(&self, value: &T) -> Result<()> {
        match self {
            OutputFormat::Human => println!("{}", serde_json::to_string_pretty(value)?),
            OutputFormat::Json => println!("{}", serde_json::to_string(value)?),
        }
        Ok(())
    }
}

/// Connection settings shared by the commands that talk to a running server
#[derive(Debug, Clone)]
pub struct ServerTarget {
    pub url: String,
    pub api_key: Option<String>,
}

/// Thin HTTP client for the management API
pub struct ApiClient {
    client: reqwest::Client,
    target: ServerTarget,
}

impl ApiClient {
    pub fn new(target: ServerTarget) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client, target })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.target.url.trim_end_matches('/'), path)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.target.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }

    async fn decode<T: DeserializeOwned>(resp: reqwest::Response, what: &str) -> Result<T> {
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            let message = serde_json::from_str::<serde_json::Value>(&body)
                .ok()
                .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
                .unwrap_or(body);
            anyhow::bail!("Failed to {} ({}): {}", what, status, message);
        }
        resp.json().await.context("Failed to parse response")
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str, what: &str) -> Result<T> {
        let resp = self
            .authorize(self.client.get(self.url(path)))
            .send()
            .await
            .with_context(|| format!("Failed to {}", what))?;
        Self::decode(resp, what).await
    }

    pub async fn post<T: DeserializeOwned>(&self, path: &str, what: &str) -> Result<T> {
        let resp = self
            .authorize(self.client.post(self.url(path)))
            .send()
            .await
            .with_context(|| format!("Failed to {}", what))?;
        Self::decode(resp, what).await
    }
}
