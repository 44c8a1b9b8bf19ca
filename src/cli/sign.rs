use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use std::path::Path;

use super::OutputFormat;
use crate::crypto::{generate_webhook_secret, sign_payload};
use crate::webhook::WebhookClient;
use crate::{SIGNATURE_HEADER, TIMESTAMP_HEADER};

fn read_body(file: &Path) -> Result<Vec<u8>> {
    std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))
}

#[derive(Debug, Serialize)]
pub struct SignedHeaders {
    pub signature: String,
    pub timestamp: String,
}

impl std::fmt::Display for SignedHeaders {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}: {}", SIGNATURE_HEADER, self.signature)?;
        write!(f, "{}: {}", TIMESTAMP_HEADER, self.timestamp)
    }
}

pub fn sign_file(secret: &str, timestamp: Option<&str>, file: &Path) -> Result<SignedHeaders> {
    let body = read_body(file)?;
    let timestamp = match timestamp {
        Some(ts) => ts.to_string(),
        None => Utc::now().timestamp().to_string(),
    };
    Ok(SignedHeaders {
        signature: sign_payload(&body, &timestamp, secret),
        timestamp,
    })
}

/// Print the headers a delivery of `file` should carry
pub fn run_sign(
    secret: &str,
    timestamp: Option<&str>,
    file: &Path,
    format: OutputFormat,
) -> Result<()> {
    format.print(&sign_file(secret, timestamp, file)?)
}

#[derive(Debug, Serialize)]
struct GeneratedSecret {
    secret: String,
}

impl std::fmt::Display for GeneratedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.secret)
    }
}

pub fn run_secret(format: OutputFormat) -> Result<()> {
    format.print(&GeneratedSecret {
        secret: generate_webhook_secret(),
    })
}

/// Sign `file` and post it to an ingress endpoint
pub async fn run_send(url: &str, secret: &str, file: &Path, format: OutputFormat) -> Result<()> {
    let body = read_body(file)?;
    serde_json::from_slice::<serde_json::Value>(&body)
        .with_context(|| format!("{} is not valid JSON", file.display()))?;

    let receipt = WebhookClient::new().deliver(url, secret, &body).await?;
    tracing::debug!(url = %url, "Delivered webhook");
    format.print_json(&receipt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::verify_signature;
    use std::io::Write;

    #[test]
    fn test_sign_file_matches_verifier() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(br#"{"metadata":{"event_type":"store.status"}}"#)
            .unwrap();

        let headers = sign_file("whsec", Some("1700000000"), file.path()).unwrap();
        assert_eq!(headers.timestamp, "1700000000");

        let body = std::fs::read(file.path()).unwrap();
        assert!(verify_signature(
            &body,
            Some(&headers.signature),
            Some(&headers.timestamp),
            "whsec",
            true
        ));

        let text = headers.to_string();
        assert!(text.starts_with("X-Uber-Signature: "));
        assert!(text.contains("X-Uber-Timestamp: 1700000000"));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let err = sign_file("whsec", None, Path::new("/nonexistent/body.json")).unwrap_err();
        assert!(err.to_string().contains("Failed to read"));
    }
}
