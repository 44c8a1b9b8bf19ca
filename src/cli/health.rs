use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::{ApiClient, OutputFormat};

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub service: String,
    pub version: String,
    pub sandbox: bool,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}: {}", self.service, self.version, self.status)?;
        if self.sandbox {
            write!(f, " (sandbox)")?;
        }
        Ok(())
    }
}

/// Check that a server is up
pub async fn run_health(api: &ApiClient, format: OutputFormat) -> Result<()> {
    let health: HealthStatus = api.get("/health", "check health").await?;
    format.print(&health)
}
