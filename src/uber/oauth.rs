use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::config::UberSettings;
use crate::db::Database;
use crate::models::{GrantType, StoredToken, TokenInfo, TokenResponse};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Uber Eats client credentials are not configured")]
    NotConfigured,
    #[error("Failed to reach the Uber auth server: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Uber auth server rejected the request ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("Token storage failed: {0:#}")]
    Storage(anyhow::Error),
}

/// Source of bearer tokens for upstream API calls
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn get_token(&self) -> Result<String, AuthError>;
}

struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at - chrono::Duration::minutes(5)
    }
}

/// OAuth client for the Uber auth server. Every token obtained is persisted.
pub struct UberOAuth {
    client: reqwest::Client,
    db: Database,
    settings: UberSettings,
    cache: RwLock<Option<CachedToken>>,
}

impl UberOAuth {
    pub fn new(db: Database, settings: UberSettings) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.http_timeout)
            .user_agent(concat!("eatsd/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            db,
            settings,
            cache: RwLock::new(None),
        })
    }

    pub fn is_configured(&self) -> bool {
        !self.settings.client_id.is_empty() && !self.settings.client_secret.is_empty()
    }

    fn credentials(&self) -> Result<(&str, &str), AuthError> {
        if !self.is_configured() {
            return Err(AuthError::NotConfigured);
        }
        Ok((&self.settings.client_id, &self.settings.client_secret))
    }

    /// Sibling endpoint of the token URL, e.g. `.../oauth/v2/revoke`
    fn endpoint(&self, name: &str) -> String {
        let base = self
            .settings
            .auth_url
            .strip_suffix("/token")
            .unwrap_or(&self.settings.auth_url);
        format!("{}/{}", base.trim_end_matches('/'), name)
    }

    /// Browser URL that starts the authorization code flow
    pub fn authorize_url(&self, redirect_uri: &str, state: Option<&str>, scope: Option<&str>) -> String {
        let mut url = format!(
            "{}?response_type=code&client_id={}&redirect_uri={}&scope={}",
            self.endpoint("authorize"),
            urlencoding::encode(&self.settings.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(scope.unwrap_or(&self.settings.scopes)),
        );
        if let Some(state) = state {
            url.push_str("&state=");
            url.push_str(&urlencoding::encode(state));
        }
        url
    }

    async fn request_token(&self, grant: GrantType, extra: &[(&str, &str)]) -> Result<TokenResponse, AuthError> {
        let (client_id, client_secret) = self.credentials()?;

        let mut form = vec![
            ("grant_type", grant.as_str()),
            ("client_id", client_id),
            ("client_secret", client_secret),
        ];
        form.extend_from_slice(extra);

        let resp = self
            .client
            .post(&self.settings.auth_url)
            .form(&form)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            tracing::warn!(grant_type = grant.as_str(), status, "Token request rejected");
            return Err(AuthError::Rejected { status, body });
        }

        let status = resp.status().as_u16();
        let token: TokenResponse = resp.json().await?;
        let stored = StoredToken::from_response(&token, Utc::now()).ok_or_else(|| {
            tracing::warn!(grant_type = grant.as_str(), expires_in = token.expires_in, "Token lifetime out of range");
            AuthError::Rejected {
                status,
                body: format!("expires_in out of range: {}", token.expires_in),
            }
        })?;
        self.db.save_token(&stored).map_err(AuthError::Storage)?;

        tracing::info!(
            grant_type = grant.as_str(),
            expires_in = token.expires_in,
            scope = %token.scope,
            "Obtained Uber access token"
        );
        Ok(token)
    }

    pub async fn client_credentials(&self, scope: Option<&str>) -> Result<TokenResponse, AuthError> {
        let scope = scope.unwrap_or(&self.settings.scopes).to_string();
        self.request_token(GrantType::ClientCredentials, &[("scope", scope.as_str())])
            .await
    }

    pub async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenResponse, AuthError> {
        self.request_token(
            GrantType::AuthorizationCode,
            &[("code", code), ("redirect_uri", redirect_uri)],
        )
        .await
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, AuthError> {
        self.request_token(GrantType::RefreshToken, &[("refresh_token", refresh_token)])
            .await
    }

    /// Revoke a token upstream; on success it is also deactivated locally
    pub async fn revoke(&self, token: &str, hint: Option<&str>) -> Result<bool, AuthError> {
        let (client_id, client_secret) = self.credentials()?;

        let mut form = vec![
            ("token", token),
            ("client_id", client_id),
            ("client_secret", client_secret),
        ];
        if let Some(hint) = hint {
            form.push(("token_type_hint", hint));
        }

        let resp = self
            .client
            .post(self.endpoint("revoke"))
            .form(&form)
            .send()
            .await?;

        if resp.status() != reqwest::StatusCode::OK {
            tracing::warn!(status = resp.status().as_u16(), "Token revocation refused");
            return Ok(false);
        }

        let deactivated = self.db.deactivate_token(token).map_err(AuthError::Storage)?;
        let mut cache = self.cache.write().await;
        if cache.as_ref().is_some_and(|c| c.access_token == token) {
            *cache = None;
        }
        tracing::info!(deactivated, "Token revoked");
        Ok(true)
    }

    pub async fn introspect(&self, token: &str) -> Result<TokenInfo, AuthError> {
        let (client_id, client_secret) = self.credentials()?;

        let resp = self
            .client
            .post(self.endpoint("introspect"))
            .form(&[
                ("token", token),
                ("client_id", client_id),
                ("client_secret", client_secret),
            ])
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(AuthError::Rejected { status, body });
        }

        Ok(resp.json().await?)
    }
}

#[async_trait]
impl TokenProvider for UberOAuth {
    /// Reuse a cached or stored token until five minutes before expiry, then
    /// refresh it, falling back to the client credentials grant.
    async fn get_token(&self) -> Result<String, AuthError> {
        let now = Utc::now();
        if let Some(cached) = self.cache.read().await.as_ref() {
            if cached.is_fresh(now) {
                return Ok(cached.access_token.clone());
            }
        }

        let mut cache = self.cache.write().await;
        if let Some(cached) = cache.as_ref() {
            if cached.is_fresh(now) {
                return Ok(cached.access_token.clone());
            }
        }

        if let Some(stored) = self.db.active_token(now).map_err(AuthError::Storage)? {
            if stored.is_fresh(now) {
                *cache = Some(CachedToken {
                    access_token: stored.access_token.clone(),
                    expires_at: stored.expires_at,
                });
                return Ok(stored.access_token);
            }
        }

        let refreshed = match self.db.latest_refresh_token().map_err(AuthError::Storage)? {
            Some(refresh_token) => match self.refresh(&refresh_token).await {
                Ok(token) => Some(token),
                Err(e) => {
                    tracing::warn!("Token refresh failed, using client credentials: {}", e);
                    None
                }
            },
            None => None,
        };

        let token = match refreshed {
            Some(token) => token,
            None => self.client_credentials(None).await?,
        };

        *cache = Some(CachedToken {
            access_token: token.access_token.clone(),
            expires_at: token.expires_at(Utc::now()).unwrap_or_else(Utc::now),
        });
        Ok(token.access_token)
    }
}
