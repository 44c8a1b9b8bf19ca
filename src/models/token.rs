use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// OAuth grant types accepted by the token endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    ClientCredentials,
    AuthorizationCode,
    RefreshToken,
}

impl GrantType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantType::ClientCredentials => "client_credentials",
            GrantType::AuthorizationCode => "authorization_code",
            GrantType::RefreshToken => "refresh_token",
        }
    }
}

/// Token endpoint response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default = "default_expires_in")]
    pub expires_in: i64,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: String,
}

/// Longest token lifetime accepted from the authorization server
pub const MAX_TOKEN_LIFETIME_SECS: i64 = 366 * 24 * 60 * 60;

impl TokenResponse {
    /// Absolute expiry, or None when `expires_in` is negative or implausibly long
    pub fn expires_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if !(0..=MAX_TOKEN_LIFETIME_SECS).contains(&self.expires_in) {
            return None;
        }
        chrono::Duration::try_seconds(self.expires_in).and_then(|d| now.checked_add_signed(d))
    }
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

fn default_expires_in() -> i64 {
    3600
}

/// Introspection result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenInfo {
    pub active: bool,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub exp: Option<i64>,
    #[serde(default)]
    pub iat: Option<i64>,
}

/// A token persisted in the token store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredToken {
    pub id: String,
    #[serde(skip_serializing)]
    pub access_token: String,
    #[serde(skip_serializing)]
    pub refresh_token: Option<String>,
    pub token_type: String,
    pub scope: String,
    pub expires_at: DateTime<Utc>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl StoredToken {
    /// None when the response carries an unusable lifetime
    pub fn from_response(resp: &TokenResponse, now: DateTime<Utc>) -> Option<Self> {
        Some(Self {
            id: uuid::Uuid::new_v4().to_string(),
            access_token: resp.access_token.clone(),
            refresh_token: resp.refresh_token.clone(),
            token_type: resp.token_type.clone(),
            scope: resp.scope.clone(),
            expires_at: resp.expires_at(now)?,
            is_active: true,
            created_at: now,
        })
    }

    /// Usable until five minutes before expiry
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.is_active && now < self.expires_at - chrono::Duration::minutes(5)
    }
}
