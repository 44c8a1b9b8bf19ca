use std::time::Duration;

/// Runtime configuration, built once at startup and handed to each component.
#[derive(Debug, Clone)]
pub struct Settings {
    pub database_path: String,
    pub public_url: String,
    pub webhook_secret: String,
    pub verify_signatures: bool,
    /// Reject deliveries whose timestamp is further than this from now.
    pub webhook_max_age_secs: Option<i64>,
    pub sandbox_mode: bool,
    pub handler_timeout: Duration,
    pub events_default_limit: u32,
    pub events_max_limit: u32,
    pub admin_api_key: Option<String>,
    pub uber: UberSettings,
}

/// Upstream Uber Eats API and OAuth settings
#[derive(Debug, Clone)]
pub struct UberSettings {
    pub base_url: String,
    pub auth_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub scopes: String,
    pub http_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_path: "./eatsd.db".to_string(),
            public_url: crate::DEFAULT_SERVER_URL.to_string(),
            webhook_secret: String::new(),
            verify_signatures: true,
            webhook_max_age_secs: None,
            sandbox_mode: true,
            handler_timeout: Duration::from_secs(30),
            events_default_limit: 100,
            events_max_limit: 100,
            admin_api_key: None,
            uber: UberSettings::default(),
        }
    }
}

impl Default for UberSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.uber.com".to_string(),
            auth_url: "https://auth.uber.com/oauth/v2/token".to_string(),
            client_id: String::new(),
            client_secret: String::new(),
            scopes: "eats.store eats.order eats.report".to_string(),
            http_timeout: Duration::from_secs(30),
        }
    }
}

impl Settings {
    /// Load settings from the process environment, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let uber_defaults = UberSettings::default();

        Self {
            database_path: env_string("EATSD_DATABASE").unwrap_or(defaults.database_path),
            public_url: env_string("EATSD_PUBLIC_URL").unwrap_or(defaults.public_url),
            webhook_secret: std::env::var("UBER_EATS_WEBHOOK_SECRET").unwrap_or_default(),
            verify_signatures: env_flag("ENABLE_WEBHOOK_VERIFICATION", defaults.verify_signatures),
            webhook_max_age_secs: env_parse("WEBHOOK_MAX_AGE_SECS"),
            sandbox_mode: env_flag("UBER_EATS_SANDBOX_MODE", defaults.sandbox_mode),
            handler_timeout: env_parse("WEBHOOK_HANDLER_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.handler_timeout),
            events_default_limit: env_parse("EVENTS_DEFAULT_LIMIT")
                .unwrap_or(defaults.events_default_limit),
            events_max_limit: env_parse("EVENTS_MAX_LIMIT").unwrap_or(defaults.events_max_limit),
            admin_api_key: env_string("EATSD_ADMIN_API_KEY"),
            uber: UberSettings {
                base_url: env_string("UBER_EATS_BASE_URL").unwrap_or(uber_defaults.base_url),
                auth_url: env_string("UBER_EATS_AUTH_URL").unwrap_or(uber_defaults.auth_url),
                client_id: std::env::var("UBER_EATS_CLIENT_ID").unwrap_or_default(),
                client_secret: std::env::var("UBER_EATS_CLIENT_SECRET").unwrap_or_default(),
                scopes: env_string("UBER_EATS_SCOPES").unwrap_or(uber_defaults.scopes),
                http_timeout: env_parse("UBER_EATS_HTTP_TIMEOUT_SECS")
                    .map(Duration::from_secs)
                    .unwrap_or(uber_defaults.http_timeout),
            },
        }
    }

    pub fn pagination(&self) -> Pagination {
        Pagination {
            default_limit: self.events_default_limit.max(1),
            max_limit: self.events_max_limit.max(1),
        }
    }
}

/// Limit/offset bounds for list endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub default_limit: u32,
    pub max_limit: u32,
}

impl Pagination {
    /// Resolve a requested limit: missing or zero means the default, capped at the max
    pub fn clamp(&self, requested: Option<u32>) -> u32 {
        match requested {
            None | Some(0) => self.default_limit.min(self.max_limit),
            Some(n) => n.min(self.max_limit),
        }
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    match env_string(name) {
        Some(raw) => match raw.parse() {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(variable = name, value = %raw, "Ignoring unparseable setting");
                None
            }
        },
        None => None,
    }
}

fn env_flag(name: &str, default: bool) -> bool {
    env_string(name)
        .and_then(|v| parse_flag(&v))
        .unwrap_or(default)
}

pub(crate) fn parse_flag(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_clamp() {
        let p = Pagination {
            default_limit: 20,
            max_limit: 100,
        };

        assert_eq!(p.clamp(None), 20);
        assert_eq!(p.clamp(Some(0)), 20);
        assert_eq!(p.clamp(Some(50)), 50);
        assert_eq!(p.clamp(Some(500)), 100);
    }

    #[test]
    fn test_default_never_exceeds_max() {
        let settings = Settings {
            events_default_limit: 250,
            events_max_limit: 100,
            ..Settings::default()
        };
        assert_eq!(settings.pagination().clamp(None), 100);
    }

    #[test]
    fn test_parse_flag() {
        assert_eq!(parse_flag("TRUE"), Some(true));
        assert_eq!(parse_flag("on"), Some(true));
        assert_eq!(parse_flag("0"), Some(false));
        assert_eq!(parse_flag("No"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }

    #[test]
    fn test_defaults_fail_closed() {
        let settings = Settings::default();
        assert!(settings.verify_signatures);
        assert!(settings.admin_api_key.is_none());
        assert_eq!(settings.events_default_limit, 100);
    }
}
