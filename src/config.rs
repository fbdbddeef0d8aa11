//! Application configuration.
//!
//! Plain data, deserialised from JSON. Every field has a default, so `{}` is
//! a valid configuration:
//!
//! ```json
//! {
//!   "port": 3000,
//!   "security": {
//!     "cors": { "origin": "*" },
//!     "rateLimit": { "max": 100, "window": 900000 }
//!   },
//!   "bodyLimit": 1048576,
//!   "devMode": false,
//!   "requestTimeout": 30000,
//!   "eagerBody": true
//! }
//! ```
//!
//! Durations are milliseconds. `"requestTimeout": null` disables the
//! per-request deadline.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::middleware::cors::AllowOrigin;

/// Root configuration.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Listen port for [`Server`](crate::Server).
    pub port: u16,

    pub security: SecurityConfig,

    /// Largest accepted request body, in bytes.
    pub body_limit: usize,

    /// Include error `detail` in response bodies. Never enable in production.
    pub dev_mode: bool,

    /// Per-request deadline in milliseconds; `None` disables it.
    pub request_timeout: Option<u64>,

    /// Parse JSON and form bodies before the chain runs. When off, parsing
    /// happens on first [`Context::body`](crate::Context::body) call.
    pub eager_body: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            security: SecurityConfig::default(),
            body_limit: 1024 * 1024,
            dev_mode: false,
            request_timeout: Some(30_000),
            eager_body: true,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SecurityConfig {
    pub cors: CorsConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CorsConfig {
    /// `"*"` or a list of origins.
    pub origin: AllowOrigin,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Requests admitted per client per window.
    pub max: u32,

    /// Window length in milliseconds.
    #[serde(alias = "windowMillis")]
    pub window: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { max: 100, window: 15 * 60 * 1000 }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window)
    }
}

impl Config {
    /// Parses and validates a JSON document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout.map(Duration::from_millis)
    }

    /// Rejects values that parse but cannot work.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_owned()));

        if self.body_limit == 0 {
            return invalid("bodyLimit must be greater than zero");
        }
        if self.request_timeout == Some(0) {
            return invalid("requestTimeout must be greater than zero, or null to disable");
        }
        if self.security.rate_limit.max == 0 {
            return invalid("security.rateLimit.max must be greater than zero");
        }
        if self.security.rate_limit.window == 0 {
            return invalid("security.rateLimit.window must be greater than zero");
        }
        if let AllowOrigin::List(origins) = &self.security.cors.origin {
            if origins.iter().any(|o| o.trim().is_empty()) {
                return invalid("security.cors.origin must not contain empty origins");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = Config::from_json("{}").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.request_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.security.rate_limit.window(), Duration::from_secs(900));
    }

    #[test]
    fn nested_camel_case_fields() {
        let config = Config::from_json(
            r#"{
                "port": 8080,
                "security": {
                    "cors": { "origin": ["https://app.example"] },
                    "rateLimit": { "max": 2, "windowMillis": 1000 }
                },
                "bodyLimit": 16,
                "devMode": true,
                "requestTimeout": null,
                "eagerBody": false
            }"#,
        )
        .unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.security.cors.origin, AllowOrigin::List(vec!["https://app.example".into()]));
        assert_eq!(config.security.rate_limit.max, 2);
        assert_eq!(config.security.rate_limit.window(), Duration::from_secs(1));
        assert_eq!(config.body_limit, 16);
        assert!(config.dev_mode);
        assert_eq!(config.request_timeout(), None);
        assert!(!config.eager_body);
    }

    #[test]
    fn unusable_values_are_rejected() {
        for json in [
            r#"{ "bodyLimit": 0 }"#,
            r#"{ "requestTimeout": 0 }"#,
            r#"{ "security": { "rateLimit": { "max": 0 } } }"#,
            r#"{ "security": { "rateLimit": { "window": 0 } } }"#,
            r#"{ "security": { "cors": { "origin": [""] } } }"#,
        ] {
            assert!(matches!(Config::from_json(json), Err(ConfigError::Invalid(_))), "{json}");
        }
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(Config::from_json("{ port: 1 }"), Err(ConfigError::Parse(_))));
        assert!(matches!(
            Config::from_json(r#"{ "security": { "cors": { "origin": "https://a" } } }"#),
            Err(ConfigError::Parse(_))
        ));
    }
}
