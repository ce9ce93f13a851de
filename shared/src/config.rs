use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::model::Mode;
use crate::{DEFAULT_API_ORIGIN, DEFAULT_UPLOAD_FIELD, MAX_UPLOAD_BYTES};

pub const ENV_API_ORIGIN: &str = "HELMET_API_ORIGIN";
pub const ENV_REQUEST_TIMEOUT_MS: &str = "HELMET_REQUEST_TIMEOUT_MS";
/// Video inference can take minutes; anything past ten is a misconfiguration.
pub const MAX_TIMEOUT_MS: u64 = 600_000;

/// What to do with a detection response that arrives after the session has
/// moved on (new submission, new file, mode switch or clear).
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StaleResponsePolicy {
    /// Only the latest submission may update the session.
    #[default]
    DiscardStale,
    /// Every response for the current mode is applied in arrival order.
    ApplyLatestArrival,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: String, reason: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    pub api_origin: String,
    pub image_endpoint: String,
    pub video_endpoint: String,
    pub health_endpoint: String,
    pub stream_endpoint: String,
    pub upload_field: String,
    pub max_upload_bytes: usize,
    /// Unset leaves the timeout to the transport.
    pub request_timeout_ms: Option<u64>,
    pub stale_response_policy: StaleResponsePolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_origin: DEFAULT_API_ORIGIN.into(),
            image_endpoint: "/predict".into(),
            video_endpoint: "/predict-video".into(),
            health_endpoint: "/".into(),
            stream_endpoint: "/stream-video".into(),
            upload_field: DEFAULT_UPLOAD_FIELD.into(),
            max_upload_bytes: MAX_UPLOAD_BYTES,
            request_timeout_ms: None,
            stale_response_policy: StaleResponsePolicy::default(),
        }
    }
}

impl ClientConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Defaults, then the optional file, then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_with(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(origin) = lookup(ENV_API_ORIGIN) {
            self.api_origin = origin.trim().to_string();
        }
        if let Some(raw) = lookup(ENV_REQUEST_TIMEOUT_MS) {
            let raw = raw.trim();
            self.request_timeout_ms = if raw.is_empty() {
                None
            } else {
                Some(raw.parse().map_err(|e: std::num::ParseIntError| ConfigError::Invalid {
                    key: ENV_REQUEST_TIMEOUT_MS.into(),
                    reason: e.to_string(),
                })?)
            };
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let origin = Url::parse(&self.api_origin).map_err(|e| ConfigError::Invalid {
            key: "api_origin".into(),
            reason: e.to_string(),
        })?;
        if !matches!(origin.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid {
                key: "api_origin".into(),
                reason: format!("scheme {} is not http or https", origin.scheme()),
            });
        }
        if !origin.username().is_empty() || origin.password().is_some() {
            return Err(ConfigError::Invalid {
                key: "api_origin".into(),
                reason: "credentials are not allowed".into(),
            });
        }
        if origin.query().is_some() || origin.fragment().is_some() {
            return Err(ConfigError::Invalid {
                key: "api_origin".into(),
                reason: "origin cannot carry a query or fragment".into(),
            });
        }

        for (key, value) in [
            ("image_endpoint", &self.image_endpoint),
            ("video_endpoint", &self.video_endpoint),
            ("health_endpoint", &self.health_endpoint),
            ("stream_endpoint", &self.stream_endpoint),
        ] {
            if !value.starts_with('/') {
                return Err(ConfigError::Invalid {
                    key: key.into(),
                    reason: format!("{value:?} must start with '/'"),
                });
            }
        }

        if self.upload_field.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "upload_field".into(),
                reason: "cannot be empty".into(),
            });
        }
        if self.max_upload_bytes == 0 || self.max_upload_bytes > MAX_UPLOAD_BYTES {
            return Err(ConfigError::Invalid {
                key: "max_upload_bytes".into(),
                reason: format!("must be between 1 and {MAX_UPLOAD_BYTES}"),
            });
        }
        if let Some(ms) = self.request_timeout_ms {
            if ms == 0 || ms > MAX_TIMEOUT_MS {
                return Err(ConfigError::Invalid {
                    key: "request_timeout_ms".into(),
                    reason: format!("must be between 1 and {MAX_TIMEOUT_MS}"),
                });
            }
        }
        Ok(())
    }

    /// Origin without a trailing slash, ready for path concatenation.
    #[must_use]
    pub fn origin(&self) -> &str {
        self.api_origin.trim_end_matches('/')
    }

    #[must_use]
    pub fn endpoint(&self, mode: Mode) -> String {
        let path = match mode {
            Mode::Image => &self.image_endpoint,
            Mode::Video => &self.video_endpoint,
        };
        format!("{}{path}", self.origin())
    }

    #[must_use]
    pub fn health_url(&self) -> String {
        format!("{}{}", self.origin(), self.health_endpoint)
    }

    /// Where the annotated clip is played from.
    #[must_use]
    pub fn media_url(&self, video_url: &str) -> String {
        format!("{}{video_url}", self.origin())
    }

    /// MJPEG stream of the annotated clip, addressed by file name.
    #[must_use]
    pub fn stream_url(&self, video_url: &str) -> Option<String> {
        let name = video_url.rsplit('/').next().filter(|n| !n.is_empty())?;
        let encoded: String = url::form_urlencoded::byte_serialize(name.as_bytes()).collect();
        Some(format!(
            "{}{}?filename={encoded}",
            self.origin(),
            self.stream_endpoint
        ))
    }

    #[must_use]
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }
}
