//! Configuration parsing and validation for airelay.
//!
//! Configuration comes from an optional TOML file layered over process
//! environment variables, with built-in defaults for everything except the
//! provider credential.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize, Serializer};
use std::path::Path;
use std::time::Duration;

use crate::gateway::types::Feature;

/// Environment variable holding the provider credential.
pub const API_KEY_ENV: &str = "LLM_API_KEY";
/// Environment variable overriding the provider base URL.
pub const BASE_URL_ENV: &str = "LLM_API_BASE_URL";
/// Environment variable overriding the model for every feature.
pub const MODEL_ENV: &str = "LLM_MODEL_NAME";

/// Provider base URL used when neither the file nor the environment sets one.
pub const DEFAULT_BASE_URL: &str = "https://integrate.api.nvidia.com/v1";

/// Root configuration structure.
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub relay: RelayConfig,
    pub endpoints: EndpointsConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on (e.g., "127.0.0.1:8080")
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Maximum number of requests handled at once
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_max_concurrency() -> usize {
    1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            max_concurrency: default_max_concurrency(),
        }
    }
}

/// Upstream provider configuration after environment resolution.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Base URL of the chat-completion API (without `/chat/completions`)
    pub base_url: String,
    /// Provider credential. `None` makes every feature request fail with 500.
    pub api_key: Option<ApiKey>,
    /// Model applied to every feature unless an endpoint overrides it
    pub model: Option<String>,
    /// Overall ceiling for one upstream exchange, body included
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

/// Streaming relay behaviour.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Append a terminal `event: error` notice when the upstream stream
    /// breaks after headers were sent.
    #[serde(default = "default_true")]
    pub signal_truncation: bool,
}

fn default_true() -> bool {
    true
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            signal_truncation: true,
        }
    }
}

/// Per-feature overrides.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EndpointsConfig {
    #[serde(default)]
    pub chat: EndpointConfig,
    #[serde(default)]
    pub plan: EndpointConfig,
    #[serde(default)]
    pub quiz: EndpointConfig,
}

/// Overrides for a single feature endpoint. Unset fields use the feature defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EndpointConfig {
    pub system_prompt: Option<String>,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

/// Fully resolved upstream parameters for one feature.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSettings {
    pub system_prompt: String,
    pub model: String,
    pub stream: bool,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// API key wrapper that redacts in Debug/Display/Serialize and zeroizes on drop.
///
/// Only accessible via `.expose_secret()`, so every use is grep-auditable.
#[derive(Clone)]
pub struct ApiKey(SecretString);

impl ApiKey {
    /// Access the raw key value.
    pub fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl std::fmt::Display for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl Serialize for ApiKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("[REDACTED]")
    }
}

impl From<String> for ApiKey {
    fn from(s: String) -> Self {
        ApiKey(SecretString::from(s))
    }
}

impl From<&str> for ApiKey {
    fn from(s: &str) -> Self {
        ApiKey(SecretString::from(s))
    }
}

/// How the provider credential was resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum KeySource {
    /// Key was a literal string in config (no ${} references)
    Literal,
    /// Key contained ${VAR} references expanded from environment
    EnvExpanded,
    /// Key came from the conventional env var (holds var name)
    Convention(String),
    /// No key available
    None,
}

impl std::fmt::Display for KeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeySource::Literal => write!(f, "config-literal"),
            KeySource::EnvExpanded => write!(f, "env-expanded"),
            KeySource::Convention(var) => write!(f, "convention ({})", var),
            KeySource::None => write!(f, "none"),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Environment variable '{var}' not set for '{setting}': {message}")]
    EnvVar {
        var: String,
        setting: String,
        message: String,
    },
}

/// Raw upstream section. `api_key` may still contain `${VAR}` references.
#[derive(Debug, Default, Deserialize)]
pub struct RawUpstreamConfig {
    base_url: Option<String>,
    api_key: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    connect_timeout_secs: Option<u64>,
}

/// Raw configuration deserialized directly from TOML.
#[derive(Debug, Default, Deserialize)]
pub struct RawConfig {
    #[serde(default)]
    server: ServerConfig,
    #[serde(default)]
    upstream: RawUpstreamConfig,
    #[serde(default)]
    relay: RelayConfig,
    #[serde(default)]
    endpoints: EndpointsConfig,
}

/// Expand all `${VAR}` references in a string using a custom lookup function.
///
/// Supports multiple `${VAR}` in one string (e.g., `${SCHEME}://${HOST}/v1`).
/// Fails on first missing variable, unclosed `${`, or empty variable name.
fn expand_env_vars_with<F>(input: &str, setting: &str, lookup: F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if !input.contains("${") {
        return Ok(input.to_string());
    }

    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        let end = after.find('}').ok_or_else(|| ConfigError::EnvVar {
            var: "<unclosed>".to_string(),
            setting: setting.to_string(),
            message: format!("Unclosed '${{' in config value: {}", input),
        })?;

        let var_name = &after[..end];
        if var_name.is_empty() {
            return Err(ConfigError::EnvVar {
                var: "".to_string(),
                setting: setting.to_string(),
                message: "Empty variable name in '${}' reference".to_string(),
            });
        }

        let value = lookup(var_name).ok_or_else(|| ConfigError::EnvVar {
            var: var_name.to_string(),
            setting: setting.to_string(),
            message: format!(
                "Environment variable '{}' is not set (referenced in '{}')",
                var_name, setting
            ),
        })?;

        result.push_str(&value);
        rest = &after[end + 1..];
    }

    result.push_str(rest);
    Ok(result)
}

fn env_lookup(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

impl Config {
    /// Load configuration from a TOML file, resolving environment fallbacks.
    pub fn from_file(path: impl AsRef<Path>) -> Result<(Self, KeySource), ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;

        Self::parse_str(&content)
    }

    /// Build configuration purely from the environment and defaults.
    pub fn from_env() -> Result<(Self, KeySource), ConfigError> {
        Self::from_raw_with(RawConfig::default(), env_lookup)
    }

    /// Load from `path` when given, otherwise from the environment alone.
    pub fn load(path: Option<&Path>) -> Result<(Self, KeySource), ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => Self::from_env(),
        }
    }

    /// Parse configuration from a TOML string, resolving environment fallbacks.
    pub fn parse_str(content: &str) -> Result<(Self, KeySource), ConfigError> {
        Self::parse_str_with(content, env_lookup)
    }

    /// Parse configuration from a TOML string with a custom variable lookup.
    pub fn parse_str_with<F>(content: &str, lookup: F) -> Result<(Self, KeySource), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw: RawConfig = toml::from_str(content).map_err(ConfigError::Parse)?;
        Self::from_raw_with(raw, lookup)
    }

    /// Convert raw (deserialized) config to final config.
    ///
    /// - `api_key` containing `${VAR}` is expanded, source = `EnvExpanded`
    /// - a literal `api_key` is wrapped directly, source = `Literal`
    /// - an absent `api_key` falls back to `LLM_API_KEY`, source =
    ///   `Convention` or `KeySource::None`
    /// - `base_url` and `model` fall back to `LLM_API_BASE_URL` and
    ///   `LLM_MODEL_NAME`
    pub fn from_raw_with<F>(raw: RawConfig, lookup: F) -> Result<(Self, KeySource), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let (api_key, source) = match raw.upstream.api_key {
            Some(ref raw_key) if raw_key.contains("${") => {
                let expanded = expand_env_vars_with(raw_key, "upstream.api_key", &lookup)?;
                (Some(ApiKey::from(expanded)), KeySource::EnvExpanded)
            }
            Some(ref raw_key) if !raw_key.is_empty() => {
                (Some(ApiKey::from(raw_key.as_str())), KeySource::Literal)
            }
            _ => match lookup(API_KEY_ENV) {
                Some(value) => (
                    Some(ApiKey::from(value)),
                    KeySource::Convention(API_KEY_ENV.to_string()),
                ),
                None => (None, KeySource::None),
            },
        };

        let base_url = match raw.upstream.base_url {
            Some(url) => expand_env_vars_with(&url, "upstream.base_url", &lookup)?,
            None => lookup(BASE_URL_ENV).unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        };

        let model = raw.upstream.model.or_else(|| lookup(MODEL_ENV));

        let config = Config {
            server: raw.server,
            upstream: UpstreamConfig {
                base_url,
                api_key,
                model,
                timeout: Duration::from_secs(raw.upstream.timeout_secs.unwrap_or(60)),
                connect_timeout: Duration::from_secs(
                    raw.upstream.connect_timeout_secs.unwrap_or(10),
                ),
            },
            relay: raw.relay,
            endpoints: raw.endpoints,
        };
        config.validate()?;

        Ok((config, source))
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        let base_url = &self.upstream.base_url;
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ConfigError::Validation(format!(
                "upstream.base_url must be an http(s) URL, got '{}'",
                base_url
            )));
        }

        if self.server.max_concurrency == 0 {
            return Err(ConfigError::Validation(
                "server.max_concurrency must be at least 1".to_string(),
            ));
        }

        if self.server.max_concurrency > tokio::sync::Semaphore::MAX_PERMITS {
            return Err(ConfigError::Validation(format!(
                "server.max_concurrency must be at most {}",
                tokio::sync::Semaphore::MAX_PERMITS
            )));
        }

        if self.upstream.timeout.is_zero() {
            return Err(ConfigError::Validation(
                "upstream.timeout_secs must be at least 1".to_string(),
            ));
        }

        for feature in Feature::ALL {
            let endpoint = self.endpoints.get(feature);
            if endpoint.max_tokens == Some(0) {
                return Err(ConfigError::Validation(format!(
                    "endpoints.{}.max_tokens must be positive",
                    feature
                )));
            }
            if let Some(t) = endpoint.temperature {
                if !(0.0..=2.0).contains(&t) {
                    return Err(ConfigError::Validation(format!(
                        "endpoints.{}.temperature must be within 0.0..=2.0, got {}",
                        feature, t
                    )));
                }
            }
        }

        if self.upstream.api_key.is_none() {
            tracing::warn!(
                "No LLM API key configured - feature endpoints will answer 500 until {} is set",
                API_KEY_ENV
            );
        }

        Ok(())
    }

    /// Resolve the upstream parameters for a feature.
    ///
    /// Model precedence: endpoint override, then `upstream.model`, then the
    /// feature default.
    pub fn settings(&self, feature: Feature) -> FeatureSettings {
        let endpoint = self.endpoints.get(feature);
        FeatureSettings {
            system_prompt: endpoint
                .system_prompt
                .clone()
                .unwrap_or_else(|| feature.default_system_prompt().to_string()),
            model: endpoint
                .model
                .clone()
                .or_else(|| self.upstream.model.clone())
                .unwrap_or_else(|| feature.default_model().to_string()),
            stream: feature.streams(),
            max_tokens: endpoint.max_tokens.unwrap_or(feature.default_max_tokens()),
            temperature: endpoint
                .temperature
                .unwrap_or(feature.default_temperature()),
        }
    }

    /// Full chat-completion URL of the provider.
    pub fn completions_url(&self) -> String {
        format!(
            "{}/chat/completions",
            self.upstream.base_url.trim_end_matches('/')
        )
    }
}

impl EndpointsConfig {
    /// Overrides for one feature.
    pub fn get(&self, feature: Feature) -> &EndpointConfig {
        match feature {
            Feature::Chat => &self.chat,
            Feature::Plan => &self.plan,
            Feature::Quiz => &self.quiz,
        }
    }
}
