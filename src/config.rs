// Client configuration.
// Loaded from an optional TOML file, then overridden by MEDIACMS_* environment variables.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ClientError, Result};

/// Top-level configuration for [`crate::ApiClient`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL every request path is appended to.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub cache: CacheConfig,
}

/// Auth header, CSRF and refresh settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_access_header")]
    pub access_header: String,

    /// Scheme placed before the token, e.g. `Token` or `Bearer`.
    #[serde(default = "default_access_prefix")]
    pub access_prefix: String,

    #[serde(default = "default_refresh_endpoint")]
    pub refresh_endpoint: String,

    /// Send cookies and attach the CSRF header read from the cookie jar.
    #[serde(default)]
    pub use_csrf: bool,

    #[serde(default = "default_csrf_cookie")]
    pub csrf_cookie: String,

    #[serde(default = "default_csrf_header")]
    pub csrf_header: String,

    /// Phrases that mark a 401/403 message as an account block.
    #[serde(default = "default_blocked_phrases")]
    pub blocked_phrases: Vec<String>,
}

/// Transient failure retry policy. Backoff is linear: `delay_ms * attempt`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub delay_ms: u64,
}

/// Response cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_cache_ttl_ms")]
    pub ttl_ms: u64,

    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,

    /// Drop cached GET responses under a path after a successful write to it.
    #[serde(default = "default_true")]
    pub invalidate_on_write: bool,
}

fn default_base_url() -> String {
    "http://localhost:8000/api".to_string()
}

fn default_timeout_ms() -> u64 {
    15_000
}

fn default_access_header() -> String {
    "Authorization".to_string()
}

fn default_access_prefix() -> String {
    "Token".to_string()
}

fn default_refresh_endpoint() -> String {
    "/v1/refresh-token".to_string()
}

fn default_csrf_cookie() -> String {
    "csrftoken".to_string()
}

fn default_csrf_header() -> String {
    "X-CSRFToken".to_string()
}

fn default_blocked_phrases() -> Vec<String> {
    ["封禁", "deactivated", "账号已被禁用", "已被封禁"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1_000
}

fn default_cache_ttl_ms() -> u64 {
    5 * 60 * 1000
}

fn default_cache_max_entries() -> usize {
    100
}

fn default_true() -> bool {
    true
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            access_header: default_access_header(),
            access_prefix: default_access_prefix(),
            refresh_endpoint: default_refresh_endpoint(),
            use_csrf: false,
            csrf_cookie: default_csrf_cookie(),
            csrf_header: default_csrf_header(),
            blocked_phrases: default_blocked_phrases(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            delay_ms: default_retry_delay_ms(),
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub fn new(max_retries: u32, delay_ms: u64) -> Self {
        Self {
            max_retries,
            delay_ms,
        }
    }

    #[must_use]
    pub fn disabled() -> Self {
        Self::new(0, 0)
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.delay_ms.saturating_mul(u64::from(attempt)))
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_ms: default_cache_ttl_ms(),
            max_entries: default_cache_max_entries(),
            invalidate_on_write: true,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_ms: default_timeout_ms(),
            auth: AuthConfig::default(),
            retry: RetryConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Create a config with the given base URL and defaults elsewhere.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    #[must_use]
    pub fn with_access_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.auth.access_prefix = prefix.into();
        self
    }

    #[must_use]
    pub fn with_csrf(mut self, cookie: impl Into<String>, header: impl Into<String>) -> Self {
        self.auth.use_csrf = true;
        self.auth.csrf_cookie = cookie.into();
        self.auth.csrf_header = header.into();
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Build the full URL for an API path.
    pub fn url(&self, path: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else if path.starts_with('/') {
            format!("{}{}", base, path)
        } else {
            format!("{}/{}", base, path)
        }
    }

    /// Load from a TOML file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) if path.exists() => {
                let content = std::fs::read_to_string(path)?;
                toml::from_str(&content).map_err(|e| ClientError::Config(e.to_string()))?
            }
            _ => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `MEDIACMS_*` overrides using the given variable lookup.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("MEDIACMS_API_BASE") {
            self.base_url = v;
        }
        if let Some(v) = lookup("MEDIACMS_TIMEOUT_MS") {
            self.timeout_ms = parse_env("MEDIACMS_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("MEDIACMS_USE_CSRF") {
            self.auth.use_csrf = v == "true";
        }
        if let Some(v) = lookup("MEDIACMS_CSRF_COOKIE") {
            self.auth.csrf_cookie = v;
        }
        if let Some(v) = lookup("MEDIACMS_CSRF_HEADER") {
            self.auth.csrf_header = v;
        }
        if let Some(v) = lookup("MEDIACMS_REFRESH_ENDPOINT") {
            self.auth.refresh_endpoint = v;
        }
        if let Some(v) = lookup("MEDIACMS_ACCESS_HEADER") {
            self.auth.access_header = v;
        }
        if let Some(v) = lookup("MEDIACMS_ACCESS_PREFIX") {
            self.auth.access_prefix = v;
        }
        if let Some(v) = lookup("MEDIACMS_MAX_RETRIES") {
            self.retry.max_retries = parse_env("MEDIACMS_MAX_RETRIES", &v)?;
        }
        Ok(())
    }

    /// Semantic checks serde cannot express.
    pub fn validate(&self) -> Result<()> {
        let url = url::Url::parse(&self.base_url)
            .map_err(|e| ClientError::Config(format!("base_url {}: {}", self.base_url, e)))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ClientError::Config(format!(
                "unsupported scheme: {}",
                url.scheme()
            )));
        }
        if self.timeout_ms == 0 {
            return Err(ClientError::Config("timeout_ms must be positive".into()));
        }
        if self.cache.max_entries == 0 {
            return Err(ClientError::Config("cache.max_entries must be positive".into()));
        }
        if self.auth.access_header.trim().is_empty() {
            return Err(ClientError::Config("auth.access_header is empty".into()));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| ClientError::Config(format!("{} has invalid value {:?}", key, value)))
}
