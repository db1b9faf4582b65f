//! Query client configuration.
//!
//! Endpoint, credentials, target layer, proxy, timeouts, pool bounds, and
//! retry policy. Secrets (API token, proxy password) are never embedded;
//! they come from the caller. Environment and file loading live in the
//! pipeline configuration.

use std::time::Duration;

use url::Url;

use crate::retry::RetryPolicy;

/// Default query endpoint of the map service.
pub const DEFAULT_API_URL: &str = "https://yncx.mnr.gov.cn/dist-app-yn/map/queryResults.json";

/// Default target layer (dataset@datasource).
pub const DEFAULT_LAYER_NAME: &str = "pro31@yndk";

/// Attribute filter that matches every record.
pub const DEFAULT_ATTRIBUTE_FILTER: &str = "1=1";

/// Attribute fields requested alongside the geometry.
pub const DEFAULT_FIELDS: &[&str] = &["yjjbntmj", "yjjbnttbbh"];

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36 Edg/126.0.0.0";

/// Authenticated forward-proxy tunnel.
#[derive(Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    /// `host:port` of the tunnel.
    pub host: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl std::fmt::Debug for ProxyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyConfig")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl ProxyConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            username: None,
            password: None,
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Build the `reqwest` proxy routing every scheme through the tunnel.
    pub fn to_proxy(&self) -> Result<reqwest::Proxy, ConfigError> {
        let host = self.host.trim();
        if host.is_empty() {
            return Err(ConfigError::InvalidProxy("proxy host is empty".into()));
        }
        let url = if host.contains("://") {
            host.to_string()
        } else {
            format!("http://{host}")
        };
        let proxy = reqwest::Proxy::all(&url)
            .map_err(|e| ConfigError::InvalidProxy(format!("{host}: {e}")))?;
        Ok(match (&self.username, &self.password) {
            (Some(user), Some(pass)) => proxy.basic_auth(user, pass),
            (Some(user), None) => proxy.basic_auth(user, ""),
            _ => proxy,
        })
    }
}

/// Configuration for [`QueryClient`](crate::QueryClient).
///
/// Custom `Debug` implementation redacts the `api_token` field.
#[derive(Clone)]
pub struct ClientConfig {
    pub api_url: Url,
    pub api_token: String,
    pub layer_name: String,
    pub attribute_filter: String,
    pub fields: Vec<String>,
    pub user_agent: String,
    pub proxy: Option<ProxyConfig>,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    /// Upper bound on concurrent in-flight requests.
    pub max_connections: usize,
    /// Idle connections kept alive per host.
    pub max_idle_connections: usize,
    pub retry: RetryPolicy,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("api_url", &self.api_url.as_str())
            .field("api_token", &"[REDACTED]")
            .field("layer_name", &self.layer_name)
            .field("attribute_filter", &self.attribute_filter)
            .field("fields", &self.fields)
            .field("proxy", &self.proxy)
            .field("connect_timeout", &self.connect_timeout)
            .field("request_timeout", &self.request_timeout)
            .field("max_connections", &self.max_connections)
            .field("max_idle_connections", &self.max_idle_connections)
            .field("retry", &self.retry)
            .finish()
    }
}

impl ClientConfig {
    /// Configuration with the service defaults for everything but the
    /// endpoint, token, and layer.
    pub fn new(api_url: Url, api_token: impl Into<String>, layer_name: impl Into<String>) -> Self {
        Self {
            api_url,
            api_token: api_token.into(),
            layer_name: layer_name.into(),
            attribute_filter: DEFAULT_ATTRIBUTE_FILTER.to_string(),
            fields: DEFAULT_FIELDS.iter().map(|f| f.to_string()).collect(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            proxy: None,
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
            max_connections: 10,
            max_idle_connections: 5,
            retry: RetryPolicy::default(),
        }
    }

    /// Configuration pointing at a local mock server (for testing), with a
    /// millisecond-scale retry schedule.
    pub fn local_mock(base_uri: &str, token: &str) -> Result<Self, ConfigError> {
        let raw = format!("{}/map/queryResults.json", base_uri.trim_end_matches('/'));
        let api_url = Url::parse(&raw).map_err(|e| ConfigError::InvalidUrl(raw, e.to_string()))?;
        let mut config = Self::new(api_url, token, DEFAULT_LAYER_NAME);
        config.retry = RetryPolicy::new(3, Duration::from_millis(10), Duration::from_millis(50));
        Ok(config)
    }

    /// Check the invariants the client relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_token.trim().is_empty() {
            return Err(ConfigError::MissingToken);
        }
        if self.layer_name.trim().is_empty() {
            return Err(ConfigError::MissingLayer);
        }
        if self.max_connections == 0 {
            return Err(ConfigError::InvalidPool("max_connections must be at least 1".into()));
        }
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("API token is required")]
    MissingToken,
    #[error("layer name must not be empty")]
    MissingLayer,
    #[error("invalid URL for {0}: {1}")]
    InvalidUrl(String, String),
    #[error("invalid proxy: {0}")]
    InvalidProxy(String),
    #[error("invalid connection pool bounds: {0}")]
    InvalidPool(String),
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(String),
}
