//! Pipeline configuration.
//!
//! Values come from an optional YAML file overlaid by `PARCEL_*`
//! environment variables. Recognized keys (file key / variable):
//!
//! | key | variable | default |
//! |-----|----------|---------|
//! | `api_url` | `PARCEL_API_URL` | service endpoint |
//! | `api_token` | `PARCEL_API_TOKEN` | required |
//! | `private_key` | `PARCEL_PRIVATE_KEY` | required |
//! | `layer_name` | `PARCEL_LAYER_NAME` | `pro31@yndk` |
//! | `attribute_filter` | `PARCEL_ATTRIBUTE_FILTER` | `1=1` |
//! | `proxy_host` | `PARCEL_PROXY_HOST` | none |
//! | `proxy_user` | `PARCEL_PROXY_USER` | none |
//! | `proxy_pass` | `PARCEL_PROXY_PASS` | none |
//! | `geojson_output` | `PARCEL_GEOJSON_OUTPUT` | `output.geojson` |
//! | `shapefile_output` | `PARCEL_SHAPEFILE_OUTPUT` | none |
//! | `expected_count` | `PARCEL_EXPECTED_COUNT` | 1000 |
//! | `max_consecutive_failures` | `PARCEL_MAX_CONSECUTIVE_FAILURES` | 3 |
//! | `chunk_size` | `PARCEL_CHUNK_SIZE` | 100 |
//! | `workers` | `PARCEL_WORKERS` | available parallelism |

use std::path::{Path, PathBuf};
use std::str::FromStr;

use parcel_client::{ClientConfig, ProxyConfig, QueryClient, QueryError};
use parcel_core::DEFAULT_EXPECTED_COUNT;
use parcel_crypto::{PayloadDecryptor, PayloadError};
use parcel_store::{ParcelStore, DEFAULT_CHUNK_SIZE};
use serde::Deserialize;
use url::Url;
use zeroize::Zeroizing;

use crate::error::ConfigError;
use crate::orchestrator::DEFAULT_MAX_CONSECUTIVE_FAILURES;

/// Default store path.
pub const DEFAULT_GEOJSON_OUTPUT: &str = "output.geojson";

/// Raw, unvalidated settings as they appear in a YAML file.
#[derive(Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub api_url: Option<String>,
    pub api_token: Option<String>,
    pub private_key: Option<String>,
    pub layer_name: Option<String>,
    pub attribute_filter: Option<String>,
    pub proxy_host: Option<String>,
    pub proxy_user: Option<String>,
    pub proxy_pass: Option<String>,
    pub geojson_output: Option<PathBuf>,
    pub shapefile_output: Option<PathBuf>,
    pub expected_count: Option<u32>,
    pub max_consecutive_failures: Option<u32>,
    pub chunk_size: Option<usize>,
    pub workers: Option<usize>,
}

impl std::fmt::Debug for FileConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "[REDACTED]");
        f.debug_struct("FileConfig")
            .field("api_url", &self.api_url)
            .field("api_token", &redact(&self.api_token))
            .field("private_key", &redact(&self.private_key))
            .field("layer_name", &self.layer_name)
            .field("proxy_host", &self.proxy_host)
            .field("proxy_user", &self.proxy_user)
            .field("proxy_pass", &redact(&self.proxy_pass))
            .field("geojson_output", &self.geojson_output)
            .field("shapefile_output", &self.shapefile_output)
            .finish_non_exhaustive()
    }
}

impl FileConfig {
    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&text).map_err(|source| ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Overlay values found through `lookup` (normally the process
    /// environment) on top of this file configuration.
    pub fn overlay<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        set(&mut self.api_url, get("PARCEL_API_URL"));
        set(&mut self.api_token, get("PARCEL_API_TOKEN"));
        set(&mut self.private_key, get("PARCEL_PRIVATE_KEY"));
        set(&mut self.layer_name, get("PARCEL_LAYER_NAME"));
        set(&mut self.attribute_filter, get("PARCEL_ATTRIBUTE_FILTER"));
        set(&mut self.proxy_host, get("PARCEL_PROXY_HOST"));
        set(&mut self.proxy_user, get("PARCEL_PROXY_USER"));
        set(&mut self.proxy_pass, get("PARCEL_PROXY_PASS"));
        set(&mut self.geojson_output, get("PARCEL_GEOJSON_OUTPUT"));
        set(&mut self.shapefile_output, get("PARCEL_SHAPEFILE_OUTPUT"));

        const COUNT: &str = "PARCEL_EXPECTED_COUNT";
        const FAILURES: &str = "PARCEL_MAX_CONSECUTIVE_FAILURES";
        const CHUNK: &str = "PARCEL_CHUNK_SIZE";
        const WORKERS: &str = "PARCEL_WORKERS";
        if let Some(v) = get(COUNT) {
            self.expected_count = Some(parse_var(COUNT, &v)?);
        }
        if let Some(v) = get(FAILURES) {
            self.max_consecutive_failures = Some(parse_var(FAILURES, &v)?);
        }
        if let Some(v) = get(CHUNK) {
            self.chunk_size = Some(parse_var(CHUNK, &v)?);
        }
        if let Some(v) = get(WORKERS) {
            self.workers = Some(parse_var(WORKERS, &v)?);
        }
        Ok(self)
    }
}

fn set<T: From<String>>(slot: &mut Option<T>, value: Option<String>) {
    if let Some(value) = value {
        *slot = Some(value.into());
    }
}

fn parse_var<T: FromStr>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key: var,
        reason: e.to_string(),
    })
}

/// Validated configuration for one pipeline run.
///
/// Custom `Debug` implementation redacts the private key; the key is
/// zeroized when the configuration is dropped.
#[derive(Clone)]
pub struct PipelineConfig {
    pub client: ClientConfig,
    pub private_key: Zeroizing<String>,
    pub geojson_output: PathBuf,
    pub shapefile_output: Option<PathBuf>,
    pub expected_count: u32,
    pub max_consecutive_failures: u32,
    pub chunk_size: usize,
    pub workers: Option<usize>,
}

impl std::fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("client", &self.client)
            .field("private_key", &"[REDACTED]")
            .field("geojson_output", &self.geojson_output)
            .field("shapefile_output", &self.shapefile_output)
            .field("expected_count", &self.expected_count)
            .field("max_consecutive_failures", &self.max_consecutive_failures)
            .field("chunk_size", &self.chunk_size)
            .field("workers", &self.workers)
            .finish()
    }
}

impl PipelineConfig {
    /// Configuration from `PARCEL_*` environment variables alone.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_file_config(FileConfig::default().overlay(env_lookup)?)
    }

    /// Configuration from a YAML file, with environment variables taking
    /// precedence over file values.
    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        Self::from_file_config(FileConfig::from_yaml_file(path)?.overlay(env_lookup)?)
    }

    /// `from_yaml_file` when a path is given, `from_env` otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_yaml_file(path),
            None => Self::from_env(),
        }
    }

    pub fn from_file_config(raw: FileConfig) -> Result<Self, ConfigError> {
        let api_token = raw
            .api_token
            .filter(|t| !t.trim().is_empty())
            .ok_or(ConfigError::Missing("api_token"))?;
        let private_key = Zeroizing::new(
            raw.private_key
                .filter(|k| !k.trim().is_empty())
                .ok_or(ConfigError::Missing("private_key"))?,
        );

        let api_url = raw
            .api_url
            .as_deref()
            .unwrap_or(parcel_client::config::DEFAULT_API_URL);
        let api_url = Url::parse(api_url).map_err(|e| ConfigError::Invalid {
            key: "api_url",
            reason: e.to_string(),
        })?;
        let layer_name = raw
            .layer_name
            .unwrap_or_else(|| parcel_client::config::DEFAULT_LAYER_NAME.to_string());

        let mut client = ClientConfig::new(api_url, api_token, layer_name);
        if let Some(filter) = raw.attribute_filter {
            client.attribute_filter = filter;
        }
        if let Some(host) = raw.proxy_host {
            client.proxy = Some(ProxyConfig {
                host,
                username: raw.proxy_user,
                password: raw.proxy_pass,
            });
        }
        client.validate()?;

        let expected_count = raw.expected_count.unwrap_or(DEFAULT_EXPECTED_COUNT);
        if expected_count == 0 {
            return Err(ConfigError::Invalid {
                key: "expected_count",
                reason: "must be at least 1".into(),
            });
        }

        Ok(Self {
            client,
            private_key,
            geojson_output: raw
                .geojson_output
                .unwrap_or_else(|| PathBuf::from(DEFAULT_GEOJSON_OUTPUT)),
            shapefile_output: raw.shapefile_output,
            expected_count,
            max_consecutive_failures: raw
                .max_consecutive_failures
                .unwrap_or(DEFAULT_MAX_CONSECUTIVE_FAILURES)
                .max(1),
            chunk_size: raw.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE).max(1),
            workers: raw.workers.filter(|w| *w > 0),
        })
    }

    pub fn decryptor(&self) -> Result<PayloadDecryptor, PayloadError> {
        PayloadDecryptor::from_hex_key(&self.private_key)
    }

    pub fn query_client(&self) -> Result<QueryClient, QueryError> {
        QueryClient::new(self.client.clone())
    }

    pub fn store(&self) -> ParcelStore {
        let store = ParcelStore::open(&self.geojson_output).with_chunk_size(self.chunk_size);
        match self.workers {
            Some(workers) => store.with_workers(workers),
            None => store,
        }
    }
}

fn env_lookup(var: &str) -> Option<String> {
    std::env::var(var).ok()
}
