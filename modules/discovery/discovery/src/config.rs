//! Application configuration with layered loading: defaults → YAML → env.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

use discovery_sdk::registry::{Credentials, DEFAULT_SCAN_INTERVAL, Registry, WebhookConfig};

use crate::retry::BackoffPolicy;
use crate::runner::RateLimit;

/// Custom serde module for humantime-formatted durations ("500ms", "24h").
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s)
            .map_err(|e| serde::de::Error::custom(format!("invalid duration {s:?}: {e}")))
    }
}

/// Top-level application configuration.
///
/// Unknown keys are ignored so configuration files can carry sections for
/// other tools.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub registries: Vec<RegistryConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address of the webhook HTTP server.
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Budget for draining in-flight HTTP connections on shutdown.
    #[serde(default = "default_shutdown_timeout", with = "duration_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_owned()
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(10)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default level for console output; `RUST_LOG` overrides.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_owned()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Namespace catalog records are written to and filtered against.
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
        }
    }
}

fn default_namespace() -> String {
    "default".to_owned()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Capacity of every inter-stage channel.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Optional per-stage rate limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitConfig>,
    /// Optional backoff policy for retryable lookups in the handler stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff: Option<BackoffConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            rate_limit: None,
            backoff: None,
        }
    }
}

fn default_channel_capacity() -> usize {
    100
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Minimum interval between two processed events.
    #[serde(with = "duration_serde")]
    pub interval: Duration,
    #[serde(default = "default_burst")]
    pub burst: u32,
}

fn default_burst() -> u32 {
    1
}

impl From<&RateLimitConfig> for RateLimit {
    fn from(cfg: &RateLimitConfig) -> Self {
        Self {
            interval: cfg.interval,
            burst: cfg.burst,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    #[serde(default = "default_backoff_initial", with = "duration_serde")]
    pub initial_interval: Duration,
    #[serde(default = "default_backoff_max", with = "duration_serde")]
    pub max_interval: Duration,
    #[serde(default = "default_backoff_elapsed", with = "duration_serde")]
    pub max_elapsed_time: Duration,
}

fn default_backoff_initial() -> Duration {
    Duration::from_secs(1)
}

fn default_backoff_max() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_elapsed() -> Duration {
    Duration::from_secs(5 * 60)
}

impl From<&BackoffConfig> for BackoffPolicy {
    fn from(cfg: &BackoffConfig) -> Self {
        Self {
            initial_interval: cfg.initial_interval,
            max_interval: cfg.max_interval,
            max_elapsed_time: cfg.max_elapsed_time,
        }
    }
}

/// One registry entry of the `registries:` list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub name: String,
    pub hostname: String,
    #[serde(default, rename = "plainHTTP")]
    pub plain_http: bool,
    #[serde(
        default = "default_scan_interval",
        rename = "scanInterval",
        with = "duration_serde"
    )]
    pub scan_interval: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<CredentialsConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook: Option<WebhookEntry>,
}

fn default_scan_interval() -> Duration {
    DEFAULT_SCAN_INTERVAL
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialsConfig {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEntry {
    pub path: String,
    pub flavor: String,
}

impl RegistryConfig {
    /// Validate the entry and build the immutable registry record,
    /// trimming a scheme prefix off the hostname.
    ///
    /// # Errors
    /// Returns an error naming the registry when required fields are empty.
    pub fn into_registry(self) -> Result<Registry> {
        ensure!(!self.name.is_empty(), "registry entry has an empty name");
        let hostname = trim_scheme(&self.hostname).to_owned();
        ensure!(
            !hostname.is_empty(),
            "registry {:?} has an empty hostname",
            self.name
        );
        Ok(Registry {
            name: self.name,
            hostname,
            plain_http: self.plain_http,
            credentials: self.credentials.map(|c| Credentials {
                username: c.username,
                password: c.password,
            }),
            webhook: self.webhook.map(|w| WebhookConfig {
                path: w.path,
                flavor: w.flavor,
            }),
            scan_interval: self.scan_interval,
        })
    }
}

impl From<&Registry> for RegistryConfig {
    fn from(registry: &Registry) -> Self {
        Self {
            name: registry.name.clone(),
            hostname: registry.hostname.clone(),
            plain_http: registry.plain_http,
            scan_interval: registry.scan_interval,
            credentials: registry.credentials.as_ref().map(|c| CredentialsConfig {
                username: c.username.clone(),
                password: c.password.clone(),
            }),
            webhook: registry.webhook.as_ref().map(|w| WebhookEntry {
                path: w.path.clone(),
                flavor: w.flavor.clone(),
            }),
        }
    }
}

fn trim_scheme(hostname: &str) -> &str {
    hostname
        .trim_start_matches("https://")
        .trim_start_matches("http://")
}

impl AppConfig {
    /// Load configuration with layered sources: defaults → YAML file →
    /// environment variables (`ARSENAL__SERVER__LISTEN=...`).
    ///
    /// # Errors
    /// Returns an error when the file cannot be read or a value fails to
    /// deserialize.
    pub fn load_layered(config_path: &Path) -> Result<Self> {
        use figment::{
            Figment,
            providers::{Env, Format, Serialized, Yaml},
        };

        let figment = Figment::new()
            .merge(Serialized::defaults(AppConfig::default()))
            .merge(Yaml::file(config_path))
            .merge(Env::prefixed("ARSENAL__").split("__"));

        figment
            .extract()
            .with_context(|| format!("failed to load config from {}", config_path.display()))
    }

    /// Load from a file when given, otherwise return defaults.
    ///
    /// # Errors
    /// Returns an error when the path does not point at a file or loading
    /// fails.
    pub fn load_or_default(config_path: Option<&PathBuf>) -> Result<Self> {
        match config_path {
            Some(path) => {
                ensure!(
                    path.is_file(),
                    "config file does not exist: {}",
                    path.display()
                );
                Self::load_layered(path)
            }
            None => Ok(Self::default()),
        }
    }

    /// Serialize the effective configuration to YAML.
    ///
    /// # Errors
    /// Returns an error when serialization fails.
    pub fn to_yaml(&self) -> Result<String> {
        serde_saphyr::to_string(self).context("failed to serialize config to YAML")
    }

    /// Apply command-line overrides (`-v` → debug, `-vv` → trace).
    pub fn apply_cli_overrides(&mut self, verbose: u8) {
        match verbose {
            0 => {}
            1 => self.logging.level = "debug".to_owned(),
            _ => self.logging.level = "trace".to_owned(),
        }
    }
}
