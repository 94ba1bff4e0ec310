// src/config/models.rs
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

use crate::proxy::DEFAULT_FAILURE_THRESHOLD;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    pub backends: Vec<BackendConfig>,
    #[serde(default)]
    pub algorithm: Algorithm,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default)]
    pub health_check: HealthCheckConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub url: Url,
}

/// Selection algorithms understood by the config file and the admin surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Algorithm {
    #[default]
    #[serde(rename = "round-robin")]
    RoundRobin,
    #[serde(rename = "least-connection")]
    LeastConnection,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::RoundRobin => "round-robin",
            Algorithm::LeastConnection => "least-connection",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "round-robin" => Ok(Algorithm::RoundRobin),
            "least-connection" => Ok(Algorithm::LeastConnection),
            other => Err(ConfigError::UnknownAlgorithm(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_probe_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_health_path")]
    pub path: String,
}

impl HealthCheckConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            timeout_secs: default_probe_timeout_secs(),
            path: default_health_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl ProxyConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    #[serde(default = "default_admin_prefix")]
    pub prefix: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            prefix: default_admin_prefix(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
            path: default_metrics_path(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("at least one backend must be configured")]
    NoBackends,

    #[error("backend {0} must use http or https")]
    UnsupportedScheme(Url),

    #[error("backend {0} has no host")]
    MissingHost(Url),

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("{name} must start with '/': {value}")]
    RelativePath { name: &'static str, value: String },

    #[error("unknown algorithm: {0}")]
    UnknownAlgorithm(String),
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backends.is_empty() {
            return Err(ConfigError::NoBackends);
        }

        for backend in &self.backends {
            match backend.url.scheme() {
                "http" | "https" => {}
                _ => return Err(ConfigError::UnsupportedScheme(backend.url.clone())),
            }
            if backend.url.host_str().is_none() {
                return Err(ConfigError::MissingHost(backend.url.clone()));
            }
        }

        if self.failure_threshold == 0 {
            return Err(ConfigError::Zero("failure_threshold"));
        }
        if self.health_check.interval_secs == 0 {
            return Err(ConfigError::Zero("health_check.interval_secs"));
        }
        if self.health_check.timeout_secs == 0 {
            return Err(ConfigError::Zero("health_check.timeout_secs"));
        }
        if self.proxy.request_timeout_secs == 0 {
            return Err(ConfigError::Zero("proxy.request_timeout_secs"));
        }

        for (name, value) in [
            ("health_check.path", &self.health_check.path),
            ("admin.prefix", &self.admin.prefix),
            ("metrics.path", &self.metrics.path),
        ] {
            if !value.starts_with('/') {
                return Err(ConfigError::RelativePath {
                    name,
                    value: value.clone(),
                });
            }
        }

        Ok(())
    }
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8000))
}

fn default_failure_threshold() -> u32 {
    DEFAULT_FAILURE_THRESHOLD
}

fn default_interval_secs() -> u64 {
    10
}

fn default_probe_timeout_secs() -> u64 {
    5
}

fn default_health_path() -> String {
    "/health".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_admin_prefix() -> String {
    "/admin".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
backends:
  - url: "http://localhost:8001"
  - url: "http://localhost:8002/api"
"#;

    #[test]
    fn test_defaults_applied() {
        let config: Config = serde_yaml::from_str(MINIMAL).unwrap();
        config.validate().unwrap();

        assert_eq!(config.listen, "0.0.0.0:8000".parse().unwrap());
        assert_eq!(config.algorithm, Algorithm::RoundRobin);
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.health_check.interval(), Duration::from_secs(10));
        assert_eq!(config.health_check.timeout(), Duration::from_secs(5));
        assert_eq!(config.health_check.path, "/health");
        assert_eq!(config.admin.prefix, "/admin");
        assert!(!config.metrics.enabled);
        assert_eq!(config.backends[1].url.path(), "/api");
    }

    #[test]
    fn test_algorithm_names() {
        assert_eq!("round-robin".parse::<Algorithm>().unwrap(), Algorithm::RoundRobin);
        assert_eq!(
            "least-connection".parse::<Algorithm>().unwrap(),
            Algorithm::LeastConnection
        );
        assert!("random".parse::<Algorithm>().is_err());
        assert_eq!(Algorithm::LeastConnection.to_string(), "least-connection");

        let config: Config = serde_yaml::from_str(&format!(
            "{}algorithm: least-connection\n",
            MINIMAL
        ))
        .unwrap();
        assert_eq!(config.algorithm, Algorithm::LeastConnection);
    }

    #[test]
    fn test_validation_rejects_bad_configs() {
        let empty: Config = serde_json::from_str(r#"{"backends": []}"#).unwrap();
        assert!(matches!(empty.validate(), Err(ConfigError::NoBackends)));

        let ftp: Config =
            serde_json::from_str(r#"{"backends": [{"url": "ftp://files.local"}]}"#).unwrap();
        assert!(matches!(ftp.validate(), Err(ConfigError::UnsupportedScheme(_))));

        let mut zero: Config = serde_yaml::from_str(MINIMAL).unwrap();
        zero.failure_threshold = 0;
        assert!(matches!(zero.validate(), Err(ConfigError::Zero(_))));

        let mut relative: Config = serde_yaml::from_str(MINIMAL).unwrap();
        relative.admin.prefix = "admin".into();
        assert!(matches!(
            relative.validate(),
            Err(ConfigError::RelativePath { .. })
        ));
    }

    #[test]
    fn test_root_admin_prefix_is_valid() {
        let mut root: Config = serde_yaml::from_str(MINIMAL).unwrap();
        root.admin.prefix = "/".into();
        assert!(root.validate().is_ok());
    }
}
