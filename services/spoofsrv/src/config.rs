//! Proxy configuration
//!
//! Built once at startup and shared read-only (`Arc<ProxyConfig>`) with every
//! component. Sources, lowest priority first: compiled-in defaults, the YAML
//! file, `SPOOFSRV_*` environment variables, then command-line overrides.

use std::path::Path;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use errors::{MitmError, MitmResult};

use crate::policy::SpoofPolicy;

/// Default listen port (unprivileged stand-in for 502)
pub const DEFAULT_PORT: u16 = 1502;
pub const DEFAULT_LISTEN: &str = "0.0.0.0:1502";
pub const DEFAULT_UPSTREAM: &str = "127.0.0.1:502";
pub const DEFAULT_CONFIG_PATH: &str = "config/spoofsrv.yaml";
pub const ENV_PREFIX: &str = "SPOOFSRV_";

fn default_connect_timeout_ms() -> u64 {
    3000
}

fn default_read_timeout_ms() -> u64 {
    1000
}

fn default_accept_timeout_ms() -> u64 {
    1000
}

/// Proxy configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Address the proxy listens on (`host:port`)
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Target device address (`host:port`)
    #[serde(default = "default_upstream")]
    pub upstream: String,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Bound on each socket read; also the cancellation polling interval
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_accept_timeout_ms")]
    pub accept_timeout_ms: u64,
    #[serde(default)]
    pub spoof: SpoofPolicy,
}

fn default_listen() -> String {
    DEFAULT_LISTEN.to_string()
}

fn default_upstream() -> String {
    DEFAULT_UPSTREAM.to_string()
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            upstream: default_upstream(),
            connect_timeout_ms: default_connect_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            accept_timeout_ms: default_accept_timeout_ms(),
            spoof: SpoofPolicy::default(),
        }
    }
}

impl ProxyConfig {
    /// Config with explicit endpoints and default everything else
    pub fn new(listen: impl Into<String>, upstream: impl Into<String>) -> Self {
        Self {
            listen: listen.into(),
            upstream: upstream.into(),
            ..Self::default()
        }
    }

    /// Load from defaults, YAML file and environment, then validate.
    ///
    /// An explicit `path` must exist; without one, `config/spoofsrv.yaml` is
    /// used when present.
    pub fn load(path: Option<&Path>) -> MitmResult<Self> {
        let mut figment = Figment::from(Serialized::defaults(ProxyConfig::default()));

        match path {
            Some(path) => {
                if !path.exists() {
                    return Err(MitmError::Configuration(format!(
                        "Config file not found: {}",
                        path.display()
                    )));
                }
                info!("Loading configuration from {}", path.display());
                figment = figment.merge(Yaml::file(path));
            },
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                info!("Loading configuration from {}", DEFAULT_CONFIG_PATH);
                figment = figment.merge(Yaml::file(DEFAULT_CONFIG_PATH));
            },
            None => debug!("No config file, using defaults and environment"),
        }

        let config: ProxyConfig = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a YAML document on top of the defaults (no environment)
    pub fn from_yaml_str(yaml: &str) -> MitmResult<Self> {
        let config: ProxyConfig = Figment::from(Serialized::defaults(ProxyConfig::default()))
            .merge(Yaml::string(yaml))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply command-line endpoint overrides
    pub fn with_overrides(mut self, listen: Option<String>, upstream: Option<String>) -> Self {
        if let Some(listen) = listen {
            self.listen = listen;
        }
        if let Some(upstream) = upstream {
            self.upstream = upstream;
        }
        self
    }

    pub fn validate(&self) -> MitmResult<()> {
        validate_endpoint("listen", &self.listen)?;
        validate_endpoint("upstream", &self.upstream)?;

        for (field, value) in [
            ("connect_timeout_ms", self.connect_timeout_ms),
            ("read_timeout_ms", self.read_timeout_ms),
            ("accept_timeout_ms", self.accept_timeout_ms),
        ] {
            if value == 0 {
                return Err(MitmError::invalid_config(field, "must be greater than 0"));
            }
        }

        self.spoof.validate()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn accept_timeout(&self) -> Duration {
        Duration::from_millis(self.accept_timeout_ms)
    }
}

/// `host:port` with a non-empty host and a numeric port
fn validate_endpoint(field: &str, value: &str) -> MitmResult<()> {
    let (host, port) = value
        .rsplit_once(':')
        .ok_or_else(|| MitmError::invalid_config(field, format!("'{}' is not host:port", value)))?;
    if host.is_empty() {
        return Err(MitmError::invalid_config(field, "host must not be empty"));
    }
    port.parse::<u16>().map_err(|_| {
        MitmError::invalid_config(field, format!("'{}' is not a valid port", port))
    })?;
    Ok(())
}
