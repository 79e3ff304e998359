use serde::Deserialize;
use std::fmt;
use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;

mod error;
pub mod watcher;

pub use error::Error;

pub const MODE_ENV: &str = "MODE";
pub const TARGET_UPSTREAM_ENV: &str = "TARGET_UPSTREAM";

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Configuration {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub global: GlobalConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub metrics: Option<MetricsConfig>,
    #[serde(default)]
    pub observability: Option<ObservabilityConfig>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "ServerConfig::default_bind_address")]
    pub bind_address: IpAddr,
    #[serde(default = "ServerConfig::default_port")]
    pub port: u16,
    #[serde(default = "ServerConfig::default_query_timeout")]
    pub query_timeout: u64,
    #[serde(default = "ServerConfig::default_query_timeout_grace_period")]
    pub query_timeout_grace_period: u64,
}

impl ServerConfig {
    fn default_bind_address() -> IpAddr {
        IpAddr::from(Ipv4Addr::UNSPECIFIED)
    }

    fn default_port() -> u16 {
        8000
    }

    fn default_query_timeout() -> u64 {
        3600
    }

    fn default_query_timeout_grace_period() -> u64 {
        60
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: Self::default_bind_address(),
            port: Self::default_port(),
            query_timeout: Self::default_query_timeout(),
            query_timeout_grace_period: Self::default_query_timeout_grace_period(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct GlobalConfig {
    #[serde(default = "GlobalConfig::default_worker_threads")]
    pub worker_threads: usize,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        GlobalConfig {
            worker_threads: GlobalConfig::default_worker_threads(),
        }
    }
}

impl GlobalConfig {
    fn default_worker_threads() -> usize {
        4
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Production,
    Debug,
}

impl Mode {
    /// Anything other than `debug` selects production.
    pub fn from_env_value(value: &str) -> Self {
        if value == "debug" {
            Mode::Debug
        } else {
            Mode::Production
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Mode::Production => write!(f, "production"),
            Mode::Debug => write!(f, "debug"),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct ProxyConfig {
    #[serde(default)]
    pub mode: Mode,
    #[serde(default)]
    pub target_upstream: Option<String>,
    #[serde(default = "ProxyConfig::default_max_redirect")]
    pub max_redirect: u8,
    /// Forwarded bodies up to this many bytes are buffered and replayed across redirects;
    /// larger or unsized bodies are streamed.
    #[serde(default = "ProxyConfig::default_max_buffered_body")]
    pub max_buffered_body: u64,
    pub server_ca_bundle: Option<String>,
}

impl ProxyConfig {
    fn default_max_redirect() -> u8 {
        20
    }

    fn default_max_buffered_body() -> u64 {
        1024 * 1024
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            target_upstream: None,
            max_redirect: Self::default_max_redirect(),
            max_buffered_body: Self::default_max_buffered_body(),
            server_ca_bundle: None,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "MetricsConfig::default_bind_address")]
    pub bind_address: IpAddr,
    #[serde(default = "MetricsConfig::default_port")]
    pub port: u16,
}

impl MetricsConfig {
    fn default_bind_address() -> IpAddr {
        IpAddr::from(Ipv4Addr::LOCALHOST)
    }

    fn default_port() -> u16 {
        9090
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub tracing: Option<TracingConfig>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TracingConfig {
    pub endpoint: String,
    pub sampling_rate: f64,
}

impl Configuration {
    /// Loads `path` when given, built-in defaults otherwise, then applies `MODE` and
    /// `TARGET_UPSTREAM` from the process environment.
    pub fn load<P: AsRef<Path>>(path: Option<P>) -> Result<Self, Error> {
        let mut config = match path {
            Some(path) => Self::load_from_str(&fs::read_to_string(path)?)?,
            None => Configuration::default(),
        };

        config.apply_env_overrides(
            std::env::var(MODE_ENV).ok().as_deref(),
            std::env::var(TARGET_UPSTREAM_ENV).ok().as_deref(),
        );
        Ok(config)
    }

    pub fn load_from_str(slice: &str) -> Result<Self, Error> {
        let config: Configuration = toml::from_str(slice)?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self, mode: Option<&str>, target_upstream: Option<&str>) {
        if let Some(mode) = mode {
            self.proxy.mode = Mode::from_env_value(mode);
        }
        if let Some(target_upstream) = target_upstream {
            self.proxy.target_upstream = Some(target_upstream.to_string());
        }
        if self
            .proxy
            .target_upstream
            .as_ref()
            .is_some_and(String::is_empty)
        {
            self.proxy.target_upstream = None;
        }
    }
}
