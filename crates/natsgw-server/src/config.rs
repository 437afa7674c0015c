//! Gateway configuration: TOML file + CLI overrides.

use natsgw_core::{FilterPattern, GatewayError, GwResult};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::settings::{Settings, UpgradeConfig, DEFAULT_ROUTE, DEFAULT_WS_BUFFER_SIZE};
use crate::tls;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub upstream: UpstreamSection,
    #[serde(default)]
    pub listen: ListenSection,
    #[serde(default)]
    pub filter: FilterSection,
}

/// `[upstream]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamSection {
    #[serde(default = "default_upstream_addr")]
    pub addr: String,
    #[serde(default)]
    pub tls: bool,
    /// PEM bundle of trusted roots; without one, certificates are not verified.
    #[serde(default)]
    pub tls_ca: Option<String>,
}

impl Default for UpstreamSection {
    fn default() -> Self {
        Self {
            addr: default_upstream_addr(),
            tls: false,
            tls_ca: None,
        }
    }
}

/// `[listen]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ListenSection {
    #[serde(default = "default_listen_addr")]
    pub addr: String,
    #[serde(default = "default_route")]
    pub route: String,
    #[serde(default = "default_true")]
    pub origin_check: bool,
    #[serde(default = "default_buffer_size")]
    pub read_buffer_size: usize,
    #[serde(default = "default_buffer_size")]
    pub write_buffer_size: usize,
}

impl Default for ListenSection {
    fn default() -> Self {
        Self {
            addr: default_listen_addr(),
            route: default_route(),
            origin_check: true,
            read_buffer_size: default_buffer_size(),
            write_buffer_size: default_buffer_size(),
        }
    }
}

/// `[filter]` section of the config TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FilterSection {
    /// Subject pattern; empty disables filtering.
    #[serde(default)]
    pub subject: String,
    /// Log every relayed frame.
    #[serde(default)]
    pub trace: bool,
}

fn default_upstream_addr() -> String {
    "localhost:4222".to_string()
}
fn default_listen_addr() -> String {
    "0.0.0.0:8910".to_string()
}
fn default_route() -> String {
    DEFAULT_ROUTE.to_string()
}
fn default_buffer_size() -> usize {
    DEFAULT_WS_BUFFER_SIZE
}
fn default_true() -> bool {
    true
}

/// Values given on the command line; `Some`/`true` wins over the file.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub upstream_addr: Option<String>,
    pub listen_addr: Option<String>,
    pub route: Option<String>,
    pub no_origin_check: bool,
    pub trace: bool,
    pub filter: Option<String>,
    pub tls: bool,
    pub tls_ca: Option<String>,
}

/// Resolved configuration (paths expanded, CLI overrides applied).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    pub upstream_addr: String,
    pub enable_tls: bool,
    pub tls_ca: Option<PathBuf>,
    pub listen_addr: String,
    pub route: String,
    pub origin_check: bool,
    pub read_buffer_size: usize,
    pub write_buffer_size: usize,
    pub filter: String,
    pub trace: bool,
}

impl GatewayConfig {
    /// Load config from TOML file, then apply CLI overrides.
    ///
    /// A missing file is not an error; defaults are used instead.
    pub fn load(config_path: Option<&Path>, cli: &CliOverrides) -> GwResult<Self> {
        let file_config = match config_path {
            Some(path) => {
                let expanded = expand_tilde(path);
                if expanded.exists() {
                    info!(path = %expanded.display(), "loading config file");
                    let content = std::fs::read_to_string(&expanded)?;
                    toml::from_str::<ConfigFile>(&content)
                        .map_err(|e| GatewayError::Config(format!("config parse error: {e}")))?
                } else {
                    info!(path = %expanded.display(), "config file not found, using defaults");
                    ConfigFile::default()
                }
            }
            None => ConfigFile::default(),
        };

        let tls_ca = cli.tls_ca.clone().or(file_config.upstream.tls_ca);

        Ok(Self {
            upstream_addr: cli
                .upstream_addr
                .clone()
                .unwrap_or(file_config.upstream.addr),
            enable_tls: cli.tls || file_config.upstream.tls,
            tls_ca: tls_ca.as_deref().map(expand_tilde_str),
            listen_addr: cli.listen_addr.clone().unwrap_or(file_config.listen.addr),
            route: cli.route.clone().unwrap_or(file_config.listen.route),
            origin_check: !cli.no_origin_check && file_config.listen.origin_check,
            read_buffer_size: file_config.listen.read_buffer_size,
            write_buffer_size: file_config.listen.write_buffer_size,
            filter: cli.filter.clone().unwrap_or(file_config.filter.subject),
            trace: cli.trace || file_config.filter.trace,
        })
    }

    /// Validate and turn the configuration into immutable [`Settings`].
    pub fn into_settings(self) -> GwResult<Settings> {
        let listen_addr: SocketAddr = self
            .listen_addr
            .parse()
            .map_err(|e| GatewayError::Config(format!("invalid listen address {}: {e}", self.listen_addr)))?;
        if !self.route.starts_with('/') {
            return Err(GatewayError::Config(format!(
                "route must start with '/': {}",
                self.route
            )));
        }
        if self.upstream_addr.trim().is_empty() {
            return Err(GatewayError::Config("upstream address is empty".into()));
        }
        let filter: FilterPattern = self.filter.parse()?;
        let tls_config = match &self.tls_ca {
            Some(path) => Some(tls::client_config_from_ca(path)?),
            None => None,
        };

        Ok(Settings {
            enable_tls: self.enable_tls,
            tls_config,
            trace: self.trace,
            filter,
            upgrade: UpgradeConfig {
                listen_addr,
                route: self.route,
                origin_check: self.origin_check,
                read_buffer_size: self.read_buffer_size,
                write_buffer_size: self.write_buffer_size,
            },
            ..Settings::new(self.upstream_addr)
        })
    }
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    expand_tilde_str(&s)
}

fn expand_tilde_str(s: &str) -> PathBuf {
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(s)
}
