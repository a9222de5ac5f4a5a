use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::checkers::ServiceKind;
use crate::error::ConfigError;
use crate::ports::{default_ports, default_web_ports};

const MIN_PING_INTERVAL_MS: u64 = 50;

/// When the UDP service checkers run within a reachable cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ServiceCheckPolicy {
    /// Alongside the port scan on every reachable cycle.
    #[default]
    Always,
    /// Only after the port scan found an open web port.
    WhenWebPortOpen,
}

/// On-disk configuration (`config.toml`). Missing keys take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub targets: Vec<String>,
    pub ping_interval_ms: u64,
    pub ping_timeout_ms: u64,
    pub port_check_timeout_ms: u64,
    pub default_ports: Vec<u16>,
    pub web_ports: Vec<u16>,
    /// UDP ports of the services to check: 161 SNMP, 427 SLP, 3702 WS-Discovery, 5353 mDNS.
    pub udp_services_to_check: Vec<u16>,
    pub service_check_timeout_ms: u64,
    pub service_overall_timeout_ms: u64,
    pub service_cache_ttl_secs: u64,
    pub service_check_policy: ServiceCheckPolicy,
    pub scan_ports_when_offline: bool,
    pub max_concurrent_targets: usize,
    pub snmp_community: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            targets: Vec::new(),
            ping_interval_ms: 3_000,
            ping_timeout_ms: 1_000,
            port_check_timeout_ms: 1_000,
            default_ports: default_ports(),
            web_ports: default_web_ports(),
            udp_services_to_check: Vec::new(),
            service_check_timeout_ms: 1_500,
            service_overall_timeout_ms: 3_000,
            service_cache_ttl_secs: 60,
            service_check_policy: ServiceCheckPolicy::Always,
            scan_ports_when_offline: false,
            max_concurrent_targets: 64,
            snmp_community: "public".into(),
        }
    }
}

/// Validated runtime snapshot of the probe-related settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeSettings {
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
    pub connect_timeout: Duration,
    pub checker_timeout: Duration,
    pub services_timeout: Duration,
    pub service_cache_ttl: Duration,
    pub default_ports: Vec<u16>,
    pub web_ports: Vec<u16>,
    pub services: Vec<ServiceKind>,
    pub service_policy: ServiceCheckPolicy,
    pub scan_when_offline: bool,
    pub max_concurrent_targets: usize,
    pub snmp_community: String,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(3),
            ping_timeout: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(1),
            checker_timeout: Duration::from_millis(1_500),
            services_timeout: Duration::from_secs(3),
            service_cache_ttl: Duration::from_secs(60),
            default_ports: default_ports(),
            web_ports: default_web_ports(),
            services: Vec::new(),
            service_policy: ServiceCheckPolicy::Always,
            scan_when_offline: false,
            max_concurrent_targets: 64,
            snmp_community: "public".into(),
        }
    }
}

impl Config {
    /// Load the config at `path` (or the default location), writing a default
    /// file first if none exists.
    pub fn load_or_create(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(p) => normalize_toml_path(p),
            None => default_config_path()?,
        };

        if path.exists() {
            let raw = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                path: path.clone(),
                source,
            })?;
            toml::from_str(&raw).map_err(|source| ConfigError::Parse { path, source })
        } else {
            info!(path = %path.display(), "config not found, writing defaults");
            let config = Self::default();
            config.save(&path)?;
            Ok(config)
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let body = toml::to_string_pretty(self)?;
        let contents = format!(
            "# netpulse configuration\n# Edit these settings; they apply on next start.\n\n{body}"
        );
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: path.to_path_buf(),
                source,
            })?;
        }
        fs::write(path, contents).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn probe_settings(&self) -> Result<ProbeSettings, ConfigError> {
        if self.ping_interval_ms < MIN_PING_INTERVAL_MS {
            return Err(ConfigError::IntervalTooShort(self.ping_interval_ms));
        }
        let positive = |value: u64, field: &'static str| {
            if value == 0 {
                Err(ConfigError::Zero { field })
            } else {
                Ok(Duration::from_millis(value))
            }
        };
        if self.max_concurrent_targets == 0 {
            return Err(ConfigError::Zero {
                field: "max_concurrent_targets",
            });
        }

        let mut services = Vec::new();
        for &port in &self.udp_services_to_check {
            let kind = ServiceKind::from_port(port).ok_or(ConfigError::UnknownService(port))?;
            if !services.contains(&kind) {
                services.push(kind);
            }
        }

        Ok(ProbeSettings {
            ping_interval: Duration::from_millis(self.ping_interval_ms),
            ping_timeout: positive(self.ping_timeout_ms, "ping_timeout_ms")?,
            connect_timeout: positive(self.port_check_timeout_ms, "port_check_timeout_ms")?,
            checker_timeout: positive(self.service_check_timeout_ms, "service_check_timeout_ms")?,
            services_timeout: positive(
                self.service_overall_timeout_ms,
                "service_overall_timeout_ms",
            )?,
            service_cache_ttl: Duration::from_secs(self.service_cache_ttl_secs),
            default_ports: self.default_ports.clone(),
            web_ports: self.web_ports.clone(),
            services,
            service_policy: self.service_check_policy,
            scan_when_offline: self.scan_ports_when_offline,
            max_concurrent_targets: self.max_concurrent_targets,
            snmp_community: self.snmp_community.clone(),
        })
    }
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &Path) -> PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// `config.toml` in the platform config directory for netpulse
/// (`~/.config/netpulse` on Linux).
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    let dirs = ProjectDirs::from("", "", "netpulse").ok_or(ConfigError::PathUnavailable)?;
    Ok(dirs.config_dir().join("config.toml"))
}
