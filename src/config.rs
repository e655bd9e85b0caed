//! Collector configuration: built-in defaults, then a YAML file, then
//! `HOST_INVENTORY_*` environment variables (`__` separates nested keys,
//! e.g. `HOST_INVENTORY_WINDOWS__PASSWORD`).

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::clients::winrm::AuthScheme;
use crate::domain::types::PlatformType;

const ENV_PREFIX: &str = "HOST_INVENTORY_";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Hosts processed concurrently.
    pub workers: usize,
    pub precheck_timeout_secs: u64,
    pub ssh: SshConfig,
    pub nas: Option<NasConfig>,
    pub windows: Option<WindowsConfig>,
    pub stores: StoreConfig,
    pub vendor_api: VendorApiConfig,
    pub output: OutputConfig,
    /// Candidate hosts with optional platform hints; the CLI may override.
    pub hosts: Vec<HostTarget>,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            precheck_timeout_secs: 2,
            ssh: SshConfig::default(),
            nas: None,
            windows: None,
            stores: StoreConfig::default(),
            vendor_api: VendorApiConfig::default(),
            output: OutputConfig::default(),
            hosts: Vec::new(),
            log_level: "info".into(),
            log_format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    pub user: String,
    pub key_path: Option<PathBuf>,
    pub port: u16,
    /// Handshake timeout (`ConnectTimeout`).
    pub timeout_secs: u64,
    /// Upper bound for any single remote command.
    pub command_timeout_secs: u64,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: std::env::var("USER").unwrap_or_else(|_| "root".into()),
            key_path: default_key_path(),
            port: 22,
            timeout_secs: 5,
            command_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NasConfig {
    pub user: String,
    pub password: String,
    pub port: u16,
    pub timeout_secs: u64,
    pub command_timeout_secs: u64,
}

impl Default for NasConfig {
    fn default() -> Self {
        Self {
            user: "admin".into(),
            password: String::new(),
            port: 22,
            timeout_secs: 5,
            command_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowsConfig {
    /// `DOMAIN\user`, `user@domain` or a local account.
    pub username: String,
    pub password: String,
    pub port: u16,
    pub https_port: u16,
    pub use_https: bool,
    /// Self-signed listener certificates are the norm in a lab.
    pub verify_tls: bool,
    /// HTTP and WS-Man operation timeout.
    pub timeout_secs: u64,
    pub command_timeout_secs: u64,
    pub auth_schemes: Vec<AuthScheme>,
}

impl Default for WindowsConfig {
    fn default() -> Self {
        Self {
            username: String::new(),
            password: String::new(),
            port: 5985,
            https_port: 5986,
            use_https: false,
            verify_tls: false,
            timeout_secs: 10,
            command_timeout_secs: 60,
            auth_schemes: vec![AuthScheme::Ntlm, AuthScheme::Basic],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub services_path: PathBuf,
    pub mac_vendors_path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            services_path: PathBuf::from("services.json"),
            mac_vendors_path: PathBuf::from("mac-ouis.json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VendorApiConfig {
    pub enabled: bool,
    pub url: String,
    /// Minimum spacing between API calls.
    pub delay_ms: u64,
    pub timeout_secs: u64,
}

impl Default for VendorApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "https://api.macvendors.com".into(),
            delay_ms: 500,
            timeout_secs: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub inventory_path: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            inventory_path: PathBuf::from("documentation/inventory.json"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostTarget {
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<PlatformType>,
}

impl HostTarget {
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
            platform: None,
        }
    }

    /// `address` or `address=platform`.
    pub fn parse(entry: &str) -> Result<Self> {
        let entry = entry.trim();
        match entry.split_once('=') {
            Some((address, platform)) => Ok(Self {
                address: address.trim().to_string(),
                platform: Some(platform.parse()?),
            }),
            None => Ok(Self::new(entry)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

impl CollectorConfig {
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().context("could not determine config directory")?;
        Ok(config_dir.join("host-inventory").join("config.yaml"))
    }

    /// Check the values no default can rescue.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            bail!("workers must be at least 1");
        }
        if self.precheck_timeout_secs == 0 {
            bail!("precheck_timeout_secs must be at least 1");
        }
        if let Some(windows) = &self.windows {
            if windows.auth_schemes.is_empty() {
                bail!("windows.auth_schemes must list at least one scheme");
            }
        }
        Ok(())
    }
}

/// Load from `path` (or the default location). A missing file is not an
/// error; the defaults and environment still apply.
pub fn load(path: Option<&Path>) -> Result<CollectorConfig> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => CollectorConfig::default_path()?,
    };

    let mut figment = Figment::new().merge(Serialized::defaults(CollectorConfig::default()));
    if path.exists() {
        figment = figment.merge(Yaml::file(&path));
    }
    figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

    let mut config: CollectorConfig = figment
        .extract()
        .with_context(|| format!("loading configuration ({})", path.display()))?;

    config.ssh.key_path = config.ssh.key_path.map(|p| expand_home(&p));
    config.validate()?;
    Ok(config)
}

fn default_key_path() -> Option<PathBuf> {
    let ssh_dir = dirs::home_dir()?.join(".ssh");
    ["id_ed25519", "id_rsa"]
        .iter()
        .map(|name| ssh_dir.join(name))
        .find(|p| p.exists())
}

fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}
