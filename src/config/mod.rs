// ABOUTME: Configuration types and parsing for hoptunnel.yml.
// ABOUTME: Handles YAML parsing, validation, discovery and conversion to a TunnelSpec.

mod hop;
mod host_keys;

pub use hop::HopConfig;
pub use host_keys::{HostKeyMode, HostKeysConfig};

use crate::error::{Error, Result};
use crate::tunnel::{
    BastionSpec, DEFAULT_ACCEPT_POLL_INTERVAL, DEFAULT_CONNECT_TIMEOUT, DEFAULT_MAX_CONNECTIONS,
    HopSpec, TargetAddr, TunnelSpec,
};
use hop::HopEntry;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

pub const CONFIG_FILENAME: &str = "hoptunnel.yml";
pub const CONFIG_FILENAME_ALT: &str = "hoptunnel.yaml";
pub const CONFIG_FILENAME_DIR: &str = ".hoptunnel/config.yml";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// The hop from which the target is reachable.
    #[serde(deserialize_with = "deserialize_hop")]
    pub ssh: HopConfig,

    pub target: TargetConfig,

    /// Hosts the primary hop is reached through, outermost first.
    #[serde(default, deserialize_with = "deserialize_hops")]
    pub bastions: Vec<HopConfig>,

    #[serde(default)]
    pub host_keys: HostKeysConfig,

    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,

    #[serde(default = "default_accept_poll_interval", with = "humantime_serde")]
    pub accept_poll_interval: Duration,

    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TargetConfig {
    pub host: String,
    pub port: u16,
}

fn default_connect_timeout() -> Duration {
    DEFAULT_CONNECT_TIMEOUT
}

fn default_accept_poll_interval() -> Duration {
    DEFAULT_ACCEPT_POLL_INTERVAL
}

fn default_max_connections() -> usize {
    DEFAULT_MAX_CONNECTIONS
}

impl Config {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn discover(dir: &Path) -> Result<Self> {
        let candidates = [
            dir.join(CONFIG_FILENAME),
            dir.join(CONFIG_FILENAME_ALT),
            dir.join(CONFIG_FILENAME_DIR),
        ];

        for path in &candidates {
            if path.exists() {
                return Self::load(path);
            }
        }

        Err(Error::ConfigNotFound(dir.to_path_buf()))
    }

    fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(Error::InvalidConfig(msg.to_string()));

        if self.ssh.host.trim().is_empty() {
            return invalid("ssh.host cannot be empty");
        }
        if self.ssh.port == 0 {
            return invalid("ssh.port cannot be 0");
        }
        if self.ssh.user.as_deref().is_none_or(|u| u.trim().is_empty()) {
            return invalid("ssh.user is required");
        }
        if self
            .ssh
            .key_path
            .as_deref()
            .is_none_or(|k| k.trim().is_empty())
        {
            return invalid("ssh.key_path is required");
        }
        if self.target.host.trim().is_empty() {
            return invalid("target.host cannot be empty");
        }
        if self.target.port == 0 {
            return invalid("target.port cannot be 0");
        }
        for bastion in &self.bastions {
            if bastion.host.trim().is_empty() {
                return invalid("bastion host cannot be empty");
            }
        }
        if self.max_connections == 0 {
            return invalid("max_connections must be at least 1");
        }
        if self.accept_poll_interval.is_zero() {
            return invalid("accept_poll_interval must be greater than 0");
        }
        self.host_keys.to_policy()?;
        Ok(())
    }

    /// Build the tunnel description this config describes.
    pub fn to_spec(&self) -> Result<TunnelSpec> {
        let primary = HopSpec::new(
            &self.ssh.host,
            self.ssh.port,
            self.ssh.user.clone().unwrap_or_default(),
            self.ssh.key_path.clone().unwrap_or_default(),
        );
        let target = TargetAddr::new(&self.target.host, self.target.port);

        let spec = self.bastions.iter().fold(
            TunnelSpec::new(primary, target),
            |spec, b| {
                spec.bastion(
                    BastionSpec::new(&b.host)
                        .port(b.port)
                        .user(b.user.clone().unwrap_or_default())
                        .key_path(b.key_path.clone().unwrap_or_default()),
                )
            },
        );

        Ok(spec
            .host_keys(self.host_keys.to_policy()?)
            .connect_timeout(self.connect_timeout)
            .accept_poll_interval(self.accept_poll_interval)
            .max_connections(self.max_connections))
    }
}

pub fn init_config(dir: &Path, force: bool) -> Result<()> {
    let config_path = dir.join(CONFIG_FILENAME);

    if config_path.exists() && !force {
        return Err(Error::AlreadyExists(config_path));
    }

    std::fs::write(&config_path, TEMPLATE)?;
    Ok(())
}

const TEMPLATE: &str = r#"ssh:
  host: db-gateway.example.com
  port: 22
  user: backup
  key_path: ~/.ssh/id_ed25519
target:
  host: 10.0.0.5
  port: 3306
# bastions:
#   - jump@bastion.example.com:22
host_keys:
  policy: strict
connect_timeout: 30s
"#;

// Custom deserializers

fn deserialize_hop<'de, D>(deserializer: D) -> std::result::Result<HopConfig, D::Error>
where
    D: serde::Deserializer<'de>,
{
    HopEntry::deserialize(deserializer)?
        .into_hop_config()
        .map_err(serde::de::Error::custom)
}

fn deserialize_hops<'de, D>(deserializer: D) -> std::result::Result<Vec<HopConfig>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let values: Vec<HopEntry> = Vec::deserialize(deserializer)?;
    values
        .into_iter()
        .map(HopEntry::into_hop_config)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(serde::de::Error::custom)
}
