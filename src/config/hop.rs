// ABOUTME: Hop entries in the tunnel config file.
// ABOUTME: Parses shorthand like "host", "user@host", "host:port", "user@host:port".

use crate::tunnel::DEFAULT_SSH_PORT;
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HopConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub key_path: Option<String>,
}

fn default_port() -> u16 {
    DEFAULT_SSH_PORT
}

impl HopConfig {
    pub fn parse(s: &str) -> Result<Self, String> {
        let s = s.trim();
        if s.is_empty() {
            return Err("hop address cannot be empty".to_string());
        }

        // Parse format: [user@]host[:port]
        let (user_part, rest) = match s.split_once('@') {
            Some((user, rest)) => (Some(user), rest),
            None => (None, s),
        };

        let (host, port) = match rest.rsplit_once(':') {
            Some((host, port_str)) => {
                let port = port_str
                    .parse::<u16>()
                    .map_err(|_| format!("invalid port: {}", port_str))?;
                (host, port)
            }
            None => (rest, DEFAULT_SSH_PORT),
        };

        if host.is_empty() {
            return Err("hostname cannot be empty".to_string());
        }
        if user_part.is_some_and(str::is_empty) {
            return Err("user cannot be empty".to_string());
        }

        Ok(HopConfig {
            host: host.to_string(),
            port,
            user: user_part.map(str::to_string),
            key_path: None,
        })
    }
}

/// A hop written either as a shorthand string or as a mapping.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum HopEntry {
    Simple(String),
    Detailed(HopConfig),
}

impl HopEntry {
    pub(crate) fn into_hop_config(self) -> Result<HopConfig, String> {
        match self {
            HopEntry::Simple(s) => HopConfig::parse(&s),
            HopEntry::Detailed(c) => Ok(c),
        }
    }
}
