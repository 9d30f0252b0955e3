// ABOUTME: Immutable description of a tunnel: hops, target address and tuning knobs.
// ABOUTME: Resolves bastion defaults into an ordered hop chain.

use super::session::HostKeyPolicy;
use std::time::Duration;

pub const DEFAULT_SSH_PORT: u16 = 22;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_ACCEPT_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Shortest accept poll interval; anything lower makes the accept loop spin.
pub const MIN_ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(10);
pub const DEFAULT_MAX_CONNECTIONS: usize = 64;

/// Credentials and address of one SSH hop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HopSpec {
    pub host: String,
    pub port: u16,
    pub user: String,
    /// Path to the private key; `~/` and `$VAR` are expanded at load time.
    pub key_path: String,
}

impl HopSpec {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        key_path: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            user: user.into(),
            key_path: key_path.into(),
        }
    }
}

/// A host the primary hop is reached through. Empty `user` / `key_path`
/// fall back to the primary hop's values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BastionSpec {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub key_path: String,
}

impl BastionSpec {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_SSH_PORT,
            user: String::new(),
            key_path: String::new(),
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    pub fn key_path(mut self, key_path: impl Into<String>) -> Self {
        self.key_path = key_path.into();
        self
    }

    fn resolve(&self, primary: &HopSpec) -> HopSpec {
        let or_primary = |value: &str, fallback: &str| {
            if value.is_empty() {
                fallback.to_string()
            } else {
                value.to_string()
            }
        };
        HopSpec {
            host: self.host.clone(),
            port: if self.port == 0 {
                DEFAULT_SSH_PORT
            } else {
                self.port
            },
            user: or_primary(&self.user, &primary.user),
            key_path: or_primary(&self.key_path, &primary.key_path),
        }
    }
}

/// The service reachable only from the primary hop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetAddr {
    pub host: String,
    pub port: u16,
}

impl TargetAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TunnelSpec {
    pub primary: HopSpec,
    pub target: TargetAddr,
    /// Outermost first.
    pub bastions: Vec<BastionSpec>,
    pub host_keys: HostKeyPolicy,
    pub connect_timeout: Duration,
    pub accept_poll_interval: Duration,
    pub max_connections: usize,
}

impl TunnelSpec {
    pub fn new(primary: HopSpec, target: TargetAddr) -> Self {
        Self {
            primary,
            target,
            bastions: Vec::new(),
            host_keys: HostKeyPolicy::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            accept_poll_interval: DEFAULT_ACCEPT_POLL_INTERVAL,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }

    /// Append a bastion. The first one added is dialed first.
    pub fn bastion(mut self, bastion: BastionSpec) -> Self {
        self.bastions.push(bastion);
        self
    }

    pub fn host_keys(mut self, policy: HostKeyPolicy) -> Self {
        self.host_keys = policy;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn accept_poll_interval(mut self, interval: Duration) -> Self {
        self.accept_poll_interval = interval.max(MIN_ACCEPT_POLL_INTERVAL);
        self
    }

    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max.max(1);
        self
    }

    /// Ordered hop chain: bastions outermost first, primary hop last.
    pub fn hops(&self) -> Vec<HopSpec> {
        self.bastions
            .iter()
            .map(|b| b.resolve(&self.primary))
            .chain(std::iter::once(self.primary.clone()))
            .collect()
    }
}
