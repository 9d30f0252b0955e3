// ABOUTME: Host key verification settings in the tunnel config file.
// ABOUTME: Maps the YAML policy name onto a HostKeyPolicy.

use crate::error::{Error, Result};
use crate::tunnel::{HostKeyPolicy, expand_path};
use serde::Deserialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HostKeyMode {
    #[default]
    Strict,
    TrustFirstUse,
    Fingerprint,
    AcceptAny,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct HostKeysConfig {
    #[serde(default)]
    pub policy: HostKeyMode,
    /// known_hosts file; `~/` and `$VAR` are expanded.
    #[serde(default)]
    pub known_hosts: Option<String>,
    #[serde(default)]
    pub fingerprints: Vec<String>,
}

impl HostKeysConfig {
    pub fn to_policy(&self) -> Result<HostKeyPolicy> {
        let known_hosts = self.known_hosts.as_deref().map(expand_path);
        match self.policy {
            HostKeyMode::Strict => Ok(HostKeyPolicy::Strict { known_hosts }),
            HostKeyMode::TrustFirstUse => Ok(HostKeyPolicy::TrustOnFirstUse { known_hosts }),
            HostKeyMode::Fingerprint => {
                if self.fingerprints.is_empty() {
                    return Err(Error::InvalidConfig(
                        "host_keys.policy fingerprint requires at least one fingerprint"
                            .to_string(),
                    ));
                }
                Ok(HostKeyPolicy::Fingerprint(self.fingerprints.clone()))
            }
            HostKeyMode::AcceptAny => Ok(HostKeyPolicy::AcceptAny),
        }
    }
}
