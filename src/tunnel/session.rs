// ABOUTME: One authenticated SSH session to a hop, using russh.
// ABOUTME: Handles dialing (TCP or over a relayed stream), host key policy and key auth.

use super::credentials::KeyMaterial;
use super::error::SessionError;
use super::relay::RelayRequest;
use russh::client::{self, Config, Handle, Msg};
use russh::keys::known_hosts::{
    check_known_hosts, check_known_hosts_path, learn_known_hosts, learn_known_hosts_path,
};
use russh::keys::{PrivateKeyWithHashAlg, ssh_key};
use russh::{Channel, Disconnect};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};

type Result<T> = std::result::Result<T, SessionError>;

/// How remote host keys are verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostKeyPolicy {
    /// Accept only keys already present in known_hosts
    /// (`~/.ssh/known_hosts` when no path is given).
    Strict { known_hosts: Option<PathBuf> },
    /// Accept and record unknown hosts. Changed keys are still rejected.
    TrustOnFirstUse { known_hosts: Option<PathBuf> },
    /// Accept only keys whose SHA256 fingerprint (`SHA256:...`) is listed.
    Fingerprint(Vec<String>),
    /// Accept any key. Insecure.
    AcceptAny,
}

impl Default for HostKeyPolicy {
    fn default() -> Self {
        HostKeyPolicy::Strict { known_hosts: None }
    }
}

/// Everything needed to open and authenticate one session.
#[derive(Clone)]
pub struct SessionConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub key: KeyMaterial,
    pub host_keys: HostKeyPolicy,
    pub connect_timeout: Duration,
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("key", &"<private key>")
            .field("host_keys", &self.host_keys)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

/// russh client handler applying a [`HostKeyPolicy`].
pub(crate) struct TunnelHandler {
    host: String,
    port: u16,
    policy: HostKeyPolicy,
}

impl TunnelHandler {
    fn new(host: String, port: u16, policy: HostKeyPolicy) -> Self {
        Self { host, port, policy }
    }

    fn check_known_hosts(
        &self,
        key: &ssh_key::PublicKey,
        path: Option<&PathBuf>,
    ) -> std::result::Result<bool, russh::keys::Error> {
        match path {
            Some(path) => check_known_hosts_path(&self.host, self.port, key, path),
            None => check_known_hosts(&self.host, self.port, key),
        }
    }
}

impl client::Handler for TunnelHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &ssh_key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        match &self.policy {
            HostKeyPolicy::AcceptAny => {
                tracing::warn!(
                    host = %self.host,
                    port = self.port,
                    "accepting host key without verification"
                );
                Ok(true)
            }
            HostKeyPolicy::Fingerprint(allowed) => {
                let fingerprint = server_public_key
                    .fingerprint(ssh_key::HashAlg::Sha256)
                    .to_string();
                let accepted = allowed.iter().any(|f| f == &fingerprint);
                if !accepted {
                    tracing::warn!(host = %self.host, port = self.port, %fingerprint, "host key fingerprint not pinned");
                }
                Ok(accepted)
            }
            HostKeyPolicy::Strict { known_hosts } => {
                match self.check_known_hosts(server_public_key, known_hosts.as_ref()) {
                    Ok(known) => Ok(known),
                    Err(russh::keys::Error::KeyChanged { line }) => {
                        tracing::warn!(host = %self.host, port = self.port, line, "host key changed");
                        Ok(false)
                    }
                    Err(e) => {
                        tracing::debug!(host = %self.host, "known_hosts lookup failed: {}", e);
                        Ok(false)
                    }
                }
            }
            HostKeyPolicy::TrustOnFirstUse { known_hosts } => {
                match self.check_known_hosts(server_public_key, known_hosts.as_ref()) {
                    Ok(true) => Ok(true),
                    Err(russh::keys::Error::KeyChanged { line }) => {
                        tracing::warn!(host = %self.host, port = self.port, line, "host key changed");
                        Ok(false)
                    }
                    // Unknown host, or no known_hosts file yet.
                    Ok(false) | Err(_) => {
                        tracing::warn!(
                            "Trust-On-First-Use: accepting unknown host key for {}:{}",
                            self.host,
                            self.port
                        );
                        let learned = match known_hosts {
                            Some(path) => learn_known_hosts_path(
                                &self.host,
                                self.port,
                                server_public_key,
                                path,
                            ),
                            None => learn_known_hosts(&self.host, self.port, server_public_key),
                        };
                        if let Err(e) = learned {
                            tracing::warn!("Failed to save host key to known_hosts: {}", e);
                        }
                        Ok(true)
                    }
                }
            }
        }
    }
}

/// An established, authenticated SSH session.
pub struct Session {
    host: String,
    port: u16,
    handle: Handle<TunnelHandler>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("handle", &"<russh::Handle>")
            .finish()
    }
}

impl Session {
    /// Dial the hop over TCP and authenticate.
    pub async fn connect(config: SessionConfig) -> Result<Self> {
        let timeout = config.connect_timeout;
        let host = config.host.clone();
        let port = config.port;

        let handshake = async {
            let handle = client::connect(
                russh_config(),
                (host.as_str(), port),
                TunnelHandler::new(host.clone(), port, config.host_keys.clone()),
            )
            .await
            .map_err(|e| map_connect_error(e, &host, port))?;
            Self::authenticate(handle, &config).await
        };

        tokio::time::timeout(timeout, handshake)
            .await
            .map_err(|_| SessionError::Timeout(timeout))?
    }

    /// Run the SSH handshake over an already-open byte stream (typically a
    /// relay channel from the previous hop) and authenticate.
    pub async fn connect_over<S>(config: SessionConfig, stream: S) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let timeout = config.connect_timeout;
        let host = config.host.clone();
        let port = config.port;

        let handshake = async {
            let handle = client::connect_stream(
                russh_config(),
                stream,
                TunnelHandler::new(host.clone(), port, config.host_keys.clone()),
            )
            .await
            .map_err(|e| map_connect_error(e, &host, port))?;
            Self::authenticate(handle, &config).await
        };

        tokio::time::timeout(timeout, handshake)
            .await
            .map_err(|_| SessionError::Timeout(timeout))?
    }

    async fn authenticate(mut handle: Handle<TunnelHandler>, config: &SessionConfig) -> Result<Self> {
        let hash_alg = handle.best_supported_rsa_hash().await?.flatten();

        let result = handle
            .authenticate_publickey(
                &config.user,
                PrivateKeyWithHashAlg::new(Arc::clone(&config.key), hash_alg),
            )
            .await?;

        if !result.success() {
            if let Err(e) = handle
                .disconnect(Disconnect::ByApplication, "authentication failed", "en")
                .await
            {
                tracing::debug!(host = %config.host, port = config.port, "disconnect failed: {}", e);
            }
            return Err(SessionError::AuthenticationFailed(config.user.clone()));
        }

        tracing::info!(host = %config.host, port = config.port, user = %config.user, "SSH session established");

        Ok(Self {
            host: config.host.clone(),
            port: config.port,
            handle,
        })
    }

    /// Open a direct-tcpip sub-channel to the address named in `request`.
    pub async fn open_relay(&self, request: &RelayRequest) -> Result<Channel<Msg>> {
        self.handle
            .channel_open_direct_tcpip(
                request.host.as_str(),
                u32::from(request.port),
                request.originator_address.as_str(),
                u32::from(request.originator_port),
            )
            .await
            .map_err(|e| SessionError::ChannelOpen {
                host: request.host.clone(),
                port: request.port,
                reason: e.to_string(),
            })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }

    /// Disconnect the session. Errors are logged; a session that is already
    /// gone is not an error.
    pub async fn disconnect(&self) {
        if self.handle.is_closed() {
            return;
        }
        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
        {
            tracing::debug!(host = %self.host, port = self.port, "disconnect failed: {}", e);
        }
    }
}

fn russh_config() -> Arc<Config> {
    // Tunnels may sit idle for a long time between client connections, so
    // rely on keepalives instead of an inactivity timeout.
    Arc::new(Config {
        inactivity_timeout: None,
        keepalive_interval: Some(Duration::from_secs(30)),
        keepalive_max: 3,
        ..Default::default()
    })
}

fn map_connect_error(e: russh::Error, host: &str, port: u16) -> SessionError {
    match e {
        russh::Error::UnknownKey => SessionError::HostKeyRejected {
            host: host.to_string(),
            port,
        },
        russh::Error::IO(io) => SessionError::Connection(format!("{host}:{port}: {io}")),
        other => SessionError::Protocol(other),
    }
}
