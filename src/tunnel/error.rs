// ABOUTME: Error types for tunnel setup and relaying.
// ABOUTME: Identifies which hop failed and keeps per-connection failures separate.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Why a private key could not be loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyLoadReason {
    NotFound,
    Unreadable,
    Unparseable,
}

impl fmt::Display for KeyLoadReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyLoadReason::NotFound => write!(f, "file not found"),
            KeyLoadReason::Unreadable => write!(f, "file could not be read"),
            KeyLoadReason::Unparseable => write!(f, "not a recognized private key"),
        }
    }
}

#[derive(Debug, Error)]
#[error(
    "failed to load key from {}: {reason}{}",
    .path.display(),
    .detail.as_ref().map(|d| format!(" ({d})")).unwrap_or_default()
)]
pub struct KeyLoadError {
    pub path: PathBuf,
    pub reason: KeyLoadReason,
    pub detail: Option<String>,
}

impl KeyLoadError {
    pub(crate) fn new(path: impl Into<PathBuf>, reason: KeyLoadReason) -> Self {
        Self {
            path: path.into(),
            reason,
            detail: None,
        }
    }

    pub(crate) fn with_detail(mut self, detail: impl ToString) -> Self {
        self.detail = Some(detail.to_string());
        self
    }
}

/// The step of transport establishment that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hop {
    /// Direct session to the only hop.
    Primary,
    /// Direct session to the outermost hop of a chain.
    Bastion,
    /// Opening the raw sub-channel from one hop to the next.
    Relay,
    /// Handshake and authentication over a relayed sub-channel.
    Secondary,
}

impl fmt::Display for Hop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Hop::Primary => write!(f, "primary"),
            Hop::Bastion => write!(f, "bastion"),
            Hop::Relay => write!(f, "relay"),
            Hop::Secondary => write!(f, "secondary"),
        }
    }
}

/// Failure of a single SSH session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("connection timed out after {0:?}")]
    Timeout(Duration),

    #[error("host key for {host}:{port} was rejected")]
    HostKeyRejected { host: String, port: u16 },

    #[error("authentication failed for user {0}")]
    AuthenticationFailed(String),

    #[error("failed to open relay channel to {host}:{port}: {reason}")]
    ChannelOpen {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("SSH protocol error: {0}")]
    Protocol(#[from] russh::Error),
}

#[derive(Debug, Error)]
#[error("{hop} hop {index} ({host}:{port}) failed: {source}")]
pub struct DialError {
    pub hop: Hop,
    pub index: usize,
    pub host: String,
    pub port: u16,
    #[source]
    pub source: SessionError,
}

#[derive(Debug, Error)]
#[error("failed to listen on {addr}: {source}")]
pub struct ListenError {
    pub addr: SocketAddr,
    #[source]
    pub source: std::io::Error,
}

/// Failure while relaying one accepted connection. Never fatal to the tunnel.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("failed to open relay to {host}:{port}: {reason}")]
    Open {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("relay I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    KeyLoad(#[from] KeyLoadError),

    #[error(transparent)]
    Dial(#[from] DialError),

    #[error(transparent)]
    Listen(#[from] ListenError),
}

impl Error {
    /// The failing hop, when the error came from transport establishment.
    pub fn hop(&self) -> Option<Hop> {
        match self {
            Error::Dial(e) => Some(e.hop),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
