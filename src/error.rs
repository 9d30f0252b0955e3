// ABOUTME: Errors surfaced by the hoptunnel binary: config discovery, parsing and tunnel setup.
// ABOUTME: Tunnel failures are wrapped transparently so the failing hop stays visible.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("refusing to overwrite {} (use --force)", .0.display())]
    AlreadyExists(PathBuf),

    #[error("no tunnel configuration file found in {}", .0.display())]
    ConfigNotFound(PathBuf),

    #[error("invalid tunnel configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Tunnel(#[from] crate::tunnel::Error),

    #[error("could not wait for Ctrl-C: {0}")]
    Signal(#[source] std::io::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed tunnel configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
