// ABOUTME: Builds the chain of SSH sessions leading to the primary hop.
// ABOUTME: Each hop after the first is dialed over a relay channel opened on the previous one.

use super::credentials::{KeyMaterial, load_key};
use super::error::{DialError, Error, Hop, Result, SessionError};
use super::relay::RelayRequest;
use super::session::{Session, SessionConfig};
use super::spec::{HopSpec, TunnelSpec};
use std::sync::Arc;

/// The established sessions of a tunnel. `target` reaches the real service;
/// `carriers` are the bastion sessions it rides on, outermost first.
#[derive(Debug)]
pub struct Transport {
    pub target: Arc<Session>,
    pub carriers: Vec<Session>,
}

impl Transport {
    /// Close the target session, then carriers from the innermost outwards.
    pub async fn close(self) {
        self.target.disconnect().await;
        close_all(self.carriers).await;
    }
}

/// Establish every session in `spec`'s hop chain, outermost first.
///
/// All keys are loaded before any network I/O. On failure every session
/// opened so far is closed before the error is returned.
pub async fn build(spec: &TunnelSpec) -> Result<Transport> {
    let hops = spec.hops();

    let keys = hops
        .iter()
        .map(|hop| load_key(&hop.key_path))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let chained = hops.len() > 1;
    let mut carriers: Vec<Session> = Vec::with_capacity(hops.len() - 1);
    let mut current: Option<Session> = None;

    for (index, (hop, key)) in hops.iter().zip(keys).enumerate() {
        let config = session_config(spec, hop, key);

        let next = match &current {
            None => {
                let kind = if chained { Hop::Bastion } else { Hop::Primary };
                tracing::debug!(hop = %kind, host = %hop.host, port = hop.port, "dialing");
                Session::connect(config).await.map_err(|e| (kind, e))
            }
            Some(previous) => dial_through(previous, config, hop).await,
        };

        match next {
            Ok(session) => {
                if let Some(previous) = current.replace(session) {
                    carriers.push(previous);
                }
            }
            Err((kind, source)) => {
                carriers.extend(current.take());
                close_all(carriers).await;
                return Err(dial_error(kind, index, hop, source));
            }
        }
    }

    let Some(target) = current else {
        unreachable!("hop chain always contains the primary hop");
    };

    Ok(Transport {
        target: Arc::new(target),
        carriers,
    })
}

/// Open a relay channel on `previous` to the hop and run a fresh handshake over it.
async fn dial_through(
    previous: &Session,
    config: SessionConfig,
    hop: &HopSpec,
) -> std::result::Result<Session, (Hop, SessionError)> {
    let request = RelayRequest::from_local(hop.host.clone(), hop.port);

    tracing::debug!(via = %previous.host(), host = %hop.host, port = hop.port, "opening relay");
    let channel = previous
        .open_relay(&request)
        .await
        .map_err(|e| (Hop::Relay, e))?;

    Session::connect_over(config, channel.into_stream())
        .await
        .map_err(|e| (Hop::Secondary, e))
}

fn session_config(spec: &TunnelSpec, hop: &HopSpec, key: KeyMaterial) -> SessionConfig {
    SessionConfig {
        host: hop.host.clone(),
        port: hop.port,
        user: hop.user.clone(),
        key,
        host_keys: spec.host_keys.clone(),
        connect_timeout: spec.connect_timeout,
    }
}

fn dial_error(hop: Hop, index: usize, spec: &HopSpec, source: SessionError) -> Error {
    tracing::warn!(hop = %hop, host = %spec.host, port = spec.port, "dial failed: {}", source);
    Error::Dial(DialError {
        hop,
        index,
        host: spec.host.clone(),
        port: spec.port,
        source,
    })
}

async fn close_all(sessions: Vec<Session>) {
    for session in sessions.into_iter().rev() {
        session.disconnect().await;
    }
}
