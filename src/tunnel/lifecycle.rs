// ABOUTME: Public tunnel object: idempotent start/stop composing transport, port and forwarder.
// ABOUTME: A failed start unwinds everything it opened; stop always returns to Idle.

use super::error::{ListenError, Result};
use super::forward::{ForwardHandle, ForwardOptions, RelayOpener, start_counted_forward};
use super::port::{allocate_port, bind_local};
use super::relay::RelayRequest;
use super::spec::TunnelSpec;
use super::transport::{self, Transport};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};

/// Lifecycle phase of a [`Tunnel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Starting,
    Running,
    Stopping,
}

impl Phase {
    pub fn can_transition_to(self, next: Phase) -> bool {
        matches!(
            (self, next),
            (Phase::Idle, Phase::Starting)
                | (Phase::Starting, Phase::Running)
                | (Phase::Starting, Phase::Idle)
                | (Phase::Running, Phase::Stopping)
                | (Phase::Stopping, Phase::Idle)
        )
    }
}

/// Resources owned while running.
struct Active {
    forwarder: ForwardHandle,
    transport: Transport,
}

/// A local loopback port relaying to a [`TunnelSpec`]'s target through its hop chain.
///
/// `start` and `stop` are serialized internally and may be called from any task.
pub struct Tunnel {
    spec: TunnelSpec,
    phase: Mutex<Phase>,
    local_port: AtomicU16,
    relays: Arc<AtomicUsize>,
    active: tokio::sync::Mutex<Option<Active>>,
}

impl std::fmt::Debug for Tunnel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tunnel")
            .field("target", &self.spec.target)
            .field("phase", &self.phase())
            .field("local_port", &self.local_port())
            .finish()
    }
}

impl Tunnel {
    /// Create an idle tunnel. No I/O happens until [`Tunnel::start`].
    pub fn new(spec: TunnelSpec) -> Self {
        Self {
            spec,
            phase: Mutex::new(Phase::Idle),
            local_port: AtomicU16::new(0),
            relays: Arc::new(AtomicUsize::new(0)),
            active: tokio::sync::Mutex::new(None),
        }
    }

    pub fn spec(&self) -> &TunnelSpec {
        &self.spec
    }

    pub fn phase(&self) -> Phase {
        *self.phase.lock()
    }

    pub fn is_running(&self) -> bool {
        self.phase() == Phase::Running
    }

    pub fn local_port(&self) -> Option<u16> {
        match self.local_port.load(Ordering::SeqCst) {
            0 => None,
            port => Some(port),
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_port()
            .map(|port| SocketAddr::from((super::port::LOOPBACK, port)))
    }

    /// Connections currently being relayed. Never waits on a pending start or stop.
    pub fn active_connections(&self) -> usize {
        self.relays.load(Ordering::SeqCst)
    }

    /// Bring the tunnel up and return its local port. Returns the existing
    /// port without new I/O when already running.
    pub async fn start(&self) -> Result<u16> {
        let mut active = self.active.lock().await;
        if let (Some(_), Some(port)) = (active.as_ref(), self.local_port()) {
            return Ok(port);
        }

        self.transition(Phase::Starting);
        match self.open().await {
            Ok((port, opened)) => {
                *active = Some(opened);
                self.local_port.store(port, Ordering::SeqCst);
                self.transition(Phase::Running);
                tracing::info!(
                    local_port = port,
                    remote_host = %self.spec.target.host,
                    remote_port = self.spec.target.port,
                    hops = self.spec.bastions.len() + 1,
                    "tunnel started"
                );
                Ok(port)
            }
            Err(e) => {
                self.transition(Phase::Idle);
                Err(e)
            }
        }
    }

    async fn open(&self) -> Result<(u16, Active)> {
        let port = allocate_port().await?;
        let transport = transport::build(&self.spec).await?;

        let listener = match bind_local(port).await {
            Ok(listener) => listener,
            Err(e) => {
                transport.close().await;
                return Err(e.into());
            }
        };

        let opener: Arc<dyn RelayOpener> = transport.target.clone();
        let request = RelayRequest::from_local(self.spec.target.host.clone(), self.spec.target.port);
        let options = ForwardOptions {
            poll_interval: self.spec.accept_poll_interval,
            max_connections: self.spec.max_connections,
        };

        let forwarder = match start_counted_forward(
            listener,
            opener,
            request,
            options,
            Arc::clone(&self.relays),
        ) {
            Ok(forwarder) => forwarder,
            Err(source) => {
                transport.close().await;
                let addr = SocketAddr::from((super::port::LOOPBACK, port));
                return Err(ListenError { addr, source }.into());
            }
        };

        Ok((
            port,
            Active {
                forwarder,
                transport,
            },
        ))
    }

    /// Tear the tunnel down. Safe to call repeatedly and before any start.
    pub async fn stop(&self) {
        let mut active = self.active.lock().await;
        let Some(Active {
            forwarder,
            transport,
        }) = active.take()
        else {
            return;
        };

        self.transition(Phase::Stopping);
        let port = self.local_port.swap(0, Ordering::SeqCst);
        forwarder.stop().await;
        transport.close().await;
        self.transition(Phase::Idle);

        tracing::info!(local_port = port, "tunnel stopped");
    }

    fn transition(&self, next: Phase) {
        let mut phase = self.phase.lock();
        let current = *phase;
        // A start future dropped mid-flight leaves Starting behind.
        if !current.can_transition_to(next) {
            tracing::warn!(from = ?current, to = ?next, "unexpected tunnel phase transition");
        }
        tracing::trace!(from = ?current, to = ?next, "tunnel phase");
        *phase = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_lifecycle_transitions_are_valid() {
        use Phase::*;
        let all = [Idle, Starting, Running, Stopping];
        let valid = [
            (Idle, Starting),
            (Starting, Running),
            (Starting, Idle),
            (Running, Stopping),
            (Stopping, Idle),
        ];
        for from in all {
            for to in all {
                assert_eq!(
                    from.can_transition_to(to),
                    valid.contains(&(from, to)),
                    "{from:?} -> {to:?}"
                );
            }
        }
    }
}
