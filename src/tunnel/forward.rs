// ABOUTME: Local TCP listener that relays each accepted connection over an SSH sub-channel.
// ABOUTME: Bounded concurrency, cooperative shutdown, and per-connection failure isolation.

use super::error::ForwardError;
use super::relay::RelayRequest;
use super::session::Session;
use super::spec::MIN_ACCEPT_POLL_INTERVAL;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

/// How long `stop` waits for the accept loop before aborting it.
const STOP_GRACE: Duration = Duration::from_secs(2);

/// Byte stream carried by a relay sub-channel.
pub trait RelayIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> RelayIo for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

pub type RelayStream = Box<dyn RelayIo>;

/// Something that can open a sub-channel to a remote address.
#[async_trait]
pub trait RelayOpener: Send + Sync + 'static {
    async fn open(&self, request: &RelayRequest) -> Result<RelayStream, ForwardError>;
}

#[async_trait]
impl RelayOpener for Session {
    async fn open(&self, request: &RelayRequest) -> Result<RelayStream, ForwardError> {
        let channel = self
            .open_relay(request)
            .await
            .map_err(|e| ForwardError::Open {
                host: request.host.clone(),
                port: request.port,
                reason: e.to_string(),
            })?;
        Ok(Box::new(channel.into_stream()))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ForwardOptions {
    /// Upper bound on how long the accept loop waits before re-checking shutdown.
    /// Raised to [`MIN_ACCEPT_POLL_INTERVAL`] if lower.
    pub poll_interval: Duration,
    /// Maximum number of connections relayed at once.
    pub max_connections: usize,
}

/// Handle for a running forwarder.
pub struct ForwardHandle {
    local_addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    wake: Arc<Notify>,
    active: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl ForwardHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of connections currently being relayed.
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Stop accepting and drop the listener. Connections already relaying
    /// are left to finish on their own.
    pub async fn stop(mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.wake.notify_one();

        if tokio::time::timeout(STOP_GRACE, &mut self.task).await.is_err() {
            tracing::warn!(addr = %self.local_addr, "accept loop did not exit in time, aborting");
            self.task.abort();
        }
    }
}

impl Drop for ForwardHandle {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.wake.notify_one();
        self.task.abort();
    }
}

/// Start relaying connections accepted on `listener` to `request`'s address.
pub fn start_forward(
    listener: TcpListener,
    opener: Arc<dyn RelayOpener>,
    request: RelayRequest,
    options: ForwardOptions,
) -> std::io::Result<ForwardHandle> {
    start_counted_forward(listener, opener, request, options, Arc::new(AtomicUsize::new(0)))
}

/// Like [`start_forward`], but relays in flight are tallied in `active`, which
/// the caller can read without going through the handle.
pub(crate) fn start_counted_forward(
    listener: TcpListener,
    opener: Arc<dyn RelayOpener>,
    request: RelayRequest,
    options: ForwardOptions,
    active: Arc<AtomicUsize>,
) -> std::io::Result<ForwardHandle> {
    let local_addr = listener.local_addr()?;
    let shutdown = Arc::new(AtomicBool::new(false));
    let wake = Arc::new(Notify::new());

    let task = tokio::spawn(run_forwarder(
        listener,
        opener,
        Arc::new(request),
        options,
        Arc::clone(&shutdown),
        Arc::clone(&wake),
        Arc::clone(&active),
    ));

    Ok(ForwardHandle {
        local_addr,
        shutdown,
        wake,
        active,
        task,
    })
}

/// Accept loop. At most one runs per listener.
async fn run_forwarder(
    listener: TcpListener,
    opener: Arc<dyn RelayOpener>,
    request: Arc<RelayRequest>,
    options: ForwardOptions,
    shutdown: Arc<AtomicBool>,
    wake: Arc<Notify>,
    active: Arc<AtomicUsize>,
) {
    let limiter = Arc::new(Semaphore::new(options.max_connections.max(1)));
    let poll_interval = options.poll_interval.max(MIN_ACCEPT_POLL_INTERVAL);

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        // Hold a permit before accepting so excess clients wait in the backlog.
        let permit = tokio::select! {
            permit = Arc::clone(&limiter).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
            _ = wake.notified() => continue,
            _ = tokio::time::sleep(poll_interval) => continue,
        };

        let accept_result = tokio::select! {
            result = listener.accept() => result,
            _ = wake.notified() => continue,
            _ = tokio::time::sleep(poll_interval) => continue,
        };

        match accept_result {
            Ok((stream, peer)) => {
                let opener = Arc::clone(&opener);
                let request = Arc::clone(&request);
                // Counted before spawning; an accepted connection is always in the total.
                let counted = ActiveGuard::enter(&active);
                tokio::spawn(async move {
                    let _counted = counted;
                    if let Err(e) = forward_connection(stream, opener.as_ref(), &request, permit).await {
                        tracing::debug!(%peer, "Forward connection error: {}", e);
                    }
                });
            }
            Err(e) => {
                if shutdown.load(Ordering::SeqCst) {
                    break;
                }
                // Transient (e.g. EMFILE); back off briefly and keep serving.
                tracing::warn!("Accept error on tunnel listener: {}", e);
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
    }

    tracing::debug!("accept loop stopped");
}

/// Holds one slot in the active connection count until dropped.
struct ActiveGuard(Arc<AtomicUsize>);

impl ActiveGuard {
    fn enter(active: &Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(active))
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Relay one accepted connection until either direction finishes.
async fn forward_connection(
    local: TcpStream,
    opener: &dyn RelayOpener,
    request: &RelayRequest,
    _permit: OwnedSemaphorePermit,
) -> Result<(), ForwardError> {
    let peer = local.peer_addr()?;
    let remote = match opener.open(request).await {
        Ok(remote) => remote,
        Err(e) => {
            tracing::warn!(%peer, host = %request.host, port = request.port, "relay open failed: {}", e);
            return Err(e);
        }
    };
    tracing::debug!(%peer, host = %request.host, port = request.port, "relay opened");

    let _ = local.set_nodelay(true);
    let (mut local_read, mut local_write) = local.into_split();
    let (mut remote_read, mut remote_write) = tokio::io::split(remote);

    let mut upstream = tokio::spawn(async move {
        let copied = tokio::io::copy(&mut local_read, &mut remote_write).await;
        let _ = remote_write.shutdown().await;
        copied
    });
    let mut downstream = tokio::spawn(async move {
        let copied = tokio::io::copy(&mut remote_read, &mut local_write).await;
        let _ = local_write.shutdown().await;
        copied
    });

    // Whichever direction ends first tears down both; aborting the other task
    // drops its halves, closing the socket and the channel.
    tokio::select! {
        result = &mut upstream => {
            downstream.abort();
            log_copy_result(&peer, "upstream", result);
        }
        result = &mut downstream => {
            upstream.abort();
            log_copy_result(&peer, "downstream", result);
        }
    }

    Ok(())
}

fn log_copy_result(
    peer: &SocketAddr,
    direction: &str,
    result: Result<std::io::Result<u64>, tokio::task::JoinError>,
) {
    match result {
        Ok(Ok(bytes)) => tracing::debug!(%peer, direction, bytes, "relay closed"),
        Ok(Err(e)) => tracing::debug!(%peer, direction, "relay I/O error: {}", e),
        Err(e) => tracing::debug!(%peer, direction, "relay task failed: {}", e),
    }
}
