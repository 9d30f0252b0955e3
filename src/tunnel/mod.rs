// ABOUTME: SSH tunnel exposing a remote service on a local loopback port.
// ABOUTME: Chains hop sessions through bastions and relays accepted connections.

mod credentials;
mod error;
mod forward;
mod lifecycle;
mod port;
mod relay;
mod session;
mod spec;
mod transport;

pub use credentials::{KeyMaterial, expand_path, load_key};
pub use error::{
    DialError, Error, ForwardError, Hop, KeyLoadError, KeyLoadReason, ListenError, Result,
    SessionError,
};
pub use forward::{
    ForwardHandle, ForwardOptions, RelayIo, RelayOpener, RelayStream, start_forward,
};
pub use lifecycle::{Phase, Tunnel};
pub use port::{allocate_port, bind_local};
pub use relay::{LOCAL_ORIGINATOR, RelayDecodeError, RelayRequest};
pub use session::{HostKeyPolicy, Session, SessionConfig};
pub use spec::{
    BastionSpec, DEFAULT_ACCEPT_POLL_INTERVAL, DEFAULT_CONNECT_TIMEOUT, DEFAULT_MAX_CONNECTIONS,
    DEFAULT_SSH_PORT, HopSpec, MIN_ACCEPT_POLL_INTERVAL, TargetAddr, TunnelSpec,
};
pub use transport::{Transport, build as build_transport};
