// ABOUTME: Free loopback port discovery by binding port 0 and releasing it.
// ABOUTME: Another process may claim the released port before the real bind.

use super::error::ListenError;
use std::net::{Ipv4Addr, SocketAddr};
use tokio::net::TcpListener;

pub const LOOPBACK: Ipv4Addr = Ipv4Addr::LOCALHOST;

/// Ask the OS for a free port on 127.0.0.1.
pub async fn allocate_port() -> Result<u16, ListenError> {
    let addr = SocketAddr::from((LOOPBACK, 0));
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| ListenError { addr, source })?;
    let port = listener
        .local_addr()
        .map_err(|source| ListenError { addr, source })?
        .port();
    drop(listener);
    Ok(port)
}

/// Bind the real listener on a previously allocated port.
pub async fn bind_local(port: u16) -> Result<TcpListener, ListenError> {
    let addr = SocketAddr::from((LOOPBACK, port));
    TcpListener::bind(addr)
        .await
        .map_err(|source| ListenError { addr, source })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allocated_port_can_be_bound() {
        let port = allocate_port().await.unwrap();
        assert_ne!(port, 0);

        let listener = bind_local(port).await.unwrap();
        assert_eq!(listener.local_addr().unwrap().port(), port);
    }

    #[tokio::test]
    async fn binding_a_taken_port_is_a_listen_error() {
        let held = TcpListener::bind((LOOPBACK, 0)).await.unwrap();
        let port = held.local_addr().unwrap().port();

        let err = bind_local(port).await.unwrap_err();
        assert_eq!(err.addr.port(), port);
    }
}
