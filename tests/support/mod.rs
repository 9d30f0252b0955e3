// ABOUTME: Test support utilities.
// ABOUTME: Provides in-process SSH servers, an echo target and spec builders.

use std::sync::Once;

// Each test binary only uses some of these modules, so allow dead_code.
#[allow(dead_code)]
pub mod echo;
#[allow(dead_code)]
pub mod ssh_server;

use hoptunnel::tunnel::{HopSpec, HostKeyPolicy, TargetAddr, TunnelSpec};
use std::time::Duration;

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for tests. Safe to call multiple times.
#[allow(dead_code)]
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::EnvFilter;
        let filter = EnvFilter::from_default_env()
            .add_directive("hoptunnel=debug".parse().unwrap())
            .add_directive("russh=warn".parse().unwrap());
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Direct-mode spec reaching `target_port` on loopback through `ssh_port`.
#[allow(dead_code)]
pub fn direct_spec(ssh_port: u16, target_port: u16) -> TunnelSpec {
    TunnelSpec::new(
        HopSpec::new(
            "127.0.0.1",
            ssh_port,
            ssh_server::TEST_USER,
            ssh_server::client_key_path(),
        ),
        TargetAddr::new("127.0.0.1", target_port),
    )
    .host_keys(HostKeyPolicy::AcceptAny)
    .connect_timeout(Duration::from_secs(5))
    .accept_poll_interval(Duration::from_millis(100))
}

/// A loopback port with nothing listening on it.
#[allow(dead_code)]
pub async fn closed_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}
