// ABOUTME: In-process SSH server helper for integration tests.
// ABOUTME: Public-key auth plus direct-tcpip relaying, with counters for assertions.

use bytes::{BufMut, BytesMut};
use hoptunnel::tunnel::RelayRequest;
use parking_lot::Mutex;
use russh::keys::ssh_key::{self, HashAlg};
use russh::server::{self, Auth, Msg, Session};
use russh::Channel;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

pub const TEST_USER: &str = "testuser";

pub fn fixture_path(name: &str) -> String {
    let manifest_dir = env!("CARGO_MANIFEST_DIR");
    format!("{}/tests/fixtures/{}", manifest_dir, name)
}

/// Private key accepted by servers started with default options.
pub fn client_key_path() -> String {
    fixture_path("client_ed25519")
}

fn read_public_key(path: &str) -> ssh_key::PublicKey {
    let text = std::fs::read_to_string(path).expect("public key fixture should exist");
    ssh_key::PublicKey::from_openssh(text.trim()).expect("public key fixture should parse")
}

/// Options for a test server.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub user: String,
    /// `.pub` fixture whose key is authorized.
    pub authorized_key: String,
    /// Refuse every direct-tcpip request.
    pub deny_relays: bool,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            user: TEST_USER.to_string(),
            authorized_key: fixture_path("client_ed25519.pub"),
            deny_relays: false,
        }
    }
}

/// A running SSH server bound to 127.0.0.1 on an ephemeral port.
pub struct TestSshServer {
    addr: SocketAddr,
    connections: Arc<AtomicUsize>,
    sessions: Arc<AtomicUsize>,
    relays: Arc<Mutex<Vec<RelayRequest>>>,
    task: JoinHandle<()>,
}

impl TestSshServer {
    pub async fn start() -> Self {
        Self::start_with(ServerOptions::default()).await
    }

    pub async fn start_with(options: ServerOptions) -> Self {
        let host_key = russh::keys::load_secret_key(fixture_path("host_ed25519"), None)
            .expect("host key fixture should load");

        let config = Arc::new(server::Config {
            keys: vec![host_key],
            auth_rejection_time: Duration::from_millis(10),
            inactivity_timeout: None,
            ..Default::default()
        });

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("test server should bind");
        let addr = listener.local_addr().expect("bound address");

        let connections = Arc::new(AtomicUsize::new(0));
        let sessions = Arc::new(AtomicUsize::new(0));
        let relays = Arc::new(Mutex::new(Vec::new()));
        let authorized = read_public_key(&options.authorized_key);

        let task = {
            let connections = Arc::clone(&connections);
            let sessions = Arc::clone(&sessions);
            let relays = Arc::clone(&relays);
            tokio::spawn(async move {
                loop {
                    let Ok((stream, _)) = listener.accept().await else {
                        break;
                    };
                    connections.fetch_add(1, Ordering::SeqCst);
                    sessions.fetch_add(1, Ordering::SeqCst);

                    let handler = TestHandler {
                        user: options.user.clone(),
                        authorized: authorized.clone(),
                        deny_relays: options.deny_relays,
                        relays: Arc::clone(&relays),
                    };
                    let config = Arc::clone(&config);
                    let sessions = Arc::clone(&sessions);
                    tokio::spawn(async move {
                        if let Ok(session) = server::run_stream(config, stream, handler).await {
                            let _ = session.await;
                        }
                        sessions.fetch_sub(1, Ordering::SeqCst);
                    });
                }
            })
        };

        Self {
            addr,
            connections,
            sessions,
            relays,
            task,
        }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// TCP connections accepted so far.
    pub fn connection_attempts(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Sessions whose connection has not ended yet.
    pub fn open_sessions(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }

    /// Wait until every session the server accepted has ended.
    pub async fn wait_for_sessions_closed(&self) {
        let drained = tokio::time::timeout(Duration::from_secs(5), async {
            while self.open_sessions() != 0 {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await;
        assert!(
            drained.is_ok(),
            "{} session(s) still open on port {}",
            self.open_sessions(),
            self.port()
        );
    }

    /// direct-tcpip requests received so far.
    pub fn relay_requests(&self) -> Vec<RelayRequest> {
        self.relays.lock().clone()
    }

    /// known_hosts line for this server's host key.
    pub fn known_hosts_line(&self) -> String {
        let key = read_public_key(&fixture_path("host_ed25519.pub"));
        let openssh = key.to_openssh().expect("host key should encode");
        format!("[127.0.0.1]:{} {}", self.port(), openssh)
    }

    pub fn host_fingerprint() -> String {
        read_public_key(&fixture_path("host_ed25519.pub"))
            .fingerprint(HashAlg::Sha256)
            .to_string()
    }

    pub fn known_hosts_file(&self, dir: &std::path::Path) -> PathBuf {
        let path = dir.join("known_hosts");
        std::fs::write(&path, format!("{}\n", self.known_hosts_line()))
            .expect("known_hosts should be written");
        path
    }
}

impl Drop for TestSshServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct TestHandler {
    user: String,
    authorized: ssh_key::PublicKey,
    deny_relays: bool,
    relays: Arc<Mutex<Vec<RelayRequest>>>,
}

impl TestHandler {
    fn reject() -> Auth {
        Auth::Reject {
            proceed_with_methods: None,
            partial_success: false,
        }
    }
}

impl server::Handler for TestHandler {
    type Error = russh::Error;

    async fn auth_publickey(
        &mut self,
        user: &str,
        public_key: &ssh_key::PublicKey,
    ) -> Result<Auth, Self::Error> {
        if user == self.user && public_key.key_data() == self.authorized.key_data() {
            Ok(Auth::Accept)
        } else {
            Ok(Self::reject())
        }
    }

    async fn channel_open_direct_tcpip(
        &mut self,
        channel: Channel<Msg>,
        host_to_connect: &str,
        port_to_connect: u32,
        originator_address: &str,
        originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        // Rebuild the channel-specific payload as it appeared on the wire.
        let mut payload = BytesMut::new();
        for (text, number) in [
            (host_to_connect, port_to_connect),
            (originator_address, originator_port),
        ] {
            payload.put_u32(text.len() as u32);
            payload.put_slice(text.as_bytes());
            payload.put_u32(number);
        }
        let Ok(request) = RelayRequest::decode(&payload) else {
            return Ok(false);
        };
        let port = request.port;
        self.relays.lock().push(request);

        if self.deny_relays {
            return Ok(false);
        }

        match TcpStream::connect((host_to_connect, port)).await {
            Ok(mut remote) => {
                let mut stream = channel.into_stream();
                tokio::spawn(async move {
                    let _ = tokio::io::copy_bidirectional(&mut stream, &mut remote).await;
                });
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }
}
