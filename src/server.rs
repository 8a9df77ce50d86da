//! The SOCKS5 server orchestrator (spec.md §4.6, §3 `Server`).
//!
//! Owns the TCP listener, the shared UDP relay socket, and the two
//! registries tracking active TCP and UDP requests. Spawns one session task
//! per accepted TCP connection; each session dispatches into the TCP or UDP
//! relay engines as appropriate.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::net::{TcpListener, UdpSocket};
use tracing::{error, info};

use crate::config::{Authenticator, Config};
use crate::error::SocksError;
use crate::parse::AddrPort;
use crate::session::Session;
use crate::udp::relay::UdpRegistry;

/// Bookkeeping entry for one active CONNECT/BIND pair (spec.md §3
/// `TCPRequest`). Kept only for the lifetime of the relay; the registry
/// exists for observability (I1: every entry corresponds to a live or
/// closing pair of connections), not for dedup the way the UDP registry is.
#[derive(Debug, Clone)]
pub struct TcpRequestHandle {
    pub id: u64,
    pub client_addr: SocketAddr,
    pub target: AddrPort,
}

pub type TcpRegistry = Arc<Mutex<HashMap<String, TcpRequestHandle>>>;

/// The long-lived, process-wide SOCKS5 server.
pub struct Server {
    listener: TcpListener,
    pub(crate) relay_socket: Arc<UdpSocket>,
    pub(crate) tcp_requests: TcpRegistry,
    pub(crate) udp_requests: UdpRegistry,
    pub(crate) authenticator: Box<dyn Authenticator>,
    next_session_id: AtomicU64,
}

impl Server {
    /// Binds the TCP listener on `config.port` and the UDP relay socket on
    /// an ephemeral port, per spec.md §4.6.
    pub async fn bind(config: Config) -> Result<Arc<Self>, SocksError> {
        let listener = TcpListener::bind(("0.0.0.0", config.port))
            .await
            .map_err(SocksError::BindFailed)?;
        let relay_socket = UdpSocket::bind(("0.0.0.0", 0))
            .await
            .map_err(SocksError::BindFailed)?;

        info!(
            tcp_addr = %listener.local_addr()?,
            udp_addr = %relay_socket.local_addr()?,
            "SOCKS5 server bound"
        );

        Ok(Arc::new(Self {
            listener,
            relay_socket: Arc::new(relay_socket),
            tcp_requests: Arc::new(Mutex::new(HashMap::new())),
            udp_requests: Arc::new(Mutex::new(HashMap::new())),
            authenticator: config.authenticator,
            next_session_id: AtomicU64::new(0),
        }))
    }

    /// The address the TCP listener is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// The address of the shared UDP relay socket, advertised in every
    /// UDP ASSOCIATE reply.
    pub fn udp_relay_addr(&self) -> std::io::Result<SocketAddr> {
        self.relay_socket.local_addr()
    }

    /// Runs the accept loop: spawns one session task per accepted
    /// connection. Returns only if the listener itself fails; individual
    /// session errors are logged and do not stop the loop.
    pub async fn run(self: Arc<Self>) -> Result<(), SocksError> {
        let udp_relay_socket = Arc::clone(&self.relay_socket);
        let udp_registry = Arc::clone(&self.udp_requests);
        tokio::spawn(crate::udp::relay::run_ingress(udp_relay_socket, udp_registry));

        loop {
            let (stream, client_addr) = self.listener.accept().await?;
            let server = Arc::clone(&self);
            let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);

            tokio::spawn(async move {
                let session = Session::new(session_id, server, stream, client_addr);
                if let Err(err) = session.run().await {
                    error!(session_id, %client_addr, %err, "session ended with error");
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StaticAuthenticator;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    async fn running_server(authenticator: Box<dyn Authenticator>) -> (SocketAddr, Arc<Server>) {
        let config = Config { port: 0, authenticator };
        let server = Server::bind(config).await.unwrap();
        let addr = server.local_addr().unwrap();
        let handle = Arc::clone(&server);
        tokio::spawn(async move {
            let _ = handle.run().await;
        });
        (addr, server)
    }

    /// End-to-end NO-AUTH CONNECT: handshake, request, reply, then data
    /// flowing in both directions through the relay.
    #[tokio::test]
    async fn no_auth_connect_relays_data_end_to_end() {
        let echo_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let echo_addr = echo_listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = echo_listener.accept().await.unwrap();
            let mut buf = [0u8; 5];
            sock.read_exact(&mut buf).await.unwrap();
            sock.write_all(&buf).await.unwrap();
        });

        let (proxy_addr, _server) = running_server(Box::new(StaticAuthenticator::no_auth())).await;
        let mut client = TcpStream::connect(proxy_addr).await.unwrap();

        // VER=5, NMETHODS=1, METHODS=[NO AUTH]
        client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
        let mut method_reply = [0u8; 2];
        client.read_exact(&mut method_reply).await.unwrap();
        assert_eq!(method_reply, [0x05, 0x00]);

        // CONNECT to the echo server by IPv4 address.
        let ip = match echo_addr.ip() {
            std::net::IpAddr::V4(v4) => v4.octets(),
            _ => unreachable!("test listener is IPv4"),
        };
        let port = echo_addr.port().to_be_bytes();
        let mut request = vec![0x05, 0x01, 0x00, 0x01];
        request.extend_from_slice(&ip);
        request.extend_from_slice(&port);
        client.write_all(&request).await.unwrap();

        let mut reply_head = [0u8; 4];
        client.read_exact(&mut reply_head).await.unwrap();
        assert_eq!(reply_head, [0x05, 0x00, 0x00, 0x01]);
        let mut reply_tail = [0u8; 6];
        client.read_exact(&mut reply_tail).await.unwrap();

        client.write_all(b"hello").await.unwrap();
        let mut echoed = [0u8; 5];
        client.read_exact(&mut echoed).await.unwrap();
        assert_eq!(&echoed, b"hello");
    }

    /// A client offering only `NO AUTH` against a mandatory-auth server
    /// must be rejected with `0xFF` and get nothing further.
    #[tokio::test]
    async fn mandatory_auth_rejects_no_auth_offer() {
        let (proxy_addr, _server) =
            running_server(Box::new(StaticAuthenticator::single("alice", "secret"))).await;
        let mut client = TcpStream::connect(proxy_addr).await.unwrap();

        client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
        let mut method_reply = [0u8; 2];
        client.read_exact(&mut method_reply).await.unwrap();
        assert_eq!(method_reply, [0x05, 0xFF]);
    }
}
