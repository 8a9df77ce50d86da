//! UDP ASSOCIATE relay engine.
//!
//! A single UDP socket — the *relay socket* — serves every client's UDP
//! ASSOCIATE session. The ingress loop reads datagrams arriving on it from
//! clients, strips the SOCKS5 UDP header (RFC 1928 §7), and forwards the
//! payload to the requested remote peer over a per-client outbound UDP
//! socket. A companion egress task per client reads replies from that
//! outbound socket, re-wraps them with the header, and writes them back to
//! the relay socket addressed to the client.
//!
//! Grounded in the reassembly/dial/reply-loop shape of the original Go
//! implementation's `udp-handler.go` (`UDPTransport`, `processUDPDategrams`,
//! `handleUDPReplie`), re-expressed with `tokio::net::UdpSocket` and a
//! `Mutex`-guarded registry the way the rest of this crate's relay code
//! does.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::parse::AddrPort;
use crate::udp::header::UdpHeader;

/// Maximum UDP payload this relay will read at once (conservative MTU
/// headroom, matching the original Go constant `MAXUDPDATA`).
const MAX_UDP_DATAGRAM: usize = 65_507;

/// How long the egress side waits for a reply from the remote peer before
/// treating the association as idle and tearing it down.
const REMOTE_IDLE_TIMEOUT: Duration = Duration::from_secs(3);

/// How long an incomplete fragment sequence may sit in the reassembly
/// buffer before it is discarded (spec.md §4.5, "may additionally set a
/// 5-second reassembly deadline").
const REASSEMBLY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct Reassembly {
    buffer: Vec<u8>,
    position: u8,
    generation: u64,
}

/// State for one client's UDP ASSOCIATE session (spec.md §3 `UDPRequest`).
pub struct UdpRequest {
    client_addr: SocketAddr,
    remote: UdpSocket,
    remote_addr: SocketAddr,
    reassembly: Mutex<Reassembly>,
}

/// Shared registry of active UDP associations, keyed by client address
/// string (spec.md I2: at most one entry per client address).
pub type UdpRegistry = Arc<Mutex<HashMap<String, Arc<UdpRequest>>>>;

/// Runs the ingress loop: `client -> remote`.
///
/// Reads datagrams from `relay_socket` forever. Per-datagram errors (a
/// malformed header, a resolve failure, a dial failure) are logged and the
/// offending datagram is discarded; they never terminate the loop
/// (spec.md §7).
pub async fn run_ingress(relay_socket: Arc<UdpSocket>, registry: UdpRegistry) {
    let mut buf = vec![0u8; MAX_UDP_DATAGRAM];
    loop {
        let (n, client_addr) = match relay_socket.recv_from(&mut buf).await {
            Ok(pair) => pair,
            Err(err) => {
                warn!(%err, "UDP relay socket read failed");
                continue;
            }
        };

        if let Err(err) =
            handle_datagram(&relay_socket, &registry, client_addr, &buf[..n]).await
        {
            debug!(%client_addr, %err, "dropping malformed or unroutable UDP datagram");
        }
    }
}

async fn handle_datagram(
    relay_socket: &Arc<UdpSocket>,
    registry: &UdpRegistry,
    client_addr: SocketAddr,
    datagram: &[u8],
) -> Result<(), crate::error::SocksError> {
    let (header, payload) = UdpHeader::parse(datagram)?;
    let remote_addr = header.dst.resolve().await?;

    let request = get_or_create_association(relay_socket, registry, client_addr, remote_addr)
        .await?;

    apply_fragment_policy(&request, header.frag, payload).await;
    Ok(())
}

async fn get_or_create_association(
    relay_socket: &Arc<UdpSocket>,
    registry: &UdpRegistry,
    client_addr: SocketAddr,
    remote_addr: SocketAddr,
) -> Result<Arc<UdpRequest>, crate::error::SocksError> {
    let key = client_addr.to_string();

    if let Some(existing) = registry.lock().unwrap().get(&key) {
        return Ok(Arc::clone(existing));
    }

    let remote = UdpSocket::bind((if remote_addr.is_ipv4() { "0.0.0.0" } else { "::" }, 0))
        .await
        .map_err(crate::error::SocksError::DialFailed)?;
    remote
        .connect(remote_addr)
        .await
        .map_err(crate::error::SocksError::DialFailed)?;

    let request = Arc::new(UdpRequest {
        client_addr,
        remote,
        remote_addr,
        reassembly: Mutex::new(Reassembly::default()),
    });

    // Another datagram for the same client may have raced us here; the
    // registry mediates dedup under its lock (spec.md I2).
    let request = {
        let mut map = registry.lock().unwrap();
        map.entry(key).or_insert_with(|| Arc::clone(&request));
        Arc::clone(map.get(&client_addr.to_string()).unwrap())
    };

    info!(%client_addr, %remote_addr, "new UDP association");
    tokio::spawn(run_egress(
        Arc::clone(relay_socket),
        Arc::clone(&request),
        Arc::clone(registry),
    ));

    Ok(request)
}

async fn apply_fragment_policy(request: &Arc<UdpRequest>, frag: u8, payload: &[u8]) {
    let flush_first = {
        let mut reassembly = request.reassembly.lock().unwrap();
        if frag > reassembly.position {
            reassembly.position = frag;
            if reassembly.buffer.is_empty() {
                reassembly.generation += 1;
                schedule_reassembly_timeout(Arc::clone(request), reassembly.generation);
            }
            reassembly.buffer.extend_from_slice(payload);
            return;
        } else if frag == 0 {
            if reassembly.buffer.is_empty() {
                None
            } else {
                let flushed = std::mem::take(&mut reassembly.buffer);
                reassembly.position = 0;
                Some(flushed)
            }
        } else {
            debug!(client_addr = %request.client_addr, "discarding out-of-order UDP fragment");
            reassembly.buffer.clear();
            reassembly.position = 0;
            return;
        }
    };

    if let Some(buffered) = flush_first {
        let _ = request.remote.send(&buffered).await;
    }

    if let Err(err) = request.remote.send(payload).await {
        warn!(client_addr = %request.client_addr, %err, "failed to forward UDP datagram to remote");
    }
}

fn schedule_reassembly_timeout(request: Arc<UdpRequest>, generation: u64) {
    tokio::spawn(async move {
        tokio::time::sleep(REASSEMBLY_TIMEOUT).await;
        let mut reassembly = request.reassembly.lock().unwrap();
        if reassembly.generation == generation && reassembly.position != 0 {
            debug!(client_addr = %request.client_addr, "reassembly deadline expired, dropping buffer");
            reassembly.buffer.clear();
            reassembly.position = 0;
        }
    });
}

/// Runs the egress loop for one association: `remote -> client`.
///
/// Exits on idle timeout, EOF, or a closed-socket error, at which point the
/// remote socket is dropped and the association is removed from the
/// registry under its lock (spec.md §4.5).
async fn run_egress(relay_socket: Arc<UdpSocket>, request: Arc<UdpRequest>, registry: UdpRegistry) {
    let mut buf = vec![0u8; MAX_UDP_DATAGRAM];
    loop {
        let read = tokio::time::timeout(REMOTE_IDLE_TIMEOUT, request.remote.recv(&mut buf)).await;

        let n = match read {
            Ok(Ok(n)) => n,
            Ok(Err(err)) => {
                debug!(client_addr = %request.client_addr, %err, "UDP remote socket closed");
                break;
            }
            Err(_elapsed) => {
                debug!(client_addr = %request.client_addr, "UDP association idle timeout");
                break;
            }
        };

        let header = UdpHeader::standalone(AddrPort::from_socket_addr(request.remote_addr));
        let mut wire = header.to_bytes();
        wire.extend_from_slice(&buf[..n]);

        if let Err(err) = relay_socket.send_to(&wire, request.client_addr).await {
            warn!(client_addr = %request.client_addr, %err, "failed to forward UDP reply to client");
            break;
        }
    }

    remove_association(&registry, &request.client_addr);
}

/// Removes a client's UDP association, e.g. when the egress loop exits or
/// the control TCP connection closes. Idempotent: removing twice is a no-op
/// the second time (spec.md P4).
pub fn remove_association(registry: &UdpRegistry, client_addr: &SocketAddr) {
    let removed = registry.lock().unwrap().remove(&client_addr.to_string());
    if removed.is_some() {
        info!(%client_addr, "UDP association torn down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
    }

    async fn fresh_request(client_port: u16, remote: UdpSocket, remote_addr: SocketAddr) -> Arc<UdpRequest> {
        Arc::new(UdpRequest {
            client_addr: addr(client_port),
            remote,
            remote_addr,
            reassembly: Mutex::new(Reassembly::default()),
        })
    }

    #[tokio::test]
    async fn standalone_datagram_forwards_immediately() {
        let remote_listener = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let remote_listener_addr = remote_listener.local_addr().unwrap();

        let remote_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        remote_socket.connect(remote_listener_addr).await.unwrap();

        let request = fresh_request(4000, remote_socket, remote_listener_addr).await;
        apply_fragment_policy(&request, 0, b"hello").await;

        let mut buf = [0u8; 16];
        let n = remote_listener.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello");
    }

    #[tokio::test]
    async fn fragments_are_reassembled_in_order() {
        let remote_listener = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let remote_listener_addr = remote_listener.local_addr().unwrap();

        let remote_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        remote_socket.connect(remote_listener_addr).await.unwrap();

        let request = fresh_request(4001, remote_socket, remote_listener_addr).await;

        apply_fragment_policy(&request, 1, b"AAA").await;
        apply_fragment_policy(&request, 2, b"BBB").await;
        apply_fragment_policy(&request, 0, b"CCC").await;

        let mut buf = [0u8; 16];
        let n = remote_listener.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"AAABBBCCC");

        let reassembly = request.reassembly.lock().unwrap();
        assert_eq!(reassembly.position, 0);
        assert!(reassembly.buffer.is_empty());
    }

    #[tokio::test]
    async fn out_of_order_fragment_resets_buffer_without_forwarding() {
        let remote_listener = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let remote_listener_addr = remote_listener.local_addr().unwrap();

        let remote_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        remote_socket.connect(remote_listener_addr).await.unwrap();

        let request = fresh_request(4002, remote_socket, remote_listener_addr).await;

        apply_fragment_policy(&request, 3, b"AAA").await;
        apply_fragment_policy(&request, 1, b"stale").await;

        let reassembly = request.reassembly.lock().unwrap();
        assert_eq!(reassembly.position, 0);
        assert!(reassembly.buffer.is_empty());
    }

    #[tokio::test]
    async fn remove_association_is_idempotent() {
        let remote_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let remote_addr = remote_socket.local_addr().unwrap();
        let client = addr(5000);
        let request = fresh_request(5000, remote_socket, remote_addr).await;

        let registry: UdpRegistry = Arc::new(Mutex::new(HashMap::new()));
        registry.lock().unwrap().insert(client.to_string(), request);

        remove_association(&registry, &client);
        assert!(!registry.lock().unwrap().contains_key(&client.to_string()));

        // A second removal (e.g. the control TCP closing after the egress
        // loop already tore the association down) must be a harmless no-op.
        remove_association(&registry, &client);
        assert!(!registry.lock().unwrap().contains_key(&client.to_string()));
    }
}
