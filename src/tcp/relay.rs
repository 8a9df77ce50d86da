//! TCP relay engine: CONNECT (RFC 1928 §4, CMD=1), BIND (CMD=2), and the
//! bidirectional pipe shared by both.
//!
//! Grounded in `original_source/tcp-handler.go`'s `HandleCONNECT`,
//! `HandleBIND`, and `TCPTransport`: the retry/backoff policy here is a
//! direct port of that function's loop, since the teacher's own example
//! (`demos/simple_server.rs`) only calls `tokio::io::copy_bidirectional`,
//! which has no hook for the transient-error backoff spec.md mandates.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{SocksError, is_terminal_io_error};
use crate::parse::AddrPort;

/// Number of transient-error retries a pipe direction tolerates before
/// giving up (spec.md §4.4.3, `TCPRETRY`).
const TCP_RETRY: u32 = 3;

/// Backoff between retries after a transient (non-terminal) I/O error.
const TRANSIENT_BACKOFF: Duration = Duration::from_secs(5);

/// Dials the CONNECT target. Returns the established stream and the
/// address/port of its local endpoint, which becomes `BND.ADDR`/`BND.PORT`
/// in the success reply.
pub async fn dial_connect(dst: &AddrPort) -> Result<(TcpStream, AddrPort), SocksError> {
    let target = dst.resolve().await?;
    let stream = TcpStream::connect(target)
        .await
        .map_err(SocksError::DialFailed)?;
    let local = stream.local_addr()?;
    Ok((stream, AddrPort::from_socket_addr(local)))
}

/// Opens the ephemeral listener for a BIND request. Returns the listener
/// and its bound address/port, sent in the first BIND reply.
pub async fn open_bind_listener() -> Result<(TcpListener, AddrPort), SocksError> {
    let listener = TcpListener::bind(("0.0.0.0", 0))
        .await
        .map_err(SocksError::BindFailed)?;
    let local = listener.local_addr()?;
    Ok((listener, AddrPort::from_socket_addr(local)))
}

/// Accepts the single inbound peer connection a BIND request waits for.
/// Returns the accepted stream and the peer's address/port, sent in the
/// second BIND reply.
pub async fn accept_bind_peer(
    listener: TcpListener,
) -> Result<(TcpStream, AddrPort), SocksError> {
    let (stream, peer) = listener.accept().await.map_err(SocksError::BindFailed)?;
    Ok((stream, AddrPort::from_socket_addr(peer)))
}

/// Outcome of both pipe directions once the relay has finished.
#[derive(Debug, Default)]
pub struct PipeOutcome {
    pub client_to_remote: Option<std::io::Error>,
    pub remote_to_client: Option<std::io::Error>,
}

enum Signal {
    ClientToRemote(Option<std::io::Error>),
    RemoteToClient(Option<std::io::Error>),
}

/// Runs the bidirectional pipe between `client` and `remote` until both
/// directions reach a terminal condition, then returns. Read deadlines are
/// not set on either socket at pipe start (spec.md §4.4.3): neither side of
/// this relay ever applies one itself.
pub async fn pipe(client: TcpStream, remote: TcpStream) -> PipeOutcome {
    let (client_r, client_w) = client.into_split();
    let (remote_r, remote_w) = remote.into_split();

    let (tx, mut rx) = mpsc::channel(2);

    let tx_a = tx.clone();
    tokio::spawn(async move {
        let err = pipe_direction(client_r, remote_w, "client->remote").await;
        let _ = tx_a.send(Signal::ClientToRemote(err)).await;
    });
    tokio::spawn(async move {
        let err = pipe_direction(remote_r, client_w, "remote->client").await;
        let _ = tx.send(Signal::RemoteToClient(err)).await;
    });

    let mut outcome = PipeOutcome::default();
    for _ in 0..2 {
        match rx.recv().await {
            Some(Signal::ClientToRemote(e)) => outcome.client_to_remote = e,
            Some(Signal::RemoteToClient(e)) => outcome.remote_to_client = e,
            None => break,
        }
    }
    outcome
}

/// Copies bytes from `reader` to `writer` until EOF or a terminal error.
/// Transient errors sleep for [`TRANSIENT_BACKOFF`] and retry, up to
/// [`TCP_RETRY`] times, the way the original Go `TCPTransport` loop does.
async fn pipe_direction(
    mut reader: OwnedReadHalf,
    mut writer: OwnedWriteHalf,
    direction: &'static str,
) -> Option<std::io::Error> {
    let mut retries_left = TCP_RETRY;
    let mut buf = vec![0u8; 16 * 1024];

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => return None,
            Ok(n) => {
                if let Err(err) = writer.write_all(&buf[..n]).await {
                    debug!(direction, %err, "pipe write failed");
                    return Some(err);
                }
            }
            Err(err) => {
                if is_terminal_io_error(&err) || retries_left == 0 {
                    return Some(err);
                }
                warn!(direction, %err, retries_left, "transient pipe read error, backing off");
                tokio::time::sleep(TRANSIENT_BACKOFF).await;
                retries_left -= 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn loopback_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });
        let a = TcpStream::connect(addr).await.unwrap();
        let b = accept.await.unwrap();
        (a, b)
    }

    #[tokio::test]
    async fn pipe_forwards_both_directions_until_close() {
        // `client_drive`/`client_leg` stand in for the client socket; the
        // relay owns `client_leg` and we drive the other end directly.
        let (mut client_drive, client_leg) = loopback_pair().await;
        let (mut remote_drive, remote_leg) = loopback_pair().await;

        let relay = tokio::spawn(pipe(client_leg, remote_leg));

        client_drive.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        remote_drive.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        remote_drive.write_all(b"pong").await.unwrap();
        let mut buf = [0u8; 4];
        client_drive.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");

        drop(client_drive);
        drop(remote_drive);

        let outcome = relay.await.unwrap();
        assert!(outcome.client_to_remote.is_none());
        assert!(outcome.remote_to_client.is_none());
    }
}
