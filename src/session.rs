//! Per-connection session state machine (RFC 1928 §3–§6).
//!
//! One [`Session`] drives a single client TCP connection through method
//! selection, optional USER/PASS sub-negotiation (RFC 1929), request
//! parsing, and command dispatch. States: `AwaitVersion -> AwaitMethods ->
//! [AwaitUserPass ->] AwaitRequest -> Dispatch -> {ConnectRelay | BindRelay
//! | UdpHold} -> Closed`, driven sequentially by a single async function
//! rather than an explicit state enum, the way the teacher's original
//! `Socks5::authenticate` drove method selection and auth in one pass.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{info, warn};

use crate::auth::reply::{AuthReply, AuthStatus};
use crate::auth::request::AuthRequest;
use crate::conn::reply::{ConnReply, Rep};
use crate::conn::request::{CMD, ConnRequest};
use crate::error::SocksError;
use crate::msg::message::{MethodSelection, VersionMessage};
use crate::msg::method::{FixedMethod, Method};
use crate::parse::AddrPort;
use crate::server::{Server, TcpRequestHandle};
use crate::tcp::relay;
use crate::udp;

pub struct Session {
    id: u64,
    server: Arc<Server>,
    stream: TcpStream,
    client_addr: SocketAddr,
}

impl Session {
    pub fn new(id: u64, server: Arc<Server>, stream: TcpStream, client_addr: SocketAddr) -> Self {
        Self {
            id,
            server,
            stream,
            client_addr,
        }
    }

    /// Drives this session to completion. A protocol violation or I/O error
    /// ends the session but is not itself fatal to the server; the caller
    /// logs it and moves on.
    pub async fn run(mut self) -> Result<(), SocksError> {
        let methods = self.await_version().await?;

        let Some(selected) = self.select_method(&methods) else {
            self.send_method_selection(Method::Fixed(FixedMethod::NoAcceptable))
                .await?;
            return Ok(());
        };
        self.send_method_selection(selected).await?;

        if selected == Method::Fixed(FixedMethod::UsePass) && !self.await_userpass().await? {
            return Ok(());
        }

        let request = self.await_request().await?;
        self.dispatch(request).await
    }

    async fn await_version(&mut self) -> Result<Vec<Method>, SocksError> {
        let mut buf = [0u8; 512];
        let n = self.stream.read(&mut buf).await?;
        let version = VersionMessage::try_from(&buf[..n])?;
        Ok(version.methods)
    }

    fn select_method(&self, offered: &[Method]) -> Option<Method> {
        select_method(self.server.authenticator.as_ref(), offered)
    }

    async fn send_method_selection(&mut self, method: Method) -> Result<(), SocksError> {
        let sel = MethodSelection::new(method);
        self.stream.write_all(&sel.to_bytes()).await?;
        Ok(())
    }

    /// Runs the USER/PASS sub-negotiation (RFC 1929 §2). Returns `Ok(true)`
    /// if the client authenticated successfully, `Ok(false)` if credentials
    /// were rejected (the reply has already been sent and the connection
    /// should be closed).
    async fn await_userpass(&mut self) -> Result<bool, SocksError> {
        let mut buf = [0u8; 512];
        let n = self.stream.read(&mut buf).await?;
        let req = AuthRequest::try_from(&buf[..n])?;

        let ok = self.server.authenticator.authenticate(&req.uname, &req.passwd);
        let status = if ok { AuthStatus::Success } else { AuthStatus::Failure };
        self.stream
            .write_all(&AuthReply::new(status).to_bytes())
            .await?;

        if !ok {
            warn!(session_id = self.id, client_addr = %self.client_addr, user = %req.uname, "authentication rejected");
        }
        Ok(ok)
    }

    async fn await_request(&mut self) -> Result<ConnRequest, SocksError> {
        let mut buf = [0u8; 512];
        let n = self.stream.read(&mut buf).await?;
        ConnRequest::try_from(&buf[..n])
    }

    async fn dispatch(mut self, request: ConnRequest) -> Result<(), SocksError> {
        match request.cmd {
            CMD::Connect => self.handle_connect(request.dst).await,
            CMD::Bind => self.handle_bind(request.dst).await,
            CMD::UdpAssociate => self.handle_udp_associate().await,
            CMD::Other(byte) => self.handle_unsupported_command(byte).await,
        }
    }

    /// An unrecognized `CMD` byte (spec.md §4.3): reply REP=7 and close.
    async fn handle_unsupported_command(&mut self, cmd: u8) -> Result<(), SocksError> {
        warn!(session_id = self.id, client_addr = %self.client_addr, cmd, "unsupported command");
        self.send_reply(Rep::CommandNotSupported, unspecified_bnd()).await
    }

    async fn handle_connect(mut self, dst: AddrPort) -> Result<(), SocksError> {
        let outcome = relay::dial_connect(&dst).await;
        let remote = match outcome {
            Ok((remote, bnd)) => {
                self.send_reply(Rep::Succeeded, bnd).await?;
                remote
            }
            Err(err) => {
                self.send_reply(rep_for_dial_error(&err), unspecified_bnd())
                    .await?;
                return Err(err);
            }
        };

        register_tcp_request(&self.server, self.id, self.client_addr, &dst);
        info!(session_id = self.id, client_addr = %self.client_addr, target = %dst, "CONNECT established");

        let outcome = relay::pipe(self.stream, remote).await;
        unregister_tcp_request(&self.server, &dst);
        log_pipe_outcome(self.id, &self.client_addr, &outcome);
        Ok(())
    }

    async fn handle_bind(mut self, dst: AddrPort) -> Result<(), SocksError> {
        let (listener, first_bnd) = match relay::open_bind_listener().await {
            Ok(pair) => pair,
            Err(err) => {
                self.send_reply(Rep::GeneralFailure, unspecified_bnd())
                    .await?;
                return Err(err);
            }
        };
        self.send_reply(Rep::Succeeded, first_bnd).await?;

        let (peer, peer_bnd) = match relay::accept_bind_peer(listener).await {
            Ok(pair) => pair,
            Err(err) => {
                self.send_reply(Rep::GeneralFailure, unspecified_bnd())
                    .await?;
                return Err(err);
            }
        };
        self.send_reply(Rep::Succeeded, peer_bnd).await?;

        register_tcp_request(&self.server, self.id, self.client_addr, &dst);
        info!(session_id = self.id, client_addr = %self.client_addr, target = %dst, "BIND established");

        let outcome = relay::pipe(self.stream, peer).await;
        unregister_tcp_request(&self.server, &dst);
        log_pipe_outcome(self.id, &self.client_addr, &outcome);
        Ok(())
    }

    /// UDP ASSOCIATE (RFC 1928 §4, CMD=3): replies with the shared relay
    /// socket's address, then holds the control connection open. Per
    /// RFC 1928 §7, the association must be torn down once this TCP
    /// connection closes.
    async fn handle_udp_associate(&mut self) -> Result<(), SocksError> {
        let relay_addr = self.server.udp_relay_addr()?;
        self.send_reply(Rep::Succeeded, AddrPort::from_socket_addr(relay_addr))
            .await?;

        info!(session_id = self.id, client_addr = %self.client_addr, "UDP ASSOCIATE established");

        let mut buf = [0u8; 512];
        loop {
            match self.stream.read(&mut buf).await {
                Ok(0) => break,
                Ok(_) => continue,
                Err(err) => {
                    if crate::error::is_terminal_io_error(&err) {
                        break;
                    }
                    return Err(err.into());
                }
            }
        }

        udp::relay::remove_association(&self.server.udp_requests, &self.client_addr);
        Ok(())
    }

    async fn send_reply(&mut self, rep: Rep, bnd: AddrPort) -> Result<(), SocksError> {
        let atyp = bnd.atyp();
        let reply = ConnReply::new(0x05, rep, 0x00, atyp, bnd);
        self.stream.write_all(&reply.to_bytes()).await?;
        Ok(())
    }
}

fn register_tcp_request(server: &Server, id: u64, client_addr: SocketAddr, target: &AddrPort) {
    let handle = TcpRequestHandle {
        id,
        client_addr,
        target: target.clone(),
    };
    server
        .tcp_requests
        .lock()
        .unwrap()
        .insert(target.to_string(), handle);
}

fn unregister_tcp_request(server: &Server, target: &AddrPort) {
    server.tcp_requests.lock().unwrap().remove(&target.to_string());
}

/// Method selection policy (RFC 1928 §3, spec.md P2): iterate the
/// client-offered methods in order and return the first one that is
/// acceptable. USER/PASS is always acceptable; `NO AUTH` is acceptable only
/// when the authenticator does not mandate credentials.
fn select_method(authenticator: &dyn crate::config::Authenticator, offered: &[Method]) -> Option<Method> {
    offered.iter().copied().find(|method| match method {
        Method::Fixed(FixedMethod::UsePass) => true,
        Method::Fixed(FixedMethod::NoAuth) => !authenticator.has_auth(),
        _ => false,
    })
}

fn unspecified_bnd() -> AddrPort {
    AddrPort::V4(std::net::Ipv4Addr::UNSPECIFIED, 0)
}

/// Maps a dial failure to the closest RFC 1928 §6 `REP` code, mirroring the
/// mapping `original_source/tcp-handler.go`'s `HandleCONNECT` performs on the
/// Go `net.OpError` it gets back from `net.Dial`.
fn rep_for_dial_error(err: &SocksError) -> Rep {
    match err {
        SocksError::ResolveFailed(_) => Rep::HostUnreachable,
        SocksError::DialFailed(io_err) => match io_err.kind() {
            std::io::ErrorKind::ConnectionRefused => Rep::ConnectionRefused,
            std::io::ErrorKind::TimedOut => Rep::TTLExpired,
            _ => Rep::NetworkUnreachable,
        },
        _ => Rep::GeneralFailure,
    }
}

fn log_pipe_outcome(session_id: u64, client_addr: &SocketAddr, outcome: &relay::PipeOutcome) {
    if outcome.client_to_remote.is_some() || outcome.remote_to_client.is_some() {
        warn!(
            session_id,
            %client_addr,
            client_to_remote = ?outcome.client_to_remote,
            remote_to_client = ?outcome.remote_to_client,
            "relay ended with an error"
        );
    } else {
        info!(session_id, %client_addr, "relay closed cleanly");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StaticAuthenticator;
    use std::io;

    #[test]
    fn no_auth_server_selects_no_auth_when_offered() {
        let auth = StaticAuthenticator::no_auth();
        let offered = vec![Method::Fixed(FixedMethod::NoAuth)];
        assert_eq!(select_method(&auth, &offered), Some(Method::Fixed(FixedMethod::NoAuth)));
    }

    #[test]
    fn no_auth_server_rejects_when_only_userpass_and_client_lacks_it() {
        let auth = StaticAuthenticator::single("a", "b");
        let offered = vec![Method::Fixed(FixedMethod::NoAuth)];
        assert_eq!(select_method(&auth, &offered), None);
    }

    #[test]
    fn mandatory_auth_server_rejects_noauth_offer_even_when_first() {
        let auth = StaticAuthenticator::single("a", "b");
        let offered = vec![
            Method::Fixed(FixedMethod::NoAuth),
            Method::Fixed(FixedMethod::UsePass),
        ];
        assert_eq!(select_method(&auth, &offered), Some(Method::Fixed(FixedMethod::UsePass)));
    }

    #[test]
    fn no_auth_server_honors_client_order_over_userpass() {
        let auth = StaticAuthenticator::no_auth();
        let offered = vec![
            Method::Fixed(FixedMethod::NoAuth),
            Method::Fixed(FixedMethod::UsePass),
        ];
        assert_eq!(select_method(&auth, &offered), Some(Method::Fixed(FixedMethod::NoAuth)));
    }

    #[test]
    fn dial_error_mapping_uses_connection_refused() {
        let err = SocksError::DialFailed(io::Error::from(io::ErrorKind::ConnectionRefused));
        assert_eq!(rep_for_dial_error(&err), Rep::ConnectionRefused);
    }

    #[test]
    fn dial_error_mapping_falls_back_to_network_unreachable() {
        let err = SocksError::DialFailed(io::Error::from(io::ErrorKind::Other));
        assert_eq!(rep_for_dial_error(&err), Rep::NetworkUnreachable);
    }

    #[test]
    fn resolve_failure_maps_to_host_unreachable() {
        let err = SocksError::ResolveFailed("nx.example".into());
        assert_eq!(rep_for_dial_error(&err), Rep::HostUnreachable);
    }
}
