//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Listening sockets

use crate::addr::{host_name, resolve};
use crate::config::ListenerConfig;
use crate::error::{NetworkError, Result};
use crate::poll::{Pollable, Registration};
use crate::types::ListenerId;
use bytes::Bytes;
use mio::net::{TcpListener, TcpStream};
use mio::{Interest, Registry, Token};
use mooring_transport::ServerConfig;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Identity and settings a connection keeps from the listener that accepted it
#[derive(Debug)]
pub struct ListenerInfo {
    /// Listener identifier
    pub id: ListenerId,
    /// Bound interface name
    pub name: String,
    /// Bound address
    pub local_addr: SocketAddr,
    /// Terminator appended to output lines
    pub eol: Bytes,
    /// Peers allowed to rewrite their client address
    pub trusted_proxies: Vec<IpAddr>,
}

impl ListenerInfo {
    /// Whether `ip` may send a PROXY header
    pub fn trusts(&self, ip: IpAddr) -> bool {
        self.trusted_proxies.contains(&ip)
    }
}

/// Result of one accept attempt
#[derive(Debug)]
pub enum AcceptOutcome {
    /// A connection was accepted
    Accepted(TcpStream, SocketAddr),
    /// Nothing is waiting
    WouldBlock,
    /// The descriptor table is full
    Exhausted,
    /// Accept failed for another reason
    Failed(io::Error),
}

/// A bound, listening socket
#[derive(Debug)]
pub struct Listener {
    socket: TcpListener,
    info: Arc<ListenerInfo>,
    tls: Option<Arc<ServerConfig>>,
    registration: Registration,
}

impl Listener {
    /// Bind and listen according to `config`
    #[instrument(skip(config), fields(port = config.port))]
    pub fn bind(
        id: ListenerId,
        token: Token,
        config: &ListenerConfig,
        name_lookup: bool,
    ) -> Result<Self> {
        config.validate().map_err(NetworkError::Config)?;
        let tls = config
            .tls
            .as_ref()
            .map(|credentials| credentials.server_config())
            .transpose()?;

        let addr = resolve(config.interface.as_deref(), config.port, config.ipv6)?;
        let socket = bind_socket(addr, config)?;
        let local_addr = socket.local_addr()?;
        let name = match &config.interface {
            Some(interface) => interface.clone(),
            None if addr.ip().is_unspecified() => String::from("all interfaces"),
            None => host_name(addr.ip(), name_lookup),
        };

        info!(
            listener_id = %id,
            %local_addr,
            tls = tls.is_some(),
            "Listener bound"
        );

        Ok(Self {
            socket,
            info: Arc::new(ListenerInfo {
                id,
                name,
                local_addr,
                eol: config.eol.clone(),
                trusted_proxies: config.trusted_proxies.clone(),
            }),
            tls,
            registration: Registration::new(token),
        })
    }

    /// Listener identifier
    pub fn id(&self) -> ListenerId {
        self.info.id
    }

    /// Shared identity
    pub fn info(&self) -> &Arc<ListenerInfo> {
        &self.info
    }

    /// Bound address, with the real port when bound to port 0
    pub fn local_addr(&self) -> SocketAddr {
        self.info.local_addr
    }

    /// TLS settings for accepted connections
    pub fn tls(&self) -> Option<&Arc<ServerConfig>> {
        self.tls.as_ref()
    }

    /// Accept one pending connection
    pub fn accept(&self) -> AcceptOutcome {
        loop {
            match self.socket.accept() {
                Ok((stream, peer)) => {
                    if let Err(err) = stream.set_nodelay(true) {
                        warn!(listener_id = %self.info.id, %peer, error = %err, "Failed to set TCP_NODELAY");
                    }
                    return AcceptOutcome::Accepted(stream, peer);
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    return AcceptOutcome::WouldBlock;
                }
                Err(err)
                    if err.kind() == io::ErrorKind::Interrupted
                        || err.kind() == io::ErrorKind::ConnectionAborted =>
                {
                    continue;
                }
                Err(err) if is_exhaustion(&err) => return AcceptOutcome::Exhausted,
                Err(err) => return AcceptOutcome::Failed(err),
            }
        }
    }
}

impl Pollable for Listener {
    fn token(&self) -> Token {
        self.registration.token()
    }

    fn sync_interest(&mut self, registry: &Registry) -> io::Result<()> {
        self.registration
            .sync(registry, &mut self.socket, Some(Interest::READABLE))
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        self.registration.clear(registry, &mut self.socket)
    }
}

/// Whether an accept failed because no descriptor was available
pub fn is_exhaustion(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(libc::EMFILE) | Some(libc::ENFILE))
}

fn bind_socket(addr: SocketAddr, config: &ListenerConfig) -> Result<TcpListener> {
    let domain = match addr {
        SocketAddr::V4(_) => Domain::IPV4,
        SocketAddr::V6(_) => Domain::IPV6,
    };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    if addr.is_ipv6() {
        socket.set_only_v6(true)?;
    }
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into()).map_err(|err| match err.kind() {
        io::ErrorKind::PermissionDenied => NetworkError::PermissionDenied(addr),
        _ => NetworkError::Bind { addr, source: err },
    })?;
    socket.listen(config.backlog)?;
    Ok(TcpListener::from_std(socket.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpStream as StdTcpStream;
    use std::time::{Duration, Instant};

    fn loopback(port: u16) -> ListenerConfig {
        ListenerConfig::new(port).with_interface("127.0.0.1")
    }

    fn accept_within(listener: &Listener, timeout: Duration) -> AcceptOutcome {
        let deadline = Instant::now() + timeout;
        loop {
            match listener.accept() {
                AcceptOutcome::WouldBlock if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(5));
                }
                outcome => return outcome,
            }
        }
    }

    #[test]
    fn test_bind_ephemeral_port() {
        let listener = Listener::bind(ListenerId::new(1), Token(0), &loopback(0), false).unwrap();
        assert_ne!(listener.local_addr().port(), 0);
        assert_eq!(listener.info().name, "127.0.0.1");
        assert!(listener.tls().is_none());
    }

    #[test]
    fn test_bind_conflict() {
        let first = Listener::bind(ListenerId::new(1), Token(0), &loopback(0), false).unwrap();
        let port = first.local_addr().port();
        let err = Listener::bind(ListenerId::new(2), Token(1), &loopback(port), false).unwrap_err();
        assert!(matches!(err, NetworkError::Bind { .. }));
    }

    #[test]
    fn test_accept_would_block_then_accepts() {
        let listener = Listener::bind(ListenerId::new(1), Token(0), &loopback(0), false).unwrap();
        assert!(matches!(listener.accept(), AcceptOutcome::WouldBlock));

        let _client = StdTcpStream::connect(listener.local_addr()).unwrap();
        match accept_within(&listener, Duration::from_secs(2)) {
            AcceptOutcome::Accepted(_, peer) => assert!(peer.ip().is_loopback()),
            other => panic!("unexpected accept outcome: {:?}", other),
        }
    }

    #[test]
    fn test_trusted_proxies() {
        let listener = Listener::bind(
            ListenerId::new(1),
            Token(0),
            &loopback(0).with_trusted_proxy("10.0.0.1".parse().unwrap()),
            false,
        )
        .unwrap();
        assert!(listener.info().trusts("10.0.0.1".parse().unwrap()));
        assert!(!listener.info().trusts("10.0.0.2".parse().unwrap()));
    }

    #[test]
    fn test_is_exhaustion() {
        assert!(is_exhaustion(&io::Error::from_raw_os_error(libc::EMFILE)));
        assert!(is_exhaustion(&io::Error::from_raw_os_error(libc::ENFILE)));
        assert!(!is_exhaustion(&io::Error::from_raw_os_error(libc::ECONNRESET)));
    }
}
