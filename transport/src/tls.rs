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

//! TLS transport on top of a non-blocking stream

use crate::plain::classify;
use crate::{
    Progress, RetryPolicy, SessionInfo, Transport, TransportError, TransportKind,
    TransportResult,
};
use mio::event::Source;
use mio::{Interest, Registry, Token};
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, IoState, ServerConfig, ServerConnection};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, BorrowedFd};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Either side of a TLS session
#[derive(Debug)]
enum TlsSession {
    Server(ServerConnection),
    Client(ClientConnection),
}

impl TlsSession {
    fn read_tls(&mut self, rd: &mut dyn Read) -> io::Result<usize> {
        match self {
            TlsSession::Server(conn) => conn.read_tls(rd),
            TlsSession::Client(conn) => conn.read_tls(rd),
        }
    }

    fn write_tls(&mut self, wr: &mut dyn Write) -> io::Result<usize> {
        match self {
            TlsSession::Server(conn) => conn.write_tls(wr),
            TlsSession::Client(conn) => conn.write_tls(wr),
        }
    }

    fn process_new_packets(&mut self) -> Result<IoState, rustls::Error> {
        match self {
            TlsSession::Server(conn) => conn.process_new_packets(),
            TlsSession::Client(conn) => conn.process_new_packets(),
        }
    }

    fn wants_write(&self) -> bool {
        match self {
            TlsSession::Server(conn) => conn.wants_write(),
            TlsSession::Client(conn) => conn.wants_write(),
        }
    }

    fn is_handshaking(&self) -> bool {
        match self {
            TlsSession::Server(conn) => conn.is_handshaking(),
            TlsSession::Client(conn) => conn.is_handshaking(),
        }
    }

    fn read_plaintext(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            TlsSession::Server(conn) => conn.reader().read(buf),
            TlsSession::Client(conn) => conn.reader().read(buf),
        }
    }

    fn write_plaintext(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            TlsSession::Server(conn) => conn.writer().write(buf),
            TlsSession::Client(conn) => conn.writer().write(buf),
        }
    }

    fn send_close_notify(&mut self) {
        match self {
            TlsSession::Server(conn) => conn.send_close_notify(),
            TlsSession::Client(conn) => conn.send_close_notify(),
        }
    }

    fn info(&self) -> SessionInfo {
        let (version, suite) = match self {
            TlsSession::Server(conn) => (conn.protocol_version(), conn.negotiated_cipher_suite()),
            TlsSession::Client(conn) => (conn.protocol_version(), conn.negotiated_cipher_suite()),
        };
        SessionInfo {
            established: !self.is_handshaking(),
            protocol_version: version.map(|v| format!("{:?}", v)),
            cipher_suite: suite.map(|s| format!("{:?}", s.suite())),
            server_name: match self {
                TlsSession::Server(conn) => conn.server_name().map(str::to_string),
                TlsSession::Client(_) => None,
            },
        }
    }
}

/// Fingerprint of a write that was refused and must be offered again unchanged
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct RetryGuard {
    len: usize,
    digest: u64,
}

impl RetryGuard {
    fn of(buf: &[u8]) -> Self {
        let mut hasher = DefaultHasher::new();
        buf.hash(&mut hasher);
        Self {
            len: buf.len(),
            digest: hasher.finish(),
        }
    }

    fn check(&self, buf: &[u8]) -> TransportResult<()> {
        if *self == RetryGuard::of(buf) {
            Ok(())
        } else {
            Err(TransportError::RetryMismatch {
                expected_len: self.len,
                actual_len: buf.len(),
            })
        }
    }
}

/// TLS transport.
///
/// The handshake is advanced by [`Transport::read`], which reports
/// [`Progress::WouldBlock`] until it completes. A write that reports
/// [`Progress::WouldBlock`] must be retried with identical bytes; anything else is
/// rejected with [`TransportError::RetryMismatch`].
#[derive(Debug)]
pub struct TlsTransport<S> {
    stream: S,
    session: TlsSession,
    retry: Option<RetryGuard>,
    plaintext_pending: usize,
    socket_drained: bool,
    announced: bool,
}

impl<S> TlsTransport<S>
where
    S: Read + Write,
{
    /// Accept a TLS session on an accepted stream
    pub fn server(stream: S, config: Arc<ServerConfig>) -> TransportResult<Self> {
        let conn = ServerConnection::new(config)?;
        Ok(Self::with_session(stream, TlsSession::Server(conn)))
    }

    /// Start a TLS session on an outbound stream, verifying the peer as `server_name`
    pub fn client(stream: S, config: Arc<ClientConfig>, server_name: &str) -> TransportResult<Self> {
        let name = ServerName::try_from(server_name.to_string())
            .map_err(|_| TransportError::InvalidServerName(server_name.to_string()))?;
        let conn = ClientConnection::new(config, name)?;
        Ok(Self::with_session(stream, TlsSession::Client(conn)))
    }

    fn with_session(stream: S, session: TlsSession) -> Self {
        Self {
            stream,
            session,
            retry: None,
            plaintext_pending: 0,
            socket_drained: true,
            announced: false,
        }
    }

    /// Underlying stream
    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    /// Whether a refused write is waiting to be retried
    pub fn has_pending_retry(&self) -> bool {
        self.retry.is_some()
    }

    /// Write queued ciphertext. Returns `true` once nothing is left.
    fn write_pending(&mut self) -> TransportResult<bool> {
        while self.session.wants_write() {
            match self.session.write_tls(&mut self.stream) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                Ok(n) => trace!(len = n, "wrote ciphertext"),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Ok(true)
    }

    /// Feed socket bytes to the session. `Ok(false)` means the socket had nothing.
    fn pull_records(&mut self) -> TransportResult<Option<bool>> {
        match self.session.read_tls(&mut self.stream) {
            Ok(0) => Ok(None),
            Ok(_) => {
                match self.session.process_new_packets() {
                    Ok(state) => self.plaintext_pending = state.plaintext_bytes_to_read(),
                    Err(err) => {
                        // Let the peer see the alert before we give up.
                        let _ = self.write_pending();
                        return Err(err.into());
                    }
                }
                Ok(Some(true))
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                self.socket_drained = true;
                Ok(Some(false))
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => Ok(Some(true)),
            Err(err) => Err(err.into()),
        }
    }

    fn handshake_step(&mut self) -> TransportResult<Progress> {
        self.write_pending()?;
        while self.session.is_handshaking() {
            match self.pull_records()? {
                None => {
                    return Err(TransportError::HandshakeFailed(
                        "peer closed the connection during the handshake".to_string(),
                    ));
                }
                Some(false) => break,
                Some(true) => {}
            }
        }
        self.write_pending()?;
        if !self.session.is_handshaking() {
            // Records after the final flight may still be sitting in the socket.
            self.socket_drained = false;
            self.announce();
        }
        Ok(Progress::WouldBlock)
    }

    fn announce(&mut self) {
        if !self.announced {
            self.announced = true;
            let info = self.session.info();
            info!(
                protocol = info.protocol_version.as_deref().unwrap_or("unknown"),
                cipher = info.cipher_suite.as_deref().unwrap_or("unknown"),
                "TLS handshake completed"
            );
        }
    }

    fn take_plaintext(&mut self, buf: &mut [u8]) -> TransportResult<Option<Progress>> {
        match self.session.read_plaintext(buf) {
            Ok(n) => {
                self.plaintext_pending = self.plaintext_pending.saturating_sub(n);
                Ok(Some(Progress::Transferred(n)))
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

impl<S> Transport for TlsTransport<S>
where
    S: Read + Write + Source + AsFd + Send + std::fmt::Debug,
{
    fn kind(&self) -> TransportKind {
        TransportKind::Tls
    }

    fn read(&mut self, buf: &mut [u8]) -> TransportResult<Progress> {
        if self.session.is_handshaking() {
            return self.handshake_step();
        }
        self.announce();
        loop {
            if let Some(progress) = self.take_plaintext(buf)? {
                if progress.is_eof() {
                    debug!("TLS peer sent close_notify");
                }
                return Ok(progress);
            }
            match self.pull_records()? {
                None => return Ok(Progress::Transferred(0)),
                Some(false) => return Ok(Progress::WouldBlock),
                Some(true) => {}
            }
            if self.session.wants_write() {
                self.write_pending()?;
            }
        }
    }

    fn write(&mut self, buf: &[u8]) -> TransportResult<Progress> {
        if let Some(guard) = &self.retry {
            guard.check(buf)?;
        }
        if self.session.is_handshaking() || !self.write_pending()? {
            self.retry = Some(RetryGuard::of(buf));
            return Ok(Progress::WouldBlock);
        }
        let accepted = self.session.write_plaintext(buf)?;
        if accepted == 0 && !buf.is_empty() {
            self.retry = Some(RetryGuard::of(buf));
            return Ok(Progress::WouldBlock);
        }
        self.retry = None;
        self.write_pending()?;
        Ok(Progress::Transferred(accepted))
    }

    fn is_established(&self) -> bool {
        !self.session.is_handshaking()
    }

    fn wants_write(&self) -> bool {
        self.session.wants_write()
    }

    fn flush_pending(&mut self) -> TransportResult<bool> {
        self.write_pending()
    }

    fn has_buffered_input(&self) -> bool {
        self.plaintext_pending > 0 || (!self.session.is_handshaking() && !self.socket_drained)
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::Identical
    }

    fn session_info(&self) -> Option<SessionInfo> {
        Some(self.session.info())
    }

    fn shutdown(&mut self) {
        self.session.send_close_notify();
        if let Err(err) = self.write_pending() {
            warn!(error = %err, "Failed to flush TLS close_notify");
        }
    }
}

impl<S: AsFd> AsFd for TlsTransport<S> {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.stream.as_fd()
    }
}

impl<S: Source> Source for TlsTransport<S> {
    fn register(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        self.stream.register(registry, token, interests)
    }

    fn reregister(
        &mut self,
        registry: &Registry,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        self.stream.reregister(registry, token, interests)
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        self.stream.deregister(registry)
    }
}
