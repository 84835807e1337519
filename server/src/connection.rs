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

//! Connection records and the shared handle the application holds.
//!
//! A [`ConnectionHandle`] is a counted reference to one connection. Cloning it retains the
//! record and dropping it releases; when the last handle goes away the record is torn
//! down exactly once: a final best-effort flush, `close_notify` for TLS, and the socket is
//! closed.
//!
//! The display identity sits behind its own small lock because worker threads may rewrite
//! it (delayed reverse DNS, PROXY headers) while the driver is logging. Buffers and the
//! transport are only driven from the event loop thread.

use crate::addr::{format_endpoint, host_name, is_localhost, protocol_name, reverse_lookup};
use crate::config::{KeepAlive, NetworkConfig};
use crate::error::{NetworkError, Result};
use crate::listener::ListenerInfo;
use crate::metrics::NetworkMetrics;
use crate::options::{
    BINARY, CLIENT_ECHO, ConnectionOptions, KEEP_ALIVE, OptionValue, apply_keep_alive,
    merge_keep_alive,
};
use crate::output::{EnqueueOutcome, OutputQueue};
use crate::poll::{Pollable, Registration, interest_for};
use crate::proxy::parse_proxy_header;
use crate::types::{ConnectionId, ConnectionState, Direction, ListenerId};
use bytes::Bytes;
use mio::{Registry, Token};
use mooring_linecodec::{InputMode, LineCodec, LineCodecError, OutputFrame, echo_command};
use mooring_transport::{Progress, SessionInfo, Transport, TransportKind, TransportResult};
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::os::fd::AsFd;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, instrument, trace, warn};

/// Where a connection's display identity comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Remote host name, or its numeric address
    pub name: String,
    /// Remote endpoint
    pub remote: SocketAddr,
    /// Local interface name
    pub source_name: String,
    /// Local endpoint
    pub local: SocketAddr,
}

/// Per-connection settings taken from the network configuration
#[derive(Debug, Clone, Copy)]
pub(crate) struct ConnectionSettings {
    pub name_lookup: bool,
    pub believe_eof: bool,
    pub max_queued_output: usize,
    pub max_line_bytes: usize,
    pub apply_backspace: bool,
    pub keep_alive: KeepAlive,
}

impl From<&NetworkConfig> for ConnectionSettings {
    fn from(config: &NetworkConfig) -> Self {
        Self {
            name_lookup: !config.no_name_lookup,
            believe_eof: config.believe_eof,
            max_queued_output: config.max_queued_output,
            max_line_bytes: config.max_line_bytes,
            apply_backspace: config.apply_backspace,
            keep_alive: config.default_keep_alive,
        }
    }
}

/// Everything needed to create a connection record
pub(crate) struct NewConnection {
    pub id: ConnectionId,
    pub token: Token,
    pub listener: Option<Arc<ListenerInfo>>,
    pub direction: Direction,
    pub transport: Box<dyn Transport>,
    pub identity: Identity,
    pub eol: Bytes,
    pub settings: ConnectionSettings,
    pub metrics: Arc<NetworkMetrics>,
}

/// Result of one input pump
#[derive(Debug, Default)]
pub(crate) struct InputPump {
    /// Lines and out-of-band blocks to hand to the application, in order
    pub events: Vec<(Bytes, bool)>,
    /// False when the connection has failed
    pub alive: bool,
}

struct IoState {
    transport: Box<dyn Transport>,
    codec: LineCodec,
    output: OutputQueue,
    options: ConnectionOptions,
    registration: Registration,
    read_pending: bool,
    write_blocked: bool,
    failed: bool,
}

impl IoState {
    fn flush(&mut self, metrics: &NetworkMetrics) -> TransportResult<bool> {
        let ciphertext_drained = self.transport.flush_pending()?;
        if !self.output.has_output() {
            self.write_blocked = !ciphertext_drained;
            return Ok(ciphertext_drained);
        }
        let report = self.output.flush(self.transport.as_mut())?;
        if report.written > 0 {
            metrics.bytes_written(report.written as u64);
        }
        self.write_blocked = !report.drained;
        Ok(report.drained)
    }
}

struct ConnectionInner {
    id: ConnectionId,
    listener: Option<Arc<ListenerInfo>>,
    direction: Direction,
    kind: TransportKind,
    settings: ConnectionSettings,
    identity: Mutex<Identity>,
    state: AtomicU8,
    input_suspended: AtomicBool,
    counted_active: AtomicBool,
    io: Mutex<IoState>,
    metrics: Arc<NetworkMetrics>,
}

impl Drop for ConnectionInner {
    fn drop(&mut self) {
        let io = self.io.get_mut().unwrap_or_else(PoisonError::into_inner);
        if !io.failed {
            if let Err(err) = io.flush(&self.metrics) {
                debug!(connection_id = %self.id, error = %err, "Final flush failed");
            }
        }
        io.output.clear();
        io.transport.shutdown();
        self.state
            .store(ConnectionState::Freed.as_u8(), Ordering::Release);
        self.metrics
            .connection_released(self.counted_active.load(Ordering::Relaxed));
        info!(connection_id = %self.id, "Connection released");
    }
}

/// Counted reference to a connection record
#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<ConnectionInner>,
}

impl ConnectionHandle {
    pub(crate) fn create(new: NewConnection) -> Self {
        let NewConnection {
            id,
            token,
            listener,
            direction,
            transport,
            identity,
            eol,
            settings,
            metrics,
        } = new;
        let kind = transport.kind();
        let state = if transport.is_established() {
            ConnectionState::Accepted
        } else {
            ConnectionState::Handshaking
        };
        let codec = LineCodec::new()
            .with_eol(eol.clone())
            .with_max_line_bytes(settings.max_line_bytes)
            .with_backspace(settings.apply_backspace);
        let io = IoState {
            transport,
            codec,
            output: OutputQueue::new(settings.max_queued_output, eol),
            options: ConnectionOptions::new(settings.keep_alive),
            registration: Registration::new(token),
            read_pending: true,
            write_blocked: false,
            failed: false,
        };
        if settings.keep_alive.enabled {
            if let Err(err) = apply_keep_alive(&io.transport.as_fd(), &settings.keep_alive) {
                warn!(connection_id = %id, error = %err, "Failed to enable keep-alive");
            }
        }
        Self {
            inner: Arc::new(ConnectionInner {
                id,
                listener,
                direction,
                kind,
                settings,
                identity: Mutex::new(identity),
                state: AtomicU8::new(state.as_u8()),
                input_suspended: AtomicBool::new(false),
                counted_active: AtomicBool::new(false),
                io: Mutex::new(io),
                metrics,
            }),
        }
    }

    fn io(&self) -> MutexGuard<'_, IoState> {
        self.inner.io.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn identity(&self) -> MutexGuard<'_, Identity> {
        self.inner
            .identity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Connection identifier
    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    /// Take another reference
    pub fn retain(&self) -> Self {
        self.clone()
    }

    /// Give up this reference; the last release tears the connection down
    pub fn release(self) {
        drop(self);
    }

    /// Number of live references
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ConnectionState) {
        self.inner.state.store(state.as_u8(), Ordering::Release);
    }

    /// Whether the connection has been closed or has failed
    pub fn is_closing(&self) -> bool {
        self.state().is_terminal()
    }

    /// Stop all further I/O. Queued output is still flushed on a best-effort basis when
    /// the record is released.
    pub fn close(&self) {
        if !self.is_closing() {
            debug!(connection_id = %self.inner.id, "Connection closed by application");
            self.set_state(ConnectionState::Closing);
        }
    }

    pub(crate) fn mark_counted(&self) {
        self.inner.counted_active.store(true, Ordering::Relaxed);
    }

    fn fail(&self, io: &mut IoState) {
        io.failed = true;
        self.set_state(ConnectionState::Closing);
    }

    /// Inbound or outbound
    pub fn direction(&self) -> Direction {
        self.inner.direction
    }

    /// Whether the connection was opened by this process
    pub fn is_outbound(&self) -> bool {
        self.inner.direction == Direction::Outbound
    }

    /// Listener the connection arrived on
    pub fn listener_id(&self) -> Option<ListenerId> {
        self.inner.listener.as_ref().map(|info| info.id)
    }

    // ========================================================================
    // Identity
    // ========================================================================

    /// Remote host name
    pub fn name(&self) -> String {
        self.identity().name.clone()
    }

    /// Remote numeric address
    pub fn ip_address(&self) -> String {
        self.identity().remote.ip().to_string()
    }

    /// Remote port
    pub fn port(&self) -> u16 {
        self.identity().remote.port()
    }

    /// Local interface name
    pub fn source_name(&self) -> String {
        self.identity().source_name.clone()
    }

    /// Local numeric address
    pub fn source_ip_address(&self) -> String {
        self.identity().local.ip().to_string()
    }

    /// Local port
    pub fn source_port(&self) -> u16 {
        self.identity().local.port()
    }

    /// `"IPv4"` or `"IPv6"`
    pub fn protocol(&self) -> &'static str {
        protocol_name(self.identity().remote.ip())
    }

    /// Whether the peer is the loopback address
    pub fn is_localhost(&self) -> bool {
        is_localhost(self.identity().remote.ip())
    }

    /// Snapshot of the whole identity
    pub fn identity_snapshot(&self) -> Identity {
        self.identity().clone()
    }

    /// Human readable description of both endpoints
    pub fn full_name(&self, legacy: bool) -> String {
        let identity = self.identity();
        let remote = format_endpoint(&identity.name, identity.remote.ip(), identity.remote.port());
        let preposition = self.inner.direction.preposition();
        if legacy {
            format!("port {} {} {}", identity.local.port(), preposition, remote)
        } else {
            let local = format_endpoint(
                &identity.source_name,
                identity.local.ip(),
                identity.local.port(),
            );
            format!("{} {} {}", local, preposition, remote)
        }
    }

    /// Replace the remote host name, typically with a delayed DNS result
    pub fn rewrite_name(&self, name: impl Into<String>) {
        let name = name.into();
        let mut identity = self.identity();
        info!(
            connection_id = %self.inner.id,
            old = %identity.name,
            new = %name,
            "Connection name changed"
        );
        identity.name = name;
    }

    /// Reverse-resolve the remote address again, keeping the current name when nothing is
    /// found. May block; meant for worker threads.
    pub fn lookup_name(&self) -> String {
        let ip = self.identity().remote.ip();
        let resolved = reverse_lookup(ip);
        let mut identity = self.identity();
        if let Some(name) = resolved {
            identity.name = name;
        }
        identity.name.clone()
    }

    /// Adopt the client endpoint announced by a PROXY header from a trusted peer
    #[instrument(skip(self, header), fields(connection_id = %self.inner.id))]
    pub fn apply_proxy_header(&self, header: &[u8]) -> Result<()> {
        let peer = self.identity().remote.ip();
        let trusted = self
            .inner
            .listener
            .as_ref()
            .is_some_and(|listener| listener.trusts(peer));
        if !trusted {
            warn!(%peer, "PROXY header from untrusted peer");
            return Err(NetworkError::UntrustedProxy(peer.to_string()));
        }
        let header = parse_proxy_header(header)?;
        let name = host_name(header.client.ip(), self.inner.settings.name_lookup);

        let mut identity = self.identity();
        info!(old = %identity.name, new = %name, client = %header.client, "Connection name changed by proxy");
        identity.name = name;
        identity.remote = header.client;
        identity.local.set_port(header.proxy.port());
        Ok(())
    }

    // ========================================================================
    // Output
    // ========================================================================

    /// Queue a line, appending the terminator. Older output is dropped on overflow.
    pub fn send_line(&self, line: impl Into<Bytes>) -> bool {
        self.enqueue(line.into(), true, true)
    }

    /// Queue raw bytes. Older output is dropped on overflow.
    pub fn send_bytes(&self, data: impl Into<Bytes>) -> bool {
        self.enqueue(data.into(), false, true)
    }

    /// Queue a block.
    ///
    /// When the block would exceed the output budget, queued data is flushed first. If
    /// that does not make room, older blocks are dropped when `allow_drop` is set;
    /// otherwise nothing is queued and false is returned.
    pub fn enqueue(&self, data: Bytes, terminate: bool, allow_drop: bool) -> bool {
        if self.is_closing() {
            return false;
        }
        let mut io = self.io();
        let block = io.codec.encode_block(OutputFrame::new(data, terminate));
        self.enqueue_locked(&mut io, block, allow_drop)
    }

    fn enqueue_locked(&self, io: &mut IoState, block: Bytes, allow_drop: bool) -> bool {
        if io.output.would_overflow(block.len()) && !io.output.is_empty() {
            if let Err(err) = io.flush(&self.inner.metrics) {
                warn!(connection_id = %self.inner.id, error = %err, "Write failed");
                self.inner.metrics.io_failure();
                self.fail(io);
                return false;
            }
        }
        let outcome = io.output.enqueue(block, allow_drop);
        let lost = outcome.lines_lost();
        if lost > 0 {
            debug!(connection_id = %self.inner.id, lost, "Output overflow");
            self.inner.metrics.output_dropped(lost);
        }
        if outcome == EnqueueOutcome::Refused {
            trace!(connection_id = %self.inner.id, "Output refused");
        }
        outcome.is_accepted()
    }

    /// Write as much queued output as the peer accepts. False means the connection failed.
    pub fn flush(&self) -> bool {
        let mut io = self.io();
        if io.failed {
            return false;
        }
        match io.flush(&self.inner.metrics) {
            Ok(_) => true,
            Err(err) => {
                warn!(connection_id = %self.inner.id, error = %err, "Write failed");
                self.inner.metrics.io_failure();
                self.fail(&mut io);
                false
            }
        }
    }

    /// Unwritten output bytes
    pub fn buffered_output_length(&self) -> usize {
        self.io().output.len()
    }

    /// Lines lost to overflow and not yet announced
    pub fn lines_flushed(&self) -> u64 {
        self.io().output.lines_flushed()
    }

    // ========================================================================
    // Input
    // ========================================================================

    /// Stop reading; partial input already buffered is kept
    pub fn suspend_input(&self) {
        self.inner.input_suspended.store(true, Ordering::Relaxed);
    }

    /// Start reading again
    pub fn resume_input(&self) {
        self.inner.input_suspended.store(false, Ordering::Relaxed);
        self.io().read_pending = true;
    }

    /// Whether reading is suspended
    pub fn is_input_suspended(&self) -> bool {
        self.inner.input_suspended.load(Ordering::Relaxed)
    }

    /// Switch between line framing and raw delivery
    pub fn set_binary(&self, binary: bool) {
        let mut io = self.io();
        io.options.binary = binary;
        io.codec.set_mode(if binary {
            InputMode::Binary
        } else {
            InputMode::Text
        });
    }

    /// Whether input is delivered raw
    pub fn is_binary(&self) -> bool {
        self.io().codec.mode() == InputMode::Binary
    }

    /// Read once and frame what arrived
    pub(crate) fn pump_input(&self, buf: &mut [u8]) -> InputPump {
        let mut pump = InputPump {
            events: Vec::new(),
            alive: true,
        };
        if self.is_closing() || self.is_input_suspended() {
            return pump;
        }
        let mut guard = self.io();
        let io = &mut *guard;
        io.read_pending = false;
        let handshaking = !io.transport.is_established();

        match io.transport.read(buf) {
            Ok(Progress::WouldBlock) => {}
            Ok(Progress::Transferred(0)) => {
                if self.inner.settings.believe_eof {
                    info!(connection_id = %self.inner.id, "Connection closed by peer");
                    pump.alive = false;
                }
            }
            Ok(Progress::Transferred(n)) => {
                self.inner.metrics.bytes_read(n as u64);
                io.read_pending = true;
                if let Err(err) = io.codec.feed(&buf[..n]) {
                    match err {
                        LineCodecError::LineTooLong { length, limit } => warn!(
                            connection_id = %self.inner.id,
                            length,
                            limit,
                            "Input line too long"
                        ),
                        other => warn!(connection_id = %self.inner.id, error = %other, "Input framing failed"),
                    }
                    pump.alive = false;
                }
            }
            Err(err) => {
                if handshaking {
                    warn!(connection_id = %self.inner.id, error = %err, "TLS handshake failed");
                    self.inner.metrics.handshake_failure();
                } else {
                    warn!(
                        connection_id = %self.inner.id,
                        error = %err,
                        peer_fault = err.is_peer_fault(),
                        "Read failed"
                    );
                    self.inner.metrics.io_failure();
                }
                pump.alive = false;
            }
        }

        if handshaking && io.transport.is_established() {
            self.set_state(ConnectionState::Established);
        }
        while let Some(event) = io.codec.next_event() {
            pump.events.push(event.into_parts());
        }
        if !pump.alive {
            self.fail(io);
        }
        pump
    }

    /// Mark a plain connection as established once it has been announced
    pub(crate) fn establish(&self) {
        if self.state() == ConnectionState::Accepted {
            self.set_state(ConnectionState::Established);
        }
    }

    /// Whether the driver should read even without a readiness event
    pub(crate) fn wants_read(&self) -> bool {
        if self.is_closing() || self.is_input_suspended() {
            return false;
        }
        let io = self.io();
        io.read_pending || io.transport.has_buffered_input()
    }

    /// Whether output should be attempted without a writable event
    pub(crate) fn wants_write(&self) -> bool {
        let io = self.io();
        !io.failed && !io.write_blocked && (io.output.has_output() || io.transport.wants_write())
    }

    /// A writable event arrived
    pub(crate) fn on_writable(&self) {
        self.io().write_blocked = false;
    }

    /// Flush on behalf of the driver. False means the connection failed.
    pub(crate) fn pump_output(&self) -> bool {
        if self.state() == ConnectionState::Closing {
            return !self.io().failed;
        }
        self.flush()
    }

    // ========================================================================
    // Options
    // ========================================================================

    /// Read an option
    pub fn get_option(&self, name: &str) -> Result<OptionValue> {
        self.io().options.get(name)
    }

    /// Every option with its current value
    pub fn list_options(&self) -> Vec<(&'static str, OptionValue)> {
        self.io().options.list()
    }

    /// Change an option
    #[instrument(skip(self), fields(connection_id = %self.inner.id))]
    pub fn set_option(&self, name: &str, value: OptionValue) -> Result<()> {
        let mut guard = self.io();
        let io = &mut *guard;
        match name {
            CLIENT_ECHO => {
                let enabled = flag(name, value)?;
                io.options.client_echo = enabled;
                let command = Bytes::copy_from_slice(&echo_command(enabled));
                self.enqueue_locked(io, command, true);
            }
            BINARY => {
                let enabled = flag(name, value)?;
                io.options.binary = enabled;
                io.codec.set_mode(if enabled {
                    InputMode::Binary
                } else {
                    InputMode::Text
                });
            }
            KEEP_ALIVE => {
                let merged = merge_keep_alive(io.options.keep_alive, value);
                apply_keep_alive(&io.transport.as_fd(), &merged)?;
                io.options.keep_alive = merged;
            }
            _ => return Err(NetworkError::UnknownOption(name.to_string())),
        }
        debug!(%value, "Connection option set");
        Ok(())
    }

    // ========================================================================
    // Transport
    // ========================================================================

    /// Whether the connection is encrypted
    pub fn is_tls(&self) -> bool {
        self.inner.kind == TransportKind::Tls
    }

    /// TLS session details, `None` for plain connections
    pub fn tls_info(&self) -> Option<SessionInfo> {
        self.io().transport.session_info()
    }
}

fn flag(name: &str, value: OptionValue) -> Result<bool> {
    match value {
        OptionValue::Bool(enabled) => Ok(enabled),
        OptionValue::KeepAlive(_) => Err(NetworkError::InvalidOptionValue {
            name: name.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}

impl Pollable for ConnectionHandle {
    fn token(&self) -> Token {
        self.io().registration.token()
    }

    fn sync_interest(&mut self, registry: &Registry) -> io::Result<()> {
        let closing = self.is_closing();
        let suspended = self.is_input_suspended();
        let mut guard = self.io();
        let io = &mut *guard;
        let desired = if closing {
            None
        } else {
            interest_for(
                !suspended,
                io.output.has_output() || io.transport.wants_write(),
            )
        };
        io.registration
            .sync(registry, io.transport.as_mut(), desired)
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        let mut guard = self.io();
        let io = &mut *guard;
        io.registration.clear(registry, io.transport.as_mut())
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .field("direction", &self.inner.direction)
            .field("refs", &self.ref_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedTransport, WriteStep};
    use mooring_transport::RetryPolicy;
    use std::sync::atomic::AtomicBool;
    use tracing_test::traced_test;

    fn identity() -> Identity {
        Identity {
            name: "client.example".to_string(),
            remote: "192.0.2.7:50000".parse().unwrap(),
            source_name: "mud.example".to_string(),
            local: "198.51.100.1:7777".parse().unwrap(),
        }
    }

    fn settings() -> ConnectionSettings {
        ConnectionSettings::from(&NetworkConfig::default().with_name_lookup(false))
    }

    fn connection_with(
        transport: ScriptedTransport,
        settings: ConnectionSettings,
        listener: Option<Arc<ListenerInfo>>,
        metrics: Arc<NetworkMetrics>,
    ) -> ConnectionHandle {
        ConnectionHandle::create(NewConnection {
            id: ConnectionId::new(1),
            token: Token(1),
            listener,
            direction: Direction::Inbound,
            transport: Box::new(transport),
            identity: identity(),
            eol: Bytes::from_static(b"\r\n"),
            settings,
            metrics,
        })
    }

    fn connection(transport: ScriptedTransport) -> ConnectionHandle {
        connection_with(transport, settings(), None, Arc::new(NetworkMetrics::new()))
    }

    fn small_budget() -> ConnectionSettings {
        ConnectionSettings::from(
            &NetworkConfig::default()
                .with_name_lookup(false)
                .with_max_queued_output(2048),
        )
    }

    fn is_closed(flag: &AtomicBool) -> bool {
        flag.load(Ordering::SeqCst)
    }

    // ============================================================================
    // Reference counting
    // ============================================================================

    #[test]
    fn test_create_yields_single_reference() {
        let conn = connection(ScriptedTransport::new(RetryPolicy::Any, []));
        assert_eq!(conn.ref_count(), 1);
        assert_eq!(conn.state(), ConnectionState::Accepted);
    }

    #[test]
    fn test_retain_twice_release_once_keeps_record() {
        let metrics = Arc::new(NetworkMetrics::new());
        let transport = ScriptedTransport::new(RetryPolicy::Any, []);
        let closed = transport.drop_flag();
        let conn = connection_with(transport, settings(), None, metrics.clone());

        let second = conn.retain();
        let third = conn.retain();
        assert_eq!(conn.ref_count(), 3);

        conn.release();
        assert_eq!(second.ref_count(), 2);
        assert_eq!(metrics.connections_released(), 0);
        assert!(!is_closed(&closed));

        second.release();
        assert_eq!(metrics.connections_released(), 0);
        assert!(!is_closed(&closed));

        third.release();
        assert_eq!(metrics.connections_released(), 1);
        assert!(is_closed(&closed));
    }

    #[test]
    #[traced_test]
    fn test_teardown_is_logged_once() {
        let conn = connection(ScriptedTransport::new(RetryPolicy::Any, []));
        let other = conn.retain();
        conn.release();
        assert!(!logs_contain("Connection released"));
        other.release();
        logs_assert(|lines: &[&str]| {
            match lines.iter().filter(|l| l.contains("Connection released")).count() {
                1 => Ok(()),
                n => Err(format!("expected one release log, saw {}", n)),
            }
        });
    }

    #[test]
    fn test_release_from_another_thread() {
        let metrics = Arc::new(NetworkMetrics::new());
        let conn = connection_with(
            ScriptedTransport::new(RetryPolicy::Any, []),
            settings(),
            None,
            metrics.clone(),
        );
        let worker = conn.retain();
        std::thread::spawn(move || {
            worker.rewrite_name("resolved.example");
            worker.release();
        })
        .join()
        .unwrap();
        assert_eq!(conn.name(), "resolved.example");
        assert_eq!(metrics.connections_released(), 0);
        drop(conn);
        assert_eq!(metrics.connections_released(), 1);
    }

    #[test]
    fn test_close_keeps_record_until_released() {
        let conn = connection(ScriptedTransport::new(RetryPolicy::Any, []));
        let other = conn.retain();
        conn.close();
        assert_eq!(other.state(), ConnectionState::Closing);
        assert!(!other.send_line("too late"));
        assert_eq!(other.ref_count(), 2);
    }

    // ============================================================================
    // Identity
    // ============================================================================

    #[test]
    fn test_full_name() {
        let conn = connection(ScriptedTransport::new(RetryPolicy::Any, []));
        assert_eq!(
            conn.full_name(false),
            "mud.example [198.51.100.1], port 7777 from client.example [192.0.2.7], port 50000"
        );
        assert_eq!(
            conn.full_name(true),
            "port 7777 from client.example [192.0.2.7], port 50000"
        );
        assert_eq!(conn.protocol(), "IPv4");
        assert!(!conn.is_localhost());
    }

    #[test]
    fn test_proxy_header_from_trusted_peer() {
        let listener = Arc::new(ListenerInfo {
            id: ListenerId::new(1),
            name: "mud.example".to_string(),
            local_addr: "198.51.100.1:7777".parse().unwrap(),
            eol: Bytes::from_static(b"\r\n"),
            trusted_proxies: vec!["192.0.2.7".parse().unwrap()],
        });
        let conn = connection_with(
            ScriptedTransport::new(RetryPolicy::Any, []),
            settings(),
            Some(listener),
            Arc::new(NetworkMetrics::new()),
        );
        conn.apply_proxy_header(b"PROXY TCP4 203.0.113.9 192.0.2.7 41000 8888")
            .unwrap();
        assert_eq!(conn.name(), "203.0.113.9");
        assert_eq!(conn.ip_address(), "203.0.113.9");
        assert_eq!(conn.port(), 41000);
        assert_eq!(conn.source_port(), 8888);
    }

    #[test]
    fn test_proxy_header_from_untrusted_peer() {
        let conn = connection(ScriptedTransport::new(RetryPolicy::Any, []));
        let err = conn
            .apply_proxy_header(b"PROXY TCP4 203.0.113.9 192.0.2.7 41000 8888")
            .unwrap_err();
        assert!(matches!(err, NetworkError::UntrustedProxy(_)));
        assert_eq!(conn.ip_address(), "192.0.2.7");
    }

    // ============================================================================
    // Output
    // ============================================================================

    #[test]
    fn test_send_line_appends_terminator() {
        let conn = connection(ScriptedTransport::new(RetryPolicy::Any, [WriteStep::Block]));
        assert!(conn.send_line("hello"));
        assert!(conn.send_bytes("raw"));
        assert_eq!(conn.buffered_output_length(), 10);
        assert!(conn.flush());
        assert_eq!(conn.buffered_output_length(), 10);
        assert!(conn.flush());
        assert_eq!(conn.buffered_output_length(), 0);
    }

    #[test]
    fn test_enqueue_flushes_before_dropping() {
        let conn = connection_with(
            ScriptedTransport::new(RetryPolicy::Any, []),
            small_budget(),
            None,
            Arc::new(NetworkMetrics::new()),
        );
        let line = Bytes::from(vec![b'a'; 1500]);
        assert!(conn.enqueue(line.clone(), false, false));
        assert!(conn.enqueue(line.clone(), false, false));
        assert_eq!(conn.buffered_output_length(), 1500);
        assert_eq!(conn.lines_flushed(), 0);
    }

    #[test]
    fn test_enqueue_without_drop_is_refused() {
        let conn = connection_with(
            ScriptedTransport::new(RetryPolicy::Any, std::iter::repeat_n(WriteStep::Block, 8)),
            small_budget(),
            None,
            Arc::new(NetworkMetrics::new()),
        );
        let line = Bytes::from(vec![b'a'; 1500]);
        assert!(conn.enqueue(line.clone(), false, false));
        assert!(!conn.enqueue(line.clone(), false, false));
        assert_eq!(conn.buffered_output_length(), 1500);
        assert!(conn.enqueue(line, false, true));
        assert_eq!(conn.lines_flushed(), 1);
    }

    #[test]
    fn test_failed_write_closes_connection() {
        let conn = connection(ScriptedTransport::new(RetryPolicy::Any, [WriteStep::Fail]));
        conn.send_line("doomed");
        assert!(!conn.flush());
        assert_eq!(conn.state(), ConnectionState::Closing);
    }

    // ============================================================================
    // Input
    // ============================================================================

    #[test]
    fn test_pump_input_frames_lines() {
        let mut transport = ScriptedTransport::new(RetryPolicy::Any, []);
        transport.push_input(b"look\r\n\xff\xfd\x01say hi\n");
        let conn = connection(transport);
        let mut buf = [0u8; 64];
        let pump = conn.pump_input(&mut buf);
        assert!(pump.alive);
        assert_eq!(
            pump.events,
            vec![
                (Bytes::from_static(b"look"), false),
                (Bytes::from_static(b"say hi"), false),
                (Bytes::from_static(b"\xff\xfd\x01"), true),
            ]
        );
        assert!(conn.wants_read());
        let pump = conn.pump_input(&mut buf);
        assert!(pump.events.is_empty());
        assert!(!conn.wants_read());
    }

    #[test]
    fn test_suspended_input_keeps_partial_line() {
        let mut transport = ScriptedTransport::new(RetryPolicy::Any, []);
        transport.push_input(b"partial");
        let conn = connection(transport);
        let mut buf = [0u8; 4];
        let pump = conn.pump_input(&mut buf);
        assert!(pump.events.is_empty());

        conn.suspend_input();
        assert!(!conn.wants_read());
        assert!(conn.pump_input(&mut buf).events.is_empty());

        conn.resume_input();
        assert!(conn.wants_read());
        conn.pump_input(&mut buf);
        assert!(conn.pump_input(&mut buf).events.is_empty());
    }

    #[test]
    fn test_overlong_line_fails_connection() {
        let mut settings = settings();
        settings.max_line_bytes = 8;
        let mut transport = ScriptedTransport::new(RetryPolicy::Any, []);
        transport.push_input(b"ok\nthis line never ends");
        let conn = connection_with(transport, settings, None, Arc::new(NetworkMetrics::new()));
        let mut buf = [0u8; 64];
        let pump = conn.pump_input(&mut buf);
        assert!(!pump.alive);
        assert_eq!(pump.events, vec![(Bytes::from_static(b"ok"), false)]);
        assert_eq!(conn.state(), ConnectionState::Closing);
    }

    #[test]
    fn test_binary_mode_passes_reads_through() {
        let mut transport = ScriptedTransport::new(RetryPolicy::Any, []);
        transport.push_input(b"\x00\xff\r\n");
        let conn = connection(transport);
        conn.set_binary(true);
        assert!(conn.is_binary());
        let mut buf = [0u8; 64];
        let pump = conn.pump_input(&mut buf);
        assert_eq!(pump.events, vec![(Bytes::from_static(b"\x00\xff\r\n"), false)]);
    }

    // ============================================================================
    // Options
    // ============================================================================

    #[test]
    fn test_client_echo_sends_negotiation() {
        let conn = connection(ScriptedTransport::new(RetryPolicy::Any, []));
        conn.set_option(CLIENT_ECHO, OptionValue::Bool(false)).unwrap();
        assert_eq!(conn.get_option(CLIENT_ECHO).unwrap(), OptionValue::Bool(false));
        assert_eq!(conn.buffered_output_length(), 3);
    }

    #[test]
    fn test_binary_option_switches_mode() {
        let conn = connection(ScriptedTransport::new(RetryPolicy::Any, []));
        conn.set_option(BINARY, true.into()).unwrap();
        assert!(conn.is_binary());
        let err = conn
            .set_option(BINARY, KeepAlive::default().into())
            .unwrap_err();
        assert!(matches!(err, NetworkError::InvalidOptionValue { .. }));
    }

    #[test]
    fn test_unknown_option_is_rejected() {
        let conn = connection(ScriptedTransport::new(RetryPolicy::Any, []));
        let err = conn.set_option("frobnicate", true.into()).unwrap_err();
        assert!(matches!(err, NetworkError::UnknownOption(_)));
        assert!(conn.get_option("frobnicate").is_err());
        assert_eq!(conn.list_options().len(), 3);
    }
}
