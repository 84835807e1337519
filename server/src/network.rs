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

//! The event loop driver.
//!
//! [`Network`] owns every listener, connection and external descriptor registration and
//! services them from [`Network::process`], one readiness pass per call:
//!
//! 1. Connections that were closed since the last pass are released.
//! 2. Interest is brought up to date for every source; when a connection already has
//!    input waiting (a read made progress last pass, or TLS holds decrypted bytes) the
//!    wait uses a zero timeout, as does queued output that is not waiting on the peer.
//! 3. Ready listeners accept until the backlog is empty, refusing connections through a
//!    pocket descriptor when the descriptor table is full.
//! 4. Each connection, in creation order, reads once and then flushes output.
//! 5. Ready external descriptors get their callbacks.
//! 6. Failed connections held only by the network are released.

use crate::addr::{host_name, resolve};
use crate::config::{ListenerConfig, NetworkConfig, OutboundConfig};
use crate::connection::{ConnectionHandle, ConnectionSettings, Identity, NewConnection};
use crate::error::{NetworkError, Result};
use crate::handler::NetworkHandler;
use crate::listener::{AcceptOutcome, Listener};
use crate::metrics::NetworkMetrics;
use crate::pocket::PocketPool;
use crate::poll::Pollable;
use crate::registry::{FdCallback, FdDisposition, FdRegistration};
use crate::types::{ConnectionId, Direction, ListenerId};
use bytes::Bytes;
use mio::net::TcpStream;
use mio::{Events, Poll, Token};
use mooring_transport::{PlainTransport, TlsTransport, Transport, client_config};
use socket2::{Domain, Protocol, Socket, Type};
use std::collections::{BTreeMap, HashMap};
use std::io;
use std::net::SocketAddr;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, trace, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Slot {
    Listener(ListenerId),
    Connection(ConnectionId),
    Fd(RawFd),
}

struct ListenerSlot<T> {
    listener: Listener,
    tag: T,
    accept_pending: bool,
}

struct ConnectionSlot<S> {
    handle: ConnectionHandle,
    session: Option<S>,
}

#[derive(Clone, Copy, Debug, Default)]
struct Readiness {
    readable: bool,
    writable: bool,
}

/// The connection multiplexer
pub struct Network<H: NetworkHandler> {
    config: NetworkConfig,
    settings: ConnectionSettings,
    poll: Poll,
    events: Events,
    metrics: Arc<NetworkMetrics>,
    pocket: PocketPool,
    listeners: BTreeMap<ListenerId, ListenerSlot<H::ListenerTag>>,
    connections: BTreeMap<ConnectionId, ConnectionSlot<H::Session>>,
    fds: BTreeMap<RawFd, FdRegistration>,
    tokens: HashMap<Token, Slot>,
    next_token: usize,
    next_listener: u64,
    next_connection: u64,
    read_buf: Vec<u8>,
}

impl<H: NetworkHandler> Network<H> {
    /// Create a network. Fails when the configuration is invalid or the pocket descriptors
    /// cannot be reserved.
    pub fn new(config: NetworkConfig) -> Result<Self> {
        config.validate().map_err(NetworkError::Config)?;
        let pocket = PocketPool::reserve(config.pocket_size)?;
        let poll = Poll::new()?;
        info!(
            max_queued_output = config.max_queued_output,
            pocket_size = config.pocket_size,
            "Network initialized"
        );
        Ok(Self {
            settings: ConnectionSettings::from(&config),
            events: Events::with_capacity(config.event_capacity),
            read_buf: vec![0; config.read_chunk_size],
            config,
            poll,
            metrics: Arc::new(NetworkMetrics::new()),
            pocket,
            listeners: BTreeMap::new(),
            connections: BTreeMap::new(),
            fds: BTreeMap::new(),
            tokens: HashMap::new(),
            next_token: 0,
            next_listener: 1,
            next_connection: 1,
        })
    }

    fn allocate_token(&mut self, slot: Slot) -> Token {
        let token = Token(self.next_token);
        self.next_token += 1;
        self.tokens.insert(token, slot);
        token
    }

    /// Configuration in effect
    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// Shared counters
    pub fn metrics(&self) -> Arc<NetworkMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Open connections, including ones waiting to be released
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Bound listeners
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Pocket descriptors currently held
    pub fn pocket_available(&self) -> usize {
        self.pocket.available()
    }

    // ========================================================================
    // Listeners
    // ========================================================================

    /// Bind a listener. Connections it accepts are announced with `tag`.
    #[instrument(skip(self, tag, config), fields(port = config.port))]
    pub fn make_listener(&mut self, tag: H::ListenerTag, config: ListenerConfig) -> Result<ListenerId> {
        let id = ListenerId::new(self.next_listener);
        self.next_listener += 1;
        let token = Token(self.next_token);
        let listener = Listener::bind(id, token, &config, self.settings.name_lookup)?;
        self.allocate_token(Slot::Listener(id));
        self.listeners.insert(
            id,
            ListenerSlot {
                listener,
                tag,
                accept_pending: false,
            },
        );
        Ok(id)
    }

    /// A bound listener
    pub fn listener(&self, id: ListenerId) -> Option<&Listener> {
        self.listeners.get(&id).map(|slot| &slot.listener)
    }

    /// Stop listening. Connections it accepted stay open.
    pub fn close_listener(&mut self, id: ListenerId) -> Result<()> {
        let mut slot = self
            .listeners
            .remove(&id)
            .ok_or(NetworkError::ListenerNotFound(id))?;
        self.tokens.remove(&slot.listener.token());
        if let Err(err) = slot.listener.deregister(self.poll.registry()) {
            debug!(listener_id = %id, error = %err, "Listener deregistration failed");
        }
        info!(listener_id = %id, "Listener closed");
        Ok(())
    }

    // ========================================================================
    // Connections
    // ========================================================================

    /// The network's own reference to a connection
    pub fn connection(&self, id: ConnectionId) -> Option<&ConnectionHandle> {
        self.connections.get(&id).map(|slot| &slot.handle)
    }

    /// A new reference to a connection
    pub fn retain(&self, id: ConnectionId) -> Option<ConnectionHandle> {
        self.connection(id).map(ConnectionHandle::retain)
    }

    fn lookup(&self, id: ConnectionId) -> Option<&ConnectionHandle> {
        let found = self.connection(id);
        debug_assert!(found.is_some(), "no such connection: {}", id);
        found
    }

    /// Queue a line for a connection
    pub fn send_line(&self, id: ConnectionId, line: impl Into<Bytes>) -> bool {
        self.lookup(id).is_some_and(|handle| handle.send_line(line))
    }

    /// Queue raw bytes for a connection
    pub fn send_bytes(&self, id: ConnectionId, data: impl Into<Bytes>) -> bool {
        self.lookup(id).is_some_and(|handle| handle.send_bytes(data))
    }

    /// Close a connection; it is released on the next pass
    pub fn close(&self, id: ConnectionId) -> Result<()> {
        let handle = self
            .connection(id)
            .ok_or(NetworkError::ConnectionNotFound(id))?;
        handle.close();
        Ok(())
    }

    /// Connect out and announce the connection with `tag`
    #[instrument(skip(self, handler, tag, target), fields(host = %target.host, port = target.port))]
    pub fn open_connection(
        &mut self,
        handler: &mut H,
        tag: H::ListenerTag,
        target: OutboundConfig,
    ) -> Result<ConnectionId> {
        if !self.config.outbound_enabled {
            return Err(NetworkError::OutboundDisabled);
        }
        let addr = resolve(Some(&target.host), target.port, target.ipv6)?;
        let stream = self.connect(addr, target.bind_interface.as_deref())?;
        let local = stream.local_addr()?;

        let transport: Box<dyn Transport> = match &target.tls {
            Some(tls) => {
                let client = client_config(tls.ca_path.as_deref())?;
                let server_name = tls.server_name.as_deref().unwrap_or(&target.host);
                Box::new(TlsTransport::client(stream, client, server_name)?)
            }
            None => Box::new(PlainTransport::new(stream)),
        };
        let identity = Identity {
            name: target.host.clone(),
            remote: addr,
            source_name: target
                .bind_interface
                .clone()
                .unwrap_or_else(|| local.ip().to_string()),
            local,
        };

        let id = ConnectionId::new(self.next_connection);
        self.next_connection += 1;
        let token = self.allocate_token(Slot::Connection(id));
        let handle = ConnectionHandle::create(NewConnection {
            id,
            token,
            listener: None,
            direction: Direction::Outbound,
            transport,
            identity,
            eol: target.eol.clone(),
            settings: self.settings,
            metrics: Arc::clone(&self.metrics),
        });
        handle.mark_counted();
        handle.establish();
        self.metrics.connection_opened();
        info!(connection_id = %id, name = %handle.full_name(false), "Connection opened");

        let session = handler.new_connection(&tag, &handle, true);
        self.connections.insert(
            id,
            ConnectionSlot {
                handle,
                session: Some(session),
            },
        );
        Ok(id)
    }

    fn connect(&self, addr: SocketAddr, bind_interface: Option<&str>) -> Result<TcpStream> {
        let domain = match addr {
            SocketAddr::V4(_) => Domain::IPV4,
            SocketAddr::V6(_) => Domain::IPV6,
        };
        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
        if let Some(interface) = bind_interface {
            let local = resolve(Some(interface), 0, addr.is_ipv6())?;
            socket.bind(&local.into())?;
        }
        socket
            .connect_timeout(&addr.into(), self.config.outbound_connect_timeout)
            .map_err(|err| match err.kind() {
                io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => {
                    NetworkError::ConnectTimeout(addr)
                }
                _ => NetworkError::Io(err),
            })?;
        socket.set_nonblocking(true)?;
        socket.set_nodelay(true)?;
        Ok(TcpStream::from_std(socket.into()))
    }

    // ========================================================================
    // External descriptors
    // ========================================================================

    /// Watch a descriptor owned elsewhere. Registering a descriptor again replaces the
    /// previous registration.
    pub fn register_fd(
        &mut self,
        fd: RawFd,
        on_readable: Option<FdCallback>,
        on_writable: Option<FdCallback>,
    ) {
        self.unregister_fd(fd);
        let token = self.allocate_token(Slot::Fd(fd));
        self.fds
            .insert(fd, FdRegistration::new(fd, token, on_readable, on_writable));
        debug!(fd, "Descriptor registered");
    }

    /// Stop watching a descriptor. Returns false when it was not registered.
    pub fn unregister_fd(&mut self, fd: RawFd) -> bool {
        let Some(mut registration) = self.fds.remove(&fd) else {
            return false;
        };
        self.tokens.remove(&registration.token());
        if let Err(err) = registration.deregister(self.poll.registry()) {
            debug!(fd, error = %err, "Descriptor deregistration failed");
        }
        debug!(fd, "Descriptor unregistered");
        true
    }

    // ========================================================================
    // Event loop
    // ========================================================================

    /// Run one readiness pass, waiting up to `timeout` (forever when `None`).
    ///
    /// Returns false only when the wait ran out with nothing to do.
    pub fn process(&mut self, handler: &mut H, timeout: Option<Duration>) -> Result<bool> {
        self.metrics.pass();
        self.reap(handler);

        let immediate = self.sync_interest();
        let wait = if immediate {
            Some(Duration::ZERO)
        } else {
            timeout
        };
        match self.poll.poll(&mut self.events, wait) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::Interrupted => return Ok(false),
            Err(err) => return Err(err.into()),
        }

        let mut listeners = Vec::new();
        let mut connections: BTreeMap<ConnectionId, Readiness> = BTreeMap::new();
        let mut fds: BTreeMap<RawFd, Readiness> = BTreeMap::new();
        for event in self.events.iter() {
            let readiness = Readiness {
                readable: event.is_readable() || event.is_read_closed() || event.is_error(),
                writable: event.is_writable() || event.is_write_closed(),
            };
            match self.tokens.get(&event.token()) {
                Some(Slot::Listener(id)) => listeners.push(*id),
                Some(Slot::Connection(id)) => merge(connections.entry(*id).or_default(), readiness),
                Some(Slot::Fd(fd)) => merge(fds.entry(*fd).or_default(), readiness),
                None => trace!(token = event.token().0, "Event for a withdrawn source"),
            }
        }
        let did_work = immediate || !self.events.is_empty();

        for (id, slot) in &self.listeners {
            if slot.accept_pending && !listeners.contains(id) {
                listeners.push(*id);
            }
        }
        for id in listeners {
            self.accept_ready(handler, id);
        }

        let ids: Vec<ConnectionId> = self.connections.keys().copied().collect();
        for id in ids {
            let readiness = connections.get(&id).copied().unwrap_or_default();
            self.service(handler, id, readiness);
        }

        for (fd, readiness) in fds {
            let Some(registration) = self.fds.get_mut(&fd) else {
                continue;
            };
            if registration.dispatch(readiness.readable, readiness.writable)
                == FdDisposition::Unregister
            {
                self.unregister_fd(fd);
            }
        }

        self.reap(handler);
        Ok(did_work)
    }

    /// Push interest changes to the poller. Returns true when the wait must not block.
    fn sync_interest(&mut self) -> bool {
        let registry = self.poll.registry();
        let mut immediate = false;

        for (id, slot) in self.listeners.iter_mut() {
            if let Err(err) = slot.listener.sync_interest(registry) {
                error!(listener_id = %id, error = %err, "Failed to watch listener");
            }
        }
        for (id, slot) in self.connections.iter_mut() {
            if let Err(err) = slot.handle.sync_interest(registry) {
                warn!(connection_id = %id, error = %err, "Failed to watch connection");
                slot.handle.close();
                continue;
            }
            if slot.handle.wants_read() || slot.handle.wants_write() {
                immediate = true;
            }
        }
        let mut withdrawn = Vec::new();
        for (fd, registration) in self.fds.iter_mut() {
            if let Err(err) = registration.sync_interest(registry) {
                warn!(fd, error = %err, "Failed to watch descriptor");
                withdrawn.push(*fd);
            }
        }
        for fd in withdrawn {
            self.unregister_fd(fd);
        }
        immediate
    }

    fn accept_ready(&mut self, handler: &mut H, id: ListenerId) {
        loop {
            let Some(slot) = self.listeners.get_mut(&id) else {
                return;
            };
            match slot.listener.accept() {
                AcceptOutcome::Accepted(stream, peer) => {
                    slot.accept_pending = false;
                    self.admit(handler, id, stream, peer, false);
                }
                AcceptOutcome::WouldBlock => {
                    slot.accept_pending = false;
                    return;
                }
                AcceptOutcome::Exhausted => {
                    if !self.refuse_with_pocket(handler, id) {
                        return;
                    }
                }
                AcceptOutcome::Failed(err) => {
                    error!(listener_id = %id, error = %err, "Accept failed");
                    slot.accept_pending = true;
                    return;
                }
            }
        }
    }

    /// Free the pocket descriptors, accept the waiting connection into the freed slot and
    /// refuse it. Returns false when nothing could be accepted.
    fn refuse_with_pocket(&mut self, handler: &mut H, id: ListenerId) -> bool {
        let mut released = 0;
        while self.pocket.release_one() {
            released += 1;
        }
        let refused = if released == 0 {
            error!(listener_id = %id, "Descriptor table full and no pocket descriptors held");
            false
        } else {
            match self.listeners.get(&id).map(|slot| slot.listener.accept()) {
                Some(AcceptOutcome::Accepted(stream, peer)) => {
                    self.admit(handler, id, stream, peer, true);
                    true
                }
                Some(AcceptOutcome::WouldBlock) => {
                    if let Some(slot) = self.listeners.get_mut(&id) {
                        slot.accept_pending = false;
                    }
                    if let Err(err) = self.pocket.refill() {
                        error!(error = %err, "Pocket descriptors not restored");
                    }
                    return false;
                }
                _ => {
                    error!(listener_id = %id, "Cannot accept connection even after emptying pockets");
                    false
                }
            }
        };
        if let Err(err) = self.pocket.refill() {
            error!(error = %err, "Pocket descriptors not restored");
        }
        if let Some(slot) = self.listeners.get_mut(&id) {
            slot.accept_pending = !refused;
        }
        refused
    }

    fn admit(
        &mut self,
        handler: &mut H,
        listener_id: ListenerId,
        stream: TcpStream,
        peer: SocketAddr,
        refuse: bool,
    ) {
        let Some(slot) = self.listeners.get(&listener_id) else {
            return;
        };
        let info = Arc::clone(slot.listener.info());
        let tls = slot.listener.tls().cloned();
        let tag = slot.tag.clone();
        let local = stream.local_addr().unwrap_or(info.local_addr);

        let transport: Box<dyn Transport> = match tls {
            Some(config) => match TlsTransport::server(stream, config) {
                Ok(transport) => Box::new(transport),
                Err(err) => {
                    warn!(listener_id = %listener_id, %peer, error = %err, "TLS session setup failed");
                    self.metrics.handshake_failure();
                    return;
                }
            },
            None => Box::new(PlainTransport::new(stream)),
        };
        let identity = Identity {
            name: host_name(peer.ip(), self.settings.name_lookup),
            remote: peer,
            source_name: info.name.clone(),
            local,
        };
        let eol = info.eol.clone();

        let id = ConnectionId::new(self.next_connection);
        self.next_connection += 1;
        let token = if refuse {
            Token(usize::MAX)
        } else {
            self.allocate_token(Slot::Connection(id))
        };
        let handle = ConnectionHandle::create(NewConnection {
            id,
            token,
            listener: Some(info),
            direction: Direction::Inbound,
            transport,
            identity,
            eol,
            settings: self.settings,
            metrics: Arc::clone(&self.metrics),
        });

        if refuse {
            self.metrics.connection_refused();
            warn!(connection_id = %id, %peer, "Connection refused: descriptor table full");
            let notified = handle.retain();
            handler.refuse_connection(&tag, &notified);
            notified.release();
            handle.release();
            return;
        }

        handle.mark_counted();
        handle.establish();
        self.metrics.connection_accepted();
        info!(
            connection_id = %id,
            listener_id = %listener_id,
            name = %handle.full_name(false),
            "Connection accepted"
        );
        let session = handler.new_connection(&tag, &handle, false);
        self.connections.insert(
            id,
            ConnectionSlot {
                handle,
                session: Some(session),
            },
        );
    }

    /// Pump input then output for one connection
    fn service(&mut self, handler: &mut H, id: ConnectionId, readiness: Readiness) {
        let Some(slot) = self.connections.get_mut(&id) else {
            return;
        };
        let handle = slot.handle.retain();
        if readiness.writable {
            handle.on_writable();
        }

        if readiness.readable || handle.wants_read() {
            let pump = handle.pump_input(&mut self.read_buf);
            if let Some(session) = slot.session.as_mut() {
                for (data, out_of_band) in pump.events {
                    self.metrics.delivered(out_of_band);
                    handler.deliver(session, &handle, data, out_of_band);
                }
            }
            if !pump.alive {
                return;
            }
        }

        if !handle.is_closing() && (readiness.writable || handle.wants_write()) {
            handle.pump_output();
        }
    }

    /// Release closed connections that nobody else holds
    fn reap(&mut self, handler: &mut H) {
        let closing: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|(_, slot)| slot.handle.is_closing())
            .map(|(id, _)| *id)
            .collect();
        for id in closing {
            let held_elsewhere = self
                .connections
                .get(&id)
                .is_some_and(|slot| slot.handle.ref_count() > 1);
            if held_elsewhere {
                trace!(connection_id = %id, "Closed connection still referenced");
                continue;
            }
            if let Some(slot) = self.connections.remove(&id) {
                self.release(handler, slot);
            }
        }
    }

    fn release(&mut self, handler: &mut H, slot: ConnectionSlot<H::Session>) {
        let ConnectionSlot {
            mut handle,
            session,
        } = slot;
        self.tokens.remove(&handle.token());
        if let Err(err) = handle.deregister(self.poll.registry()) {
            debug!(connection_id = %handle.id(), error = %err, "Connection deregistration failed");
        }
        if let Some(session) = session {
            handler.connection_closed(session, &handle);
        }
        info!(connection_id = %handle.id(), "Connection closed");
        handle.release();
    }

    /// Close every connection and listener and drop all descriptor registrations
    pub fn shutdown(&mut self, handler: &mut H) {
        info!(
            connections = self.connections.len(),
            listeners = self.listeners.len(),
            "Network shutting down"
        );
        let connections = std::mem::take(&mut self.connections);
        for (_, slot) in connections {
            slot.handle.close();
            self.release(handler, slot);
        }
        let listeners: Vec<ListenerId> = self.listeners.keys().copied().collect();
        for id in listeners {
            let _ = self.close_listener(id);
        }
        let fds: Vec<RawFd> = self.fds.keys().copied().collect();
        for fd in fds {
            self.unregister_fd(fd);
        }
    }
}

fn merge(target: &mut Readiness, readiness: Readiness) {
    target.readable |= readiness.readable;
    target.writable |= readiness.writable;
}
