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

//! Event loop behaviour over loopback TCP

use bytes::Bytes;
use mooring_server::{
    ConnectionHandle, ConnectionId, ConnectionState, FdDisposition, ListenerConfig, Network,
    NetworkConfig, NetworkError, NetworkHandler, OutboundConfig,
};
use std::cell::Cell;
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::rc::Rc;
use std::time::{Duration, Instant};

// ============================================================================
// Helpers
// ============================================================================

#[derive(Default)]
struct Recorder {
    welcome: Option<&'static str>,
    echo: bool,
    opened: Vec<(ConnectionId, &'static str, bool)>,
    refused: usize,
    delivered: Vec<(ConnectionId, Bytes, bool)>,
    closed: Vec<ConnectionId>,
}

impl Recorder {
    fn lines(&self, id: ConnectionId) -> Vec<Bytes> {
        self.delivered
            .iter()
            .filter(|(conn, _, oob)| *conn == id && !oob)
            .map(|(_, data, _)| data.clone())
            .collect()
    }
}

impl NetworkHandler for Recorder {
    type ListenerTag = &'static str;
    type Session = ConnectionId;

    fn new_connection(
        &mut self,
        listener: &&'static str,
        connection: &ConnectionHandle,
        outbound: bool,
    ) -> ConnectionId {
        self.opened.push((connection.id(), *listener, outbound));
        if let Some(welcome) = self.welcome {
            connection.send_line(welcome);
        }
        connection.id()
    }

    fn refuse_connection(&mut self, _listener: &&'static str, _connection: &ConnectionHandle) {
        self.refused += 1;
    }

    fn deliver(
        &mut self,
        session: &mut ConnectionId,
        connection: &ConnectionHandle,
        data: Bytes,
        out_of_band: bool,
    ) {
        if self.echo && !out_of_band {
            connection.send_line(data.clone());
        }
        self.delivered.push((*session, data, out_of_band));
    }

    fn connection_closed(&mut self, session: ConnectionId, _connection: &ConnectionHandle) {
        self.closed.push(session);
    }
}

fn network() -> Network<Recorder> {
    Network::new(NetworkConfig::default().with_name_lookup(false)).unwrap()
}

fn listen(network: &mut Network<Recorder>, tag: &'static str) -> SocketAddr {
    let id = network
        .make_listener(tag, ListenerConfig::new(0).with_interface("127.0.0.1"))
        .unwrap();
    network.listener(id).unwrap().local_addr()
}

fn drive_until(
    network: &mut Network<Recorder>,
    handler: &mut Recorder,
    mut done: impl FnMut(&Network<Recorder>, &Recorder) -> bool,
) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        network
            .process(handler, Some(Duration::from_millis(10)))
            .unwrap();
        if done(network, handler) {
            return;
        }
    }
    panic!("condition not reached before deadline");
}

fn drive(network: &mut Network<Recorder>, handler: &mut Recorder, passes: usize) {
    for _ in 0..passes {
        network
            .process(handler, Some(Duration::from_millis(5)))
            .unwrap();
    }
}

fn connect(network: &mut Network<Recorder>, handler: &mut Recorder, addr: SocketAddr) -> (TcpStream, ConnectionId) {
    let before = handler.opened.len();
    let client = TcpStream::connect(addr).unwrap();
    client.set_nonblocking(true).unwrap();
    drive_until(network, handler, |_, h| h.opened.len() > before);
    (client, handler.opened[before].0)
}

/// Read whatever the peer has sent; `None` once it closed
fn read_available(client: &mut TcpStream) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        match client.read(&mut buf) {
            Ok(0) => return if out.is_empty() { None } else { Some(out) },
            Ok(n) => out.extend_from_slice(&buf[..n]),
            Err(err) if err.kind() == ErrorKind::WouldBlock => return Some(out),
            Err(err) => panic!("read failed: {}", err),
        }
    }
}

// ============================================================================
// Input
// ============================================================================

#[test]
fn test_lines_across_reads_are_delivered_in_order() {
    let mut network = network();
    let mut handler = Recorder::default();
    let addr = listen(&mut network, "main");
    let (mut client, id) = connect(&mut network, &mut handler, addr);

    client.write_all(b"hello\r\n").unwrap();
    drive_until(&mut network, &mut handler, |_, h| h.lines(id).len() == 1);
    client.write_all(b"world\n").unwrap();
    drive_until(&mut network, &mut handler, |_, h| h.lines(id).len() == 2);
    assert_eq!(handler.lines(id), vec![Bytes::from("hello"), Bytes::from("world")]);

    client.write_all(b"\r\n").unwrap();
    drive_until(&mut network, &mut handler, |_, h| h.lines(id).len() >= 3);
    drive(&mut network, &mut handler, 3);
    assert_eq!(handler.lines(id).len(), 3);
    assert_eq!(handler.lines(id)[2], Bytes::new());
}

#[test]
fn test_out_of_band_follows_lines() {
    let mut network = network();
    let mut handler = Recorder::default();
    let addr = listen(&mut network, "main");
    let (mut client, id) = connect(&mut network, &mut handler, addr);

    client.write_all(b"a\xff\xfb\x18b\n").unwrap();
    drive_until(&mut network, &mut handler, |_, h| h.delivered.len() == 2);
    assert_eq!(
        handler.delivered,
        vec![
            (id, Bytes::from("ab"), false),
            (id, Bytes::from_static(b"\xff\xfb\x18"), true),
        ]
    );
    let snapshot = network.metrics().snapshot();
    assert_eq!(snapshot.lines_delivered, 1);
    assert_eq!(snapshot.out_of_band_delivered, 1);
}

#[test]
fn test_suspended_input_is_held_until_resumed() {
    let mut network = network();
    let mut handler = Recorder::default();
    let addr = listen(&mut network, "main");
    let (mut client, id) = connect(&mut network, &mut handler, addr);

    network.connection(id).unwrap().suspend_input();
    client.write_all(b"held\n").unwrap();
    drive(&mut network, &mut handler, 10);
    assert!(handler.lines(id).is_empty());

    network.connection(id).unwrap().resume_input();
    drive_until(&mut network, &mut handler, |_, h| h.lines(id).len() == 1);
    assert_eq!(handler.lines(id), vec![Bytes::from("held")]);
}

// ============================================================================
// Output
// ============================================================================

#[test]
fn test_welcome_and_echo() {
    let mut network = network();
    let mut handler = Recorder {
        welcome: Some("Welcome!"),
        echo: true,
        ..Recorder::default()
    };
    let addr = listen(&mut network, "main");
    let (mut client, _id) = connect(&mut network, &mut handler, addr);

    client.write_all(b"ping\n").unwrap();
    let mut received = Vec::new();
    drive_until(&mut network, &mut handler, |_, _| {
        received.extend(read_available(&mut client).unwrap_or_default());
        received == b"Welcome!\r\nping\r\n"
    });
}

#[test]
fn test_send_by_id() {
    let mut network = network();
    let mut handler = Recorder::default();
    let addr = listen(&mut network, "main");
    let (mut client, id) = connect(&mut network, &mut handler, addr);

    assert!(network.send_line(id, "line"));
    assert!(network.send_bytes(id, "raw"));
    let mut received = Vec::new();
    drive_until(&mut network, &mut handler, |_, _| {
        received.extend(read_available(&mut client).unwrap_or_default());
        received == b"line\r\nraw"
    });
    assert_eq!(network.connection(id).unwrap().buffered_output_length(), 0);
}

// ============================================================================
// Lifecycle
// ============================================================================

#[test]
fn test_peer_close_releases_connection() {
    let mut network = network();
    let mut handler = Recorder::default();
    let addr = listen(&mut network, "main");
    let (client, id) = connect(&mut network, &mut handler, addr);
    assert_eq!(
        network.connection(id).unwrap().state(),
        ConnectionState::Established
    );

    drop(client);
    drive_until(&mut network, &mut handler, |_, h| h.closed == vec![id]);
    assert_eq!(network.connection_count(), 0);
    assert_eq!(network.metrics().connections_released(), 1);
}

#[test]
fn test_retained_connection_waits_in_closing() {
    let mut network = network();
    let mut handler = Recorder::default();
    let addr = listen(&mut network, "main");
    let (client, id) = connect(&mut network, &mut handler, addr);

    let held = network.retain(id).unwrap();
    assert_eq!(held.ref_count(), 2);
    drop(client);
    drive_until(&mut network, &mut handler, |_, _| held.state() == ConnectionState::Closing);
    drive(&mut network, &mut handler, 5);
    assert_eq!(network.connection_count(), 1);
    assert!(handler.closed.is_empty());
    assert_eq!(network.metrics().connections_released(), 0);

    held.release();
    drive_until(&mut network, &mut handler, |_, h| h.closed == vec![id]);
    assert_eq!(network.connection_count(), 0);
    assert_eq!(network.metrics().connections_released(), 1);
}

#[test]
fn test_application_close_flushes_output() {
    let mut network = network();
    let mut handler = Recorder::default();
    let addr = listen(&mut network, "main");
    let (mut client, id) = connect(&mut network, &mut handler, addr);

    assert!(network.send_line(id, "bye"));
    network.close(id).unwrap();
    drive_until(&mut network, &mut handler, |_, h| h.closed == vec![id]);

    client.set_nonblocking(false).unwrap();
    client
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    let mut received = Vec::new();
    client.read_to_end(&mut received).unwrap();
    assert_eq!(received, b"bye\r\n");
}

#[test]
fn test_close_unknown_connection() {
    let network = network();
    let err = network.close(ConnectionId::new(99)).unwrap_err();
    assert!(matches!(err, NetworkError::ConnectionNotFound(_)));
}

#[test]
fn test_close_listener() {
    let mut network = network();
    let id = network
        .make_listener("main", ListenerConfig::new(0).with_interface("127.0.0.1"))
        .unwrap();
    assert_eq!(network.listener_count(), 1);
    network.close_listener(id).unwrap();
    assert_eq!(network.listener_count(), 0);
    assert!(matches!(
        network.close_listener(id),
        Err(NetworkError::ListenerNotFound(_))
    ));
}

#[test]
fn test_idle_pass_times_out() {
    let mut network = network();
    let mut handler = Recorder::default();
    let did_work = network
        .process(&mut handler, Some(Duration::from_millis(20)))
        .unwrap();
    assert!(!did_work);
}

#[test]
fn test_shutdown_closes_everything() {
    let mut network = network();
    let mut handler = Recorder::default();
    let addr = listen(&mut network, "main");
    let (_client, id) = connect(&mut network, &mut handler, addr);

    network.shutdown(&mut handler);
    assert_eq!(handler.closed, vec![id]);
    assert_eq!(network.connection_count(), 0);
    assert_eq!(network.listener_count(), 0);
}

// ============================================================================
// External descriptors
// ============================================================================

#[test]
fn test_registered_fd_callback_fires() {
    let mut network = network();
    let mut handler = Recorder::default();
    let (reader, mut writer) = UnixStream::pair().unwrap();
    reader.set_nonblocking(true).unwrap();
    let fired = Rc::new(Cell::new(0));

    let count = fired.clone();
    let mut drain = reader.try_clone().unwrap();
    network.register_fd(
        reader.as_raw_fd(),
        Some(Box::new(move |_fd: RawFd| {
            let mut buf = [0u8; 64];
            while drain.read(&mut buf).is_ok_and(|n| n > 0) {}
            count.set(count.get() + 1);
            FdDisposition::Keep
        })),
        None,
    );

    writer.write_all(b"x").unwrap();
    drive_until(&mut network, &mut handler, |_, _| fired.get() == 1);
    writer.write_all(b"y").unwrap();
    drive_until(&mut network, &mut handler, |_, _| fired.get() == 2);

    assert!(network.unregister_fd(reader.as_raw_fd()));
    writer.write_all(b"z").unwrap();
    drive(&mut network, &mut handler, 5);
    assert_eq!(fired.get(), 2);
}

#[test]
fn test_callback_can_withdraw_its_descriptor() {
    let mut network = network();
    let mut handler = Recorder::default();
    let (reader, mut writer) = UnixStream::pair().unwrap();
    let fired = Rc::new(Cell::new(0));

    let count = fired.clone();
    network.register_fd(
        reader.as_raw_fd(),
        Some(Box::new(move |_fd: RawFd| {
            count.set(count.get() + 1);
            FdDisposition::Unregister
        })),
        None,
    );

    writer.write_all(b"x").unwrap();
    drive_until(&mut network, &mut handler, |_, _| fired.get() == 1);
    writer.write_all(b"y").unwrap();
    drive(&mut network, &mut handler, 5);
    assert_eq!(fired.get(), 1);
    assert!(!network.unregister_fd(reader.as_raw_fd()));
}

#[test]
fn test_reregistering_replaces_callbacks() {
    let mut network = network();
    let mut handler = Recorder::default();
    let (reader, mut writer) = UnixStream::pair().unwrap();
    reader.set_nonblocking(true).unwrap();
    let first = Rc::new(Cell::new(0));
    let second = Rc::new(Cell::new(0));

    let count = first.clone();
    network.register_fd(
        reader.as_raw_fd(),
        Some(Box::new(move |_fd: RawFd| {
            count.set(count.get() + 1);
            FdDisposition::Keep
        })),
        None,
    );
    let count = second.clone();
    let mut drain = reader.try_clone().unwrap();
    network.register_fd(
        reader.as_raw_fd(),
        Some(Box::new(move |_fd: RawFd| {
            let mut buf = [0u8; 64];
            while drain.read(&mut buf).is_ok_and(|n| n > 0) {}
            count.set(count.get() + 1);
            FdDisposition::Keep
        })),
        None,
    );

    writer.write_all(b"x").unwrap();
    drive_until(&mut network, &mut handler, |_, _| second.get() == 1);
    assert_eq!(first.get(), 0);
}

// ============================================================================
// Outbound
// ============================================================================

#[test]
fn test_outbound_connection() {
    let mut network = network();
    let mut handler = Recorder::default();
    let remote = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = remote.local_addr().unwrap().port();

    let id = network
        .open_connection(&mut handler, "out", OutboundConfig::new("127.0.0.1", port))
        .unwrap();
    assert_eq!(handler.opened, vec![(id, "out", true)]);
    let handle = network.connection(id).unwrap();
    assert!(handle.is_outbound());
    assert!(handle.full_name(true).contains(" to 127.0.0.1 [127.0.0.1], port "));

    let (mut peer, _) = remote.accept().unwrap();
    peer.write_all(b"ping\n").unwrap();
    drive_until(&mut network, &mut handler, |_, h| h.lines(id).len() == 1);
    assert_eq!(handler.lines(id), vec![Bytes::from("ping")]);

    assert!(network.send_line(id, "pong"));
    drive(&mut network, &mut handler, 3);
    peer.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    let mut buf = [0u8; 6];
    peer.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"pong\r\n");
    assert_eq!(network.metrics().snapshot().connections_opened, 1);
}

#[test]
fn test_outbound_disabled() {
    let mut network: Network<Recorder> =
        Network::new(NetworkConfig::default().with_outbound(false)).unwrap();
    let mut handler = Recorder::default();
    let err = network
        .open_connection(&mut handler, "out", OutboundConfig::new("127.0.0.1", 1))
        .unwrap_err();
    assert!(matches!(err, NetworkError::OutboundDisabled));
    assert!(handler.opened.is_empty());
}
