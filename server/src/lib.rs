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

//! Connection Multiplexing Core
//!
//! A single-threaded, readiness-driven network core for line-oriented interactive
//! servers. The embedding process calls [`Network::process`] periodically; each call is
//! one pass over listeners, connections and externally registered descriptors.
//!
//! - Lines are framed on CR, LF or CRLF; embedded telnet commands are delivered
//!   separately as out-of-band blocks.
//! - Output is queued per connection under a byte budget. On overflow the oldest lines
//!   are dropped and the peer is told how many were lost.
//! - Plain and TLS connections share one transport contract.
//! - A small pool of reserved descriptors lets connections be refused cleanly when the
//!   descriptor table is full.
//!
//! # Architecture
//!
//! ```text
//! Network ── Listener ──────────── accept / refuse
//!    │
//!    ├── ConnectionHandle ── Transport (plain | TLS)
//!    │         ├── LineCodec      (input framing)
//!    │         └── OutputQueue    (budget, overflow notice, retry state)
//!    │
//!    └── FdRegistration ─── callbacks for foreign descriptors
//! ```
//!
//! # Example
//!
//! ```no_run
//! use bytes::Bytes;
//! use mooring_server::{
//!     ConnectionHandle, ListenerConfig, Network, NetworkConfig, NetworkHandler,
//! };
//! use std::time::Duration;
//!
//! struct Echo;
//!
//! impl NetworkHandler for Echo {
//!     type ListenerTag = &'static str;
//!     type Session = ();
//!
//!     fn new_connection(&mut self, _: &&'static str, conn: &ConnectionHandle, _: bool) {
//!         conn.send_line("Welcome!");
//!     }
//!
//!     fn refuse_connection(&mut self, _: &&'static str, conn: &ConnectionHandle) {
//!         conn.send_line("Too many connections, try again later.");
//!     }
//!
//!     fn deliver(&mut self, _: &mut (), conn: &ConnectionHandle, data: Bytes, oob: bool) {
//!         if !oob {
//!             conn.send_line(data);
//!         }
//!     }
//!
//!     fn connection_closed(&mut self, _: (), _: &ConnectionHandle) {}
//! }
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut network = Network::new(NetworkConfig::default())?;
//!     network.make_listener("echo", ListenerConfig::new(7777))?;
//!     let mut handler = Echo;
//!     loop {
//!         network.process(&mut handler, Some(Duration::from_secs(1)))?;
//!     }
//! }
//! ```

mod addr;
mod config;
mod connection;
mod error;
mod handler;
mod listener;
mod metrics;
mod network;
mod options;
mod output;
mod pocket;
mod poll;
mod proxy;
mod registry;
mod types;

#[cfg(test)]
mod testing;

pub use addr::{format_endpoint, host_name, is_localhost, protocol_name, resolve, reverse_lookup};
pub use config::{
    KeepAlive, ListenerConfig, MIN_QUEUED_OUTPUT, NetworkConfig, OutboundConfig, OutboundTls,
};
pub use connection::{ConnectionHandle, Identity};
pub use error::{NetworkError, Result};
pub use handler::NetworkHandler;
pub use listener::{AcceptOutcome, Listener, ListenerInfo};
pub use metrics::{MetricsSnapshot, NetworkMetrics};
pub use network::Network;
pub use options::{BINARY, CLIENT_ECHO, ConnectionOptions, KEEP_ALIVE, OPTION_NAMES, OptionValue};
pub use output::{EnqueueOutcome, FlushReport, OutputQueue, RetryState, Segment};
pub use pocket::PocketPool;
pub use poll::Pollable;
pub use proxy::{ProxyHeader, parse_proxy_header};
pub use registry::{FdCallback, FdDisposition, FdRegistration};
pub use types::{ConnectionId, ConnectionState, Direction, ListenerId};

pub use mooring_transport::{SessionInfo, TlsCredentials};
