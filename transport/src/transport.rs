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

//! The byte-stream contract shared by every transport

use crate::TransportResult;
use mio::event::Source;
use std::fmt;
use std::os::fd::AsFd;

/// Outcome of a non-fatal read or write
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Progress {
    /// Bytes moved. A read of zero bytes means the peer closed the stream.
    Transferred(usize),
    /// Nothing could be moved now; try again on a later pass
    WouldBlock,
}

impl Progress {
    /// Bytes moved, zero when blocked
    pub fn count(self) -> usize {
        match self {
            Progress::Transferred(n) => n,
            Progress::WouldBlock => 0,
        }
    }

    /// Whether this is an end-of-stream read result
    pub fn is_eof(self) -> bool {
        matches!(self, Progress::Transferred(0))
    }
}

/// What a caller may offer after a write reported [`Progress::WouldBlock`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Any bytes may be offered
    Any,
    /// The exact same bytes must be offered again
    Identical,
}

/// Transport flavour
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportKind {
    /// Bytes go straight to the socket
    Plain,
    /// Bytes pass through a TLS session
    Tls,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Plain => write!(f, "plain"),
            TransportKind::Tls => write!(f, "tls"),
        }
    }
}

/// Negotiated parameters of an encrypted session
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionInfo {
    /// Whether the handshake has finished
    pub established: bool,
    /// Protocol version, e.g. `TLSv1_3`
    pub protocol_version: Option<String>,
    /// Negotiated cipher suite
    pub cipher_suite: Option<String>,
    /// SNI name sent by the client, or the name the client verified against
    pub server_name: Option<String>,
}

/// A non-blocking duplex byte stream.
///
/// Implementations are registered with a [`mio::Poll`] directly. Reads and writes
/// never block; would-block conditions come back as [`Progress::WouldBlock`] and every
/// returned error is fatal for the stream.
pub trait Transport: Source + AsFd + Send + fmt::Debug {
    /// Transport flavour
    fn kind(&self) -> TransportKind;

    /// Read into `buf`. Encrypted transports use this to advance their handshake and
    /// report [`Progress::WouldBlock`] until it completes.
    fn read(&mut self, buf: &mut [u8]) -> TransportResult<Progress>;

    /// Write from `buf`
    fn write(&mut self, buf: &[u8]) -> TransportResult<Progress>;

    /// Whether application data can flow
    fn is_established(&self) -> bool {
        true
    }

    /// Whether the transport holds bytes of its own that still have to reach the socket
    fn wants_write(&self) -> bool {
        false
    }

    /// Push transport-owned bytes to the socket. Returns `true` once nothing is left.
    fn flush_pending(&mut self) -> TransportResult<bool> {
        Ok(true)
    }

    /// Whether input is available that a readiness event would not announce
    fn has_buffered_input(&self) -> bool {
        false
    }

    /// Constraint on the bytes offered after a blocked write
    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::Any
    }

    /// Negotiated session parameters, if encrypted
    fn session_info(&self) -> Option<SessionInfo> {
        None
    }

    /// Best-effort orderly close before the descriptor is dropped
    fn shutdown(&mut self) {}
}
