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

//! Error types for the network core

use crate::types::{ConnectionId, ListenerId};
use mooring_transport::TransportError;
use std::net::SocketAddr;
use thiserror::Error;

/// Result type for network operations
pub type Result<T> = std::result::Result<T, NetworkError>;

/// Network core error types
#[derive(Debug, Error)]
pub enum NetworkError {
    /// I/O error from a socket or the poller
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Transport layer failure
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Host name did not resolve to a usable address
    #[error("Could not resolve {host}")]
    Resolve {
        /// Host that was looked up
        host: String,
    },

    /// Binding a listening socket failed
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested
        addr: SocketAddr,
        /// Underlying error
        source: std::io::Error,
    },

    /// The process may not bind the requested port
    #[error("Permission denied binding {0}")]
    PermissionDenied(SocketAddr),

    /// The reserved descriptors could not be opened
    #[error("Unable to reserve pocket descriptors: {0}")]
    PocketUnavailable(std::io::Error),

    /// Connection option name is not known
    #[error("Unknown connection option: {0}")]
    UnknownOption(String),

    /// Connection option value has the wrong shape
    #[error("Invalid value for option {name}: {reason}")]
    InvalidOptionValue {
        /// Option name
        name: String,
        /// What was wrong with it
        reason: String,
    },

    /// Outbound connections are disabled by configuration
    #[error("Outbound connections are disabled")]
    OutboundDisabled,

    /// Outbound connect did not finish in time
    #[error("Connection to {0} timed out")]
    ConnectTimeout(SocketAddr),

    /// No listener with the given ID
    #[error("Listener {0} not found")]
    ListenerNotFound(ListenerId),

    /// No connection with the given ID
    #[error("Connection {0} not found")]
    ConnectionNotFound(ConnectionId),

    /// A PROXY protocol header could not be parsed
    #[error("Malformed PROXY header: {0}")]
    InvalidProxyHeader(String),

    /// A PROXY protocol header arrived from a peer that is not trusted to send one
    #[error("PROXY header from untrusted peer {0}")]
    UntrustedProxy(String),

    /// Configuration failed validation
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl NetworkError {
    /// Check if the error is recoverable
    ///
    /// Recoverable errors affect a single operation; the event loop keeps running.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            NetworkError::PocketUnavailable(_) | NetworkError::Config(_)
        )
    }

    /// Check if the error concerns a single connection
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            NetworkError::ConnectionNotFound(_)
                | NetworkError::Transport(_)
                | NetworkError::ConnectTimeout(_)
                | NetworkError::InvalidProxyHeader(_)
                | NetworkError::UntrustedProxy(_)
        )
    }
}
