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

//! Error types for transports

use std::path::PathBuf;
use thiserror::Error;

/// Result type for transport operations
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Non-retryable transport failures.
///
/// A would-block condition is not an error; it is reported as
/// [`Progress::WouldBlock`](crate::Progress::WouldBlock).
#[derive(Debug, Error)]
pub enum TransportError {
    /// I/O error from the underlying socket
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error reported by the TLS session
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// The TLS handshake could not be completed
    #[error("TLS handshake failed: {0}")]
    HandshakeFailed(String),

    /// A write that must be retried verbatim was retried with different bytes
    #[error("Write retried with different bytes ({expected_len} bytes expected, {actual_len} given)")]
    RetryMismatch {
        /// Length of the buffer that was refused
        expected_len: usize,
        /// Length of the buffer offered on retry
        actual_len: usize,
    },

    /// Certificate or key material could not be loaded
    #[error("Failed to load credentials from {}: {reason}", .path.display())]
    Credentials {
        /// File that was being read
        path: PathBuf,
        /// What went wrong
        reason: String,
    },

    /// The name given for server verification is not a valid DNS name or IP address
    #[error("Invalid server name: {0}")]
    InvalidServerName(String),
}

impl TransportError {
    /// Check if the error is a broken retry contract, which is always a local bug
    pub fn is_retry_violation(&self) -> bool {
        matches!(self, TransportError::RetryMismatch { .. })
    }

    /// Check if the error was caused by the remote peer
    pub fn is_peer_fault(&self) -> bool {
        match self {
            TransportError::Io(err) => matches!(
                err.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::UnexpectedEof
            ),
            TransportError::Tls(_) | TransportError::HandshakeFailed(_) => true,
            _ => false,
        }
    }
}
