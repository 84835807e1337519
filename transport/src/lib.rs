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

//! # Mooring Transport
//!
//! Non-blocking byte-stream transports for a single-threaded `mio` event loop.
//!
//! Every transport implements [`Transport`]: reads and writes return [`Progress`]
//! (bytes moved, or would-block) and any error is fatal for the stream. Two
//! implementations are provided:
//!
//! - [`PlainTransport`] moves bytes straight to the socket.
//! - [`TlsTransport`] runs a `rustls` session, advancing its handshake from `read` and
//!   requiring that a write refused with [`Progress::WouldBlock`] is retried with the
//!   same bytes.

mod credentials;
mod error;
mod plain;
mod tls;
mod transport;

pub use credentials::{
    TlsCredentials, client_config, client_config_from_ca_pem, load_certificates,
    load_private_key, server_config_from_pem,
};
pub use error::{TransportError, TransportResult};
pub use plain::PlainTransport;
pub use tls::TlsTransport;
pub use transport::{Progress, RetryPolicy, SessionInfo, Transport, TransportKind};

pub use rustls::{ClientConfig, ServerConfig};
