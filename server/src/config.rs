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

//! Network configuration

use bytes::Bytes;
use mooring_linecodec::consts::{DEFAULT_EOL, DEFAULT_MAX_LINE_BYTES};
use mooring_transport::TlsCredentials;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Smallest output budget a connection may be given
pub const MIN_QUEUED_OUTPUT: usize = 2048;

/// TCP keep-alive tuning for a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepAlive {
    /// Whether probes are sent at all
    pub enabled: bool,
    /// Idle time before the first probe
    pub idle: Duration,
    /// Time between probes
    pub interval: Duration,
    /// Unanswered probes before the connection is dropped
    pub count: u32,
}

impl Default for KeepAlive {
    fn default() -> Self {
        Self {
            enabled: false,
            idle: Duration::from_secs(300),
            interval: Duration::from_secs(120),
            count: 5,
        }
    }
}

/// Settings shared by every listener and connection of one network
///
/// # Example
///
/// ```
/// use mooring_server::NetworkConfig;
/// use std::time::Duration;
///
/// let config = NetworkConfig::default()
///     .with_max_queued_output(128 * 1024)
///     .with_outbound_connect_timeout(Duration::from_secs(10));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Longest unterminated input line before the connection is dropped
    pub max_line_bytes: usize,

    /// Output bytes a connection may have queued before old lines are dropped
    pub max_queued_output: usize,

    /// Bytes requested from a connection per read
    pub read_chunk_size: usize,

    /// Descriptors held back to refuse connections when the table is full
    pub pocket_size: usize,

    /// Treat a zero-byte read as the peer closing the connection
    pub believe_eof: bool,

    /// Skip reverse DNS and use numeric addresses as names
    pub no_name_lookup: bool,

    /// BS and DEL delete the previous input character
    pub apply_backspace: bool,

    /// Whether outbound connections may be opened
    pub outbound_enabled: bool,

    /// How long an outbound connect may take
    pub outbound_connect_timeout: Duration,

    /// Keep-alive settings given to new connections
    pub default_keep_alive: KeepAlive,

    /// Readiness events collected per pass
    pub event_capacity: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            max_queued_output: 65536,
            read_chunk_size: 1024,
            pocket_size: 1,
            believe_eof: true,
            no_name_lookup: false,
            apply_backspace: false,
            outbound_enabled: true,
            outbound_connect_timeout: Duration::from_secs(5),
            default_keep_alive: KeepAlive::default(),
            event_capacity: 1024,
        }
    }
}

impl NetworkConfig {
    /// Set the input line bound
    pub fn with_max_line_bytes(mut self, limit: usize) -> Self {
        self.max_line_bytes = limit;
        self
    }

    /// Set the per-connection output budget. Values below [`MIN_QUEUED_OUTPUT`] are raised to it.
    pub fn with_max_queued_output(mut self, budget: usize) -> Self {
        self.max_queued_output = budget.max(MIN_QUEUED_OUTPUT);
        self
    }

    /// Set the read size
    pub fn with_read_chunk_size(mut self, size: usize) -> Self {
        self.read_chunk_size = size;
        self
    }

    /// Set how many descriptors are held in reserve
    pub fn with_pocket_size(mut self, size: usize) -> Self {
        self.pocket_size = size;
        self
    }

    /// Set whether a zero-byte read closes the connection
    pub fn with_believe_eof(mut self, believe: bool) -> Self {
        self.believe_eof = believe;
        self
    }

    /// Enable or disable reverse DNS
    pub fn with_name_lookup(mut self, enabled: bool) -> Self {
        self.no_name_lookup = !enabled;
        self
    }

    /// Enable or disable backspace processing
    pub fn with_backspace(mut self, enabled: bool) -> Self {
        self.apply_backspace = enabled;
        self
    }

    /// Enable or disable outbound connections
    pub fn with_outbound(mut self, enabled: bool) -> Self {
        self.outbound_enabled = enabled;
        self
    }

    /// Set the outbound connect timeout
    pub fn with_outbound_connect_timeout(mut self, timeout: Duration) -> Self {
        self.outbound_connect_timeout = timeout;
        self
    }

    /// Set keep-alive defaults for new connections
    pub fn with_keep_alive(mut self, keep_alive: KeepAlive) -> Self {
        self.default_keep_alive = keep_alive;
        self
    }

    /// Validate the configuration
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_line_bytes == 0 {
            return Err("max_line_bytes must be greater than 0".to_string());
        }

        if self.max_queued_output < MIN_QUEUED_OUTPUT {
            return Err(format!(
                "max_queued_output must be at least {}",
                MIN_QUEUED_OUTPUT
            ));
        }

        if self.read_chunk_size == 0 {
            return Err("read_chunk_size must be greater than 0".to_string());
        }

        if self.pocket_size == 0 {
            return Err("pocket_size must be greater than 0".to_string());
        }

        if self.outbound_enabled && self.outbound_connect_timeout.is_zero() {
            return Err("outbound_connect_timeout must be greater than 0".to_string());
        }

        if self.event_capacity == 0 {
            return Err("event_capacity must be greater than 0".to_string());
        }

        Ok(())
    }
}

/// Settings for one listening socket
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Interface to bind, all interfaces when unset
    pub interface: Option<String>,

    /// Port to bind, 0 for any
    pub port: u16,

    /// Bind an IPv6 socket
    pub ipv6: bool,

    /// Terminator appended to output lines
    pub eol: Bytes,

    /// Certificate and key for TLS listeners
    pub tls: Option<TlsCredentials>,

    /// Peers allowed to announce a different client address with a PROXY header
    pub trusted_proxies: Vec<IpAddr>,

    /// Pending connection backlog
    pub backlog: i32,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            interface: None,
            port: 0,
            ipv6: false,
            eol: Bytes::from_static(DEFAULT_EOL),
            tls: None,
            trusted_proxies: Vec::new(),
            backlog: 5,
        }
    }
}

impl ListenerConfig {
    /// Create a listener configuration for the given port
    pub fn new(port: u16) -> Self {
        Self {
            port,
            ..Default::default()
        }
    }

    /// Bind to a specific interface
    pub fn with_interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = Some(interface.into());
        self
    }

    /// Bind an IPv6 socket
    pub fn with_ipv6(mut self, ipv6: bool) -> Self {
        self.ipv6 = ipv6;
        self
    }

    /// Set the output line terminator
    pub fn with_eol(mut self, eol: impl Into<Bytes>) -> Self {
        self.eol = eol.into();
        self
    }

    /// Serve TLS with the given credentials
    pub fn with_tls(mut self, credentials: TlsCredentials) -> Self {
        self.tls = Some(credentials);
        self
    }

    /// Trust a proxy to rewrite client addresses
    pub fn with_trusted_proxy(mut self, proxy: IpAddr) -> Self {
        self.trusted_proxies.push(proxy);
        self
    }

    /// Set the accept backlog
    pub fn with_backlog(mut self, backlog: i32) -> Self {
        self.backlog = backlog;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.eol.is_empty() {
            return Err("eol must not be empty".to_string());
        }
        if self.backlog <= 0 {
            return Err("backlog must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// TLS settings for an outbound connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundTls {
    /// Name the peer certificate must match, the target host when unset
    pub server_name: Option<String>,
    /// PEM bundle of trusted roots, the bundled web PKI roots when unset
    pub ca_path: Option<PathBuf>,
}

/// Target of an outbound connection
#[derive(Debug, Clone)]
pub struct OutboundConfig {
    /// Host name or address
    pub host: String,
    /// Port
    pub port: u16,
    /// Prefer IPv6 addresses
    pub ipv6: bool,
    /// Local interface to connect from
    pub bind_interface: Option<String>,
    /// Encrypt the connection
    pub tls: Option<OutboundTls>,
    /// Terminator appended to output lines
    pub eol: Bytes,
}

impl OutboundConfig {
    /// Create a plain outbound target
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ipv6: false,
            bind_interface: None,
            tls: None,
            eol: Bytes::from_static(DEFAULT_EOL),
        }
    }

    /// Prefer IPv6 addresses
    pub fn with_ipv6(mut self, ipv6: bool) -> Self {
        self.ipv6 = ipv6;
        self
    }

    /// Connect from a specific local interface
    pub fn with_bind_interface(mut self, interface: impl Into<String>) -> Self {
        self.bind_interface = Some(interface.into());
        self
    }

    /// Encrypt the connection
    pub fn with_tls(mut self, tls: OutboundTls) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Set the output line terminator
    pub fn with_eol(mut self, eol: impl Into<Bytes>) -> Self {
        self.eol = eol.into();
        self
    }
}
