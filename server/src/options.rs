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

//! Per-connection options addressed by name

use crate::config::KeepAlive;
use crate::error::{NetworkError, Result};
use socket2::{SockRef, TcpKeepalive};
use std::fmt;
use std::io;
use std::os::fd::AsFd;

/// Telnet echo negotiation
pub const CLIENT_ECHO: &str = "client-echo";
/// TCP keep-alive tuning
pub const KEEP_ALIVE: &str = "keep-alive";
/// Raw input delivery
pub const BINARY: &str = "binary";

/// Every option name, in listing order
pub const OPTION_NAMES: &[&str] = &[BINARY, CLIENT_ECHO, KEEP_ALIVE];

/// Value of a connection option
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionValue {
    /// On/off option
    Bool(bool),
    /// Full keep-alive settings
    KeepAlive(KeepAlive),
}

impl OptionValue {
    /// Truthiness, for options that are flags
    pub fn as_bool(&self) -> bool {
        match self {
            OptionValue::Bool(value) => *value,
            OptionValue::KeepAlive(keep_alive) => keep_alive.enabled,
        }
    }
}

impl From<bool> for OptionValue {
    fn from(value: bool) -> Self {
        OptionValue::Bool(value)
    }
}

impl From<KeepAlive> for OptionValue {
    fn from(value: KeepAlive) -> Self {
        OptionValue::KeepAlive(value)
    }
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Bool(value) => write!(f, "{}", value),
            OptionValue::KeepAlive(ka) => write!(
                f,
                "{{enabled: {}, idle: {}, interval: {}, count: {}}}",
                ka.enabled,
                ka.idle.as_secs(),
                ka.interval.as_secs(),
                ka.count
            ),
        }
    }
}

/// Current option settings of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionOptions {
    pub client_echo: bool,
    pub binary: bool,
    pub keep_alive: KeepAlive,
}

impl ConnectionOptions {
    pub fn new(keep_alive: KeepAlive) -> Self {
        Self {
            client_echo: true,
            binary: false,
            keep_alive,
        }
    }

    /// Look up an option by name
    pub fn get(&self, name: &str) -> Result<OptionValue> {
        match name {
            CLIENT_ECHO => Ok(OptionValue::Bool(self.client_echo)),
            BINARY => Ok(OptionValue::Bool(self.binary)),
            KEEP_ALIVE => Ok(OptionValue::KeepAlive(self.keep_alive)),
            _ => Err(NetworkError::UnknownOption(name.to_string())),
        }
    }

    /// Every option with its value
    pub fn list(&self) -> Vec<(&'static str, OptionValue)> {
        OPTION_NAMES
            .iter()
            .filter_map(|name| self.get(name).ok().map(|value| (*name, value)))
            .collect()
    }
}

/// Fold a requested keep-alive change into the current settings.
///
/// A flag only toggles `enabled`; structured settings replace each field unless it is zero.
pub fn merge_keep_alive(current: KeepAlive, value: OptionValue) -> KeepAlive {
    match value {
        OptionValue::Bool(enabled) => KeepAlive {
            enabled,
            ..current
        },
        OptionValue::KeepAlive(requested) => KeepAlive {
            enabled: requested.enabled,
            idle: if requested.idle.is_zero() {
                current.idle
            } else {
                requested.idle
            },
            interval: if requested.interval.is_zero() {
                current.interval
            } else {
                requested.interval
            },
            count: if requested.count == 0 {
                current.count
            } else {
                requested.count
            },
        },
    }
}

/// Push keep-alive settings down to the socket
pub fn apply_keep_alive<S: AsFd>(socket: &S, keep_alive: &KeepAlive) -> io::Result<()> {
    let socket = SockRef::from(socket);
    if !keep_alive.enabled {
        return socket.set_keepalive(false);
    }
    let params = TcpKeepalive::new()
        .with_time(keep_alive.idle)
        .with_interval(keep_alive.interval)
        .with_retries(keep_alive.count);
    socket.set_tcp_keepalive(&params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{TcpListener, TcpStream};
    use std::time::Duration;

    #[test]
    fn test_defaults() {
        let options = ConnectionOptions::new(KeepAlive::default());
        assert_eq!(options.get(CLIENT_ECHO).unwrap(), OptionValue::Bool(true));
        assert_eq!(options.get(BINARY).unwrap(), OptionValue::Bool(false));
        assert!(!options.get(KEEP_ALIVE).unwrap().as_bool());
    }

    #[test]
    fn test_unknown_option_rejected() {
        let options = ConnectionOptions::new(KeepAlive::default());
        let err = options.get("frobnicate").unwrap_err();
        assert!(matches!(err, NetworkError::UnknownOption(name) if name == "frobnicate"));
    }

    #[test]
    fn test_list_covers_every_name() {
        let options = ConnectionOptions::new(KeepAlive::default());
        let names: Vec<_> = options.list().into_iter().map(|(name, _)| name).collect();
        assert_eq!(names, OPTION_NAMES);
    }

    #[test]
    fn test_merge_flag_keeps_tuning() {
        let current = KeepAlive {
            enabled: false,
            idle: Duration::from_secs(60),
            interval: Duration::from_secs(10),
            count: 3,
        };
        let merged = merge_keep_alive(current, OptionValue::Bool(true));
        assert!(merged.enabled);
        assert_eq!(merged.idle, Duration::from_secs(60));
        assert_eq!(merged.count, 3);
    }

    #[test]
    fn test_merge_zero_fields_keep_current() {
        let current = KeepAlive::default();
        let requested = KeepAlive {
            enabled: true,
            idle: Duration::from_secs(30),
            interval: Duration::ZERO,
            count: 0,
        };
        let merged = merge_keep_alive(current, requested.into());
        assert!(merged.enabled);
        assert_eq!(merged.idle, Duration::from_secs(30));
        assert_eq!(merged.interval, current.interval);
        assert_eq!(merged.count, current.count);
    }

    #[test]
    fn test_apply_keep_alive_to_tcp_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let stream = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let keep_alive = KeepAlive {
            enabled: true,
            idle: Duration::from_secs(45),
            interval: Duration::from_secs(15),
            count: 4,
        };
        apply_keep_alive(&stream, &keep_alive).unwrap();
        let socket = SockRef::from(&stream);
        assert!(socket.keepalive().unwrap());
        assert_eq!(socket.keepalive_time().unwrap(), Duration::from_secs(45));

        apply_keep_alive(&stream, &KeepAlive::default()).unwrap();
        assert!(!socket.keepalive().unwrap());
    }

    #[test]
    fn test_value_display() {
        assert_eq!(OptionValue::Bool(true).to_string(), "true");
        assert_eq!(
            OptionValue::KeepAlive(KeepAlive::default()).to_string(),
            "{enabled: false, idle: 300, interval: 120, count: 5}"
        );
    }
}
