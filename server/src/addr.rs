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

//! Address helpers: resolution, reverse lookup and endpoint formatting.

use crate::error::{NetworkError, Result};
use socket2::SockAddr;
use std::ffi::CStr;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs};
use tracing::debug;

/// Resolve a bind or connect target.
///
/// Without a host the unspecified address of the requested family is used. With a host,
/// the first resolved address of the requested family wins.
pub fn resolve(host: Option<&str>, port: u16, ipv6: bool) -> Result<SocketAddr> {
    let Some(host) = host else {
        let ip = if ipv6 {
            IpAddr::V6(Ipv6Addr::UNSPECIFIED)
        } else {
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        };
        return Ok(SocketAddr::new(ip, port));
    };
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }
    (host, port)
        .to_socket_addrs()
        .map_err(|err| {
            debug!(host, error = %err, "name resolution failed");
            NetworkError::Resolve {
                host: host.to_string(),
            }
        })?
        .find(|addr| addr.is_ipv6() == ipv6)
        .ok_or_else(|| NetworkError::Resolve {
            host: host.to_string(),
        })
}

/// Reverse-resolve an address, returning `None` when no name is registered
pub fn reverse_lookup(ip: IpAddr) -> Option<String> {
    let addr = SockAddr::from(SocketAddr::new(ip, 0));
    let mut host = [0 as libc::c_char; libc::NI_MAXHOST as usize];
    // SAFETY: `addr` is a valid socket address of `addr.len()` bytes and `host` is
    // writable for its whole length; no service buffer is requested.
    let rc = unsafe {
        libc::getnameinfo(
            addr.as_ptr().cast(),
            addr.len(),
            host.as_mut_ptr(),
            host.len() as libc::socklen_t,
            std::ptr::null_mut(),
            0,
            libc::NI_NAMEREQD,
        )
    };
    if rc != 0 {
        return None;
    }
    // SAFETY: getnameinfo succeeded, so `host` holds a NUL-terminated string.
    let name = unsafe { CStr::from_ptr(host.as_ptr()) };
    Some(name.to_string_lossy().into_owned())
}

/// Display name for an address: its reverse lookup when enabled, otherwise the numeric form
pub fn host_name(ip: IpAddr, lookup: bool) -> String {
    if lookup {
        if let Some(name) = reverse_lookup(ip) {
            return name;
        }
    }
    ip.to_string()
}

/// Protocol family label
pub fn protocol_name(ip: IpAddr) -> &'static str {
    match ip {
        IpAddr::V4(_) => "IPv4",
        IpAddr::V6(_) => "IPv6",
    }
}

/// Whether the address is exactly the loopback address of its family
pub fn is_localhost(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4 == Ipv4Addr::LOCALHOST,
        IpAddr::V6(v6) => v6 == Ipv6Addr::LOCALHOST,
    }
}

/// `"<name> [<ip>], port <port>"`
pub fn format_endpoint(name: &str, ip: IpAddr, port: u16) -> String {
    format!("{} [{}], port {}", name, ip, port)
}
