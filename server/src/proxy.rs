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

//! PROXY protocol (version 1) header parsing

use crate::error::{NetworkError, Result};
use std::net::{IpAddr, SocketAddr};

/// Endpoints announced by a trusted proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProxyHeader {
    /// Real client endpoint
    pub client: SocketAddr,
    /// Endpoint the client connected to on the proxy
    pub proxy: SocketAddr,
}

/// Parse `PROXY TCP4|TCP6 <client-ip> <proxy-ip> <client-port> <proxy-port>`
pub fn parse_proxy_header(line: &[u8]) -> Result<ProxyHeader> {
    let text = std::str::from_utf8(line)
        .map_err(|_| invalid("header is not ASCII"))?
        .trim_end_matches(['\r', '\n']);
    let fields: Vec<&str> = text.split(' ').collect();
    let &[keyword, family, client_ip, proxy_ip, client_port, proxy_port] = fields.as_slice() else {
        return Err(invalid("expected six fields"));
    };
    if keyword != "PROXY" {
        return Err(invalid("missing PROXY keyword"));
    }
    let want_v6 = match family {
        "TCP4" => false,
        "TCP6" => true,
        other => return Err(invalid(&format!("unsupported protocol {}", other))),
    };
    let client_ip = parse_ip(client_ip, want_v6)?;
    let proxy_ip = parse_ip(proxy_ip, want_v6)?;
    let client_port = parse_port(client_port)?;
    let proxy_port = parse_port(proxy_port)?;
    Ok(ProxyHeader {
        client: SocketAddr::new(client_ip, client_port),
        proxy: SocketAddr::new(proxy_ip, proxy_port),
    })
}

fn parse_ip(field: &str, want_v6: bool) -> Result<IpAddr> {
    let ip: IpAddr = field
        .parse()
        .map_err(|_| invalid(&format!("bad address {}", field)))?;
    if ip.is_ipv6() != want_v6 {
        return Err(invalid(&format!("address {} does not match protocol", field)));
    }
    Ok(ip)
}

fn parse_port(field: &str) -> Result<u16> {
    field
        .parse()
        .map_err(|_| invalid(&format!("bad port {}", field)))
}

fn invalid(reason: &str) -> NetworkError {
    NetworkError::InvalidProxyHeader(reason.to_string())
}
