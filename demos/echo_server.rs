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

//! Line echo server.
//!
//! ```text
//! cargo run --example echo_server -- [PORT] [CERT KEY]
//! ```
//!
//! Type `quit` to disconnect and `options` to list connection options.

use bytes::Bytes;
use mooring_server::{
    ConnectionHandle, ListenerConfig, Network, NetworkConfig, NetworkHandler, TlsCredentials,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

struct EchoHandler;

struct Session {
    lines: u64,
}

impl NetworkHandler for EchoHandler {
    type ListenerTag = &'static str;
    type Session = Session;

    fn new_connection(
        &mut self,
        listener: &&'static str,
        connection: &ConnectionHandle,
        _outbound: bool,
    ) -> Session {
        connection.send_line(format!("Welcome to the {} echo service.", listener));
        connection.send_line(format!("You are {}.", connection.full_name(false)));
        Session { lines: 0 }
    }

    fn refuse_connection(&mut self, _listener: &&'static str, connection: &ConnectionHandle) {
        connection.send_line("*** Server full, try again later ***");
    }

    fn deliver(
        &mut self,
        session: &mut Session,
        connection: &ConnectionHandle,
        data: Bytes,
        out_of_band: bool,
    ) {
        if out_of_band {
            info!(connection_id = %connection.id(), len = data.len(), "Out-of-band input ignored");
            return;
        }
        session.lines += 1;
        match data.as_ref() {
            b"quit" => {
                connection.send_line("Goodbye.");
                connection.close();
            }
            b"options" => {
                for (name, value) in connection.list_options() {
                    connection.send_line(format!("{} = {}", name, value));
                }
            }
            _ => {
                let mut echo = Vec::with_capacity(data.len() + 16);
                echo.extend_from_slice(format!("[{}] ", session.lines).as_bytes());
                echo.extend_from_slice(&data);
                connection.send_line(echo);
            }
        }
    }

    fn connection_closed(&mut self, session: Session, connection: &ConnectionHandle) {
        info!(
            connection_id = %connection.id(),
            lines = session.lines,
            "Session ended"
        );
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let port = match args.first() {
        Some(port) => port.parse()?,
        None => 7777,
    };
    let mut listener = ListenerConfig::new(port);
    let tag = match (args.get(1), args.get(2)) {
        (Some(cert), Some(key)) => {
            listener = listener.with_tls(TlsCredentials::new(cert, key));
            "secure"
        }
        _ => "plain",
    };

    let mut network = Network::new(NetworkConfig::default())?;
    let mut handler = EchoHandler;
    network.make_listener(tag, listener)?;
    info!(port, tag, "Echo server running");

    loop {
        network.process(&mut handler, None)?;
    }
}
