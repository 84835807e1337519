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

//! Synthesized control output

use crate::consts::{IAC, OPT_ECHO, WILL, WONT};
use bytes::{BufMut, Bytes, BytesMut};

/// Build the notice sent ahead of resumed output after lines were dropped.
///
/// The count is pluralised the way a reader expects it:
/// `>> Network buffer overflow: 1 line of output to you has been lost <<`.
pub fn overflow_notice(lost: u64, eol: &[u8]) -> Bytes {
    let text = if lost == 1 {
        format!(">> Network buffer overflow: {} line of output to you has been lost <<", lost)
    } else {
        format!(">> Network buffer overflow: {} lines of output to you have been lost <<", lost)
    };
    let mut buf = BytesMut::with_capacity(text.len() + eol.len() * 2);
    buf.put_slice(eol);
    buf.put_slice(text.as_bytes());
    buf.put_slice(eol);
    buf.freeze()
}

/// Telnet command asking the client to (re)enable or suppress local echo.
///
/// The server claiming the echo option (`WILL ECHO`) turns client echo off.
pub fn echo_command(client_echo: bool) -> [u8; 3] {
    [IAC, if client_echo { WONT } else { WILL }, OPT_ECHO]
}
