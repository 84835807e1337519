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

//! Telnet byte values and framing defaults

/// Interpret As Command
pub const IAC: u8 = 255;
/// Option refusal request
pub const DONT: u8 = 254;
/// Option request
pub const DO: u8 = 253;
/// Option refusal
pub const WONT: u8 = 252;
/// Option offer
pub const WILL: u8 = 251;
/// Subnegotiation begin
pub const SB: u8 = 250;
/// Go Ahead
pub const GA: u8 = 249;
/// No Operation
pub const NOP: u8 = 241;
/// Subnegotiation end
pub const SE: u8 = 240;

/// Echo option code
pub const OPT_ECHO: u8 = 1;

/// Backspace
pub const BS: u8 = 0x08;
/// Delete
pub const DEL: u8 = 0x7F;
/// Carriage return
pub const CR: u8 = b'\r';
/// Line feed
pub const LF: u8 = b'\n';

/// Default output terminator
pub const DEFAULT_EOL: &[u8] = b"\r\n";

/// Default bound on an unterminated input line (4 MiB)
pub const DEFAULT_MAX_LINE_BYTES: usize = 4 * 1024 * 1024;

/// Longest telnet prefix that is held back waiting for its final byte
pub(crate) const MAX_STASH: usize = 2;

/// Returns `true` when the byte names a three byte negotiation command.
pub fn is_negotiation(cmd: u8) -> bool {
    matches!(cmd, WILL | WONT | DO | DONT)
}

/// Returns `true` when the byte names a two byte telnet command (NOP through GA).
pub fn is_simple_command(cmd: u8) -> bool {
    (NOP..=GA).contains(&cmd)
}
