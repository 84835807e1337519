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

//! Events and frames exchanged with the codec

use bytes::Bytes;
use std::fmt;

/// Something recovered from the input stream
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InputEvent {
    /// A complete line with its terminator removed, or a raw chunk in binary mode
    Line(Bytes),
    /// Telnet command bytes lifted out of the stream during one read
    OutOfBand(Bytes),
}

impl InputEvent {
    /// Payload bytes regardless of kind
    pub fn bytes(&self) -> &Bytes {
        match self {
            InputEvent::Line(data) | InputEvent::OutOfBand(data) => data,
        }
    }

    /// Whether this is a side-channel delivery
    pub fn is_out_of_band(&self) -> bool {
        matches!(self, InputEvent::OutOfBand(_))
    }

    /// Split into payload and out-of-band flag
    pub fn into_parts(self) -> (Bytes, bool) {
        match self {
            InputEvent::Line(data) => (data, false),
            InputEvent::OutOfBand(data) => (data, true),
        }
    }
}

/// Outgoing data handed to the encoder
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutputFrame {
    /// Bytes followed by the configured terminator
    Line(Bytes),
    /// Bytes written as-is
    Raw(Bytes),
}

impl OutputFrame {
    /// Build a frame, terminated or not
    pub fn new(data: impl Into<Bytes>, terminate: bool) -> Self {
        if terminate {
            OutputFrame::Line(data.into())
        } else {
            OutputFrame::Raw(data.into())
        }
    }
}

/// How incoming bytes are interpreted
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum InputMode {
    /// Printable bytes are collected into lines; telnet commands are extracted
    #[default]
    Text,
    /// Every read is delivered verbatim as a single line
    Binary,
}

impl fmt::Display for InputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputMode::Text => write!(f, "text"),
            InputMode::Binary => write!(f, "binary"),
        }
    }
}
