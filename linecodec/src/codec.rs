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

use crate::consts::{self, BS, CR, DEL, IAC, LF, SB, SE};
use crate::{InputEvent, InputMode, LineCodecError, LineCodecResult, OutputFrame};
use bytes::{BufMut, Bytes, BytesMut};
use std::collections::VecDeque;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, trace};

/// Line framing codec for interactive text connections.
///
/// Input is consumed a read at a time. In [`InputMode::Text`] printable bytes, spaces and
/// tabs are collected into a line which is delivered on CR, on LF, or once for a CRLF pair.
/// Telnet commands found in the stream are lifted out and delivered after the lines of the
/// same read as a single [`InputEvent::OutOfBand`] event. In [`InputMode::Binary`] each read
/// is delivered untouched.
///
/// Output frames are encoded with the configured end-of-line terminator.
#[derive(Debug)]
pub struct LineCodec {
    mode: InputMode,
    line: BytesMut,
    stash: Vec<u8>,
    last_was_cr: bool,
    apply_backspace: bool,
    max_line_bytes: usize,
    eol: Bytes,
    pending: VecDeque<InputEvent>,
}

/// Outcome of looking at a sequence starting with IAC
#[derive(Debug, PartialEq, Eq)]
enum Command {
    /// Copy this many bytes to the out-of-band buffer
    Extract(usize),
    /// Consume this many bytes without output
    Skip(usize),
    /// Prefix of a command whose remaining bytes have not arrived
    Incomplete,
    /// Discard the IAC and classify the following bytes normally
    Noise,
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl LineCodec {
    /// Create a text mode codec with CRLF output and the default line bound
    pub fn new() -> Self {
        Self {
            mode: InputMode::Text,
            line: BytesMut::new(),
            stash: Vec::with_capacity(consts::MAX_STASH),
            last_was_cr: false,
            apply_backspace: false,
            max_line_bytes: consts::DEFAULT_MAX_LINE_BYTES,
            eol: Bytes::from_static(consts::DEFAULT_EOL),
            pending: VecDeque::new(),
        }
    }

    /// Set the output terminator
    pub fn with_eol(mut self, eol: impl Into<Bytes>) -> Self {
        self.eol = eol.into();
        self
    }

    /// Set the bound on an unterminated input line
    pub fn with_max_line_bytes(mut self, limit: usize) -> Self {
        self.max_line_bytes = limit;
        self
    }

    /// Treat BS and DEL as deleting the previous input byte
    pub fn with_backspace(mut self, enabled: bool) -> Self {
        self.apply_backspace = enabled;
        self
    }

    /// Current input mode
    pub fn mode(&self) -> InputMode {
        self.mode
    }

    /// Switch input mode. Already buffered partial input is kept.
    pub fn set_mode(&mut self, mode: InputMode) {
        self.mode = mode;
    }

    /// Output terminator
    pub fn eol(&self) -> &Bytes {
        &self.eol
    }

    /// Bytes of the current unterminated line
    pub fn buffered_len(&self) -> usize {
        self.line.len()
    }

    /// Whether decoded events are waiting to be taken
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Take the next decoded event
    pub fn next_event(&mut self) -> Option<InputEvent> {
        self.pending.pop_front()
    }

    /// Frame one read worth of input.
    ///
    /// Events are queued and taken with [`LineCodec::next_event`]. Fails when the
    /// unterminated remainder exceeds the configured bound; the events produced by
    /// this read are still queued in that case.
    pub fn feed(&mut self, input: &[u8]) -> LineCodecResult<()> {
        if input.is_empty() {
            return Ok(());
        }
        match self.mode {
            InputMode::Binary => self.feed_binary(input),
            InputMode::Text => self.feed_text(input),
        }
        if self.line.len() > self.max_line_bytes {
            debug!(
                length = self.line.len(),
                limit = self.max_line_bytes,
                "Unterminated input line over limit"
            );
            return Err(LineCodecError::LineTooLong {
                length: self.line.len(),
                limit: self.max_line_bytes,
            });
        }
        Ok(())
    }

    fn feed_binary(&mut self, input: &[u8]) {
        self.line.extend_from_slice(&self.stash);
        self.stash.clear();
        self.line.extend_from_slice(input);
        let chunk = self.line.split().freeze();
        self.pending.push_back(InputEvent::Line(chunk));
        self.last_was_cr = false;
    }

    fn feed_text(&mut self, input: &[u8]) {
        let joined;
        let data: &[u8] = if self.stash.is_empty() {
            input
        } else {
            let mut buf = std::mem::take(&mut self.stash);
            buf.extend_from_slice(input);
            joined = buf;
            &joined
        };

        let mut oob = BytesMut::new();
        let mut i = 0;
        while i < data.len() {
            let c = data[i];
            if c == IAC {
                match classify_command(&data[i..]) {
                    Command::Extract(n) => {
                        oob.extend_from_slice(&data[i..i + n]);
                        i += n;
                    }
                    Command::Skip(n) => i += n,
                    Command::Incomplete => {
                        self.stash.extend_from_slice(&data[i..]);
                        break;
                    }
                    Command::Noise => {
                        trace!("Discarding unterminated telnet command");
                        i += 1;
                    }
                }
                self.last_was_cr = false;
                continue;
            }

            if c.is_ascii_graphic() || c == b' ' || c == b'\t' {
                self.line.put_u8(c);
            } else if self.apply_backspace && (c == BS || c == DEL) {
                let len = self.line.len();
                self.line.truncate(len.saturating_sub(1));
            }

            if c == CR || (c == LF && !self.last_was_cr) {
                let line = self.line.split().freeze();
                self.pending.push_back(InputEvent::Line(line));
            }
            self.last_was_cr = c == CR;
            i += 1;
        }

        if !oob.is_empty() {
            self.pending.push_back(InputEvent::OutOfBand(oob.freeze()));
        }
    }

    /// Encode a block for the output queue
    pub fn encode_block(&self, frame: OutputFrame) -> Bytes {
        let mut dst = BytesMut::new();
        write_frame(&self.eol, frame, &mut dst);
        dst.freeze()
    }
}

fn classify_command(seq: &[u8]) -> Command {
    let Some(&cmd) = seq.get(1) else {
        return Command::Incomplete;
    };
    match cmd {
        c if consts::is_negotiation(c) => {
            if seq.len() >= 3 {
                Command::Extract(3)
            } else {
                Command::Incomplete
            }
        }
        SB => match seq[2..].windows(2).position(|w| w == [IAC, SE]) {
            Some(pos) => Command::Extract(pos + 4),
            None => Command::Noise,
        },
        IAC => Command::Skip(2),
        c if consts::is_simple_command(c) => Command::Extract(2),
        _ => Command::Noise,
    }
}

fn write_frame(eol: &[u8], frame: OutputFrame, dst: &mut BytesMut) {
    match frame {
        OutputFrame::Line(data) => {
            dst.reserve(data.len() + eol.len());
            dst.put_slice(&data);
            dst.put_slice(eol);
        }
        OutputFrame::Raw(data) => dst.put_slice(&data),
    }
}

impl Decoder for LineCodec {
    type Item = InputEvent;
    type Error = LineCodecError;

    /// Consumes everything in `src` as one read, then hands back queued events one at a time.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<InputEvent>, Self::Error> {
        if !src.is_empty() {
            let chunk = src.split();
            self.feed(&chunk)?;
        }
        Ok(self.pending.pop_front())
    }
}

impl Encoder<OutputFrame> for LineCodec {
    type Error = LineCodecError;

    fn encode(&mut self, item: OutputFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        write_frame(&self.eol, item, dst);
        Ok(())
    }
}
