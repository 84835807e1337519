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

//! Per-connection output queue with overflow policy.
//!
//! Blocks are written strictly in enqueue order. When the byte budget would be exceeded
//! the oldest blocks are dropped and counted; before output resumes a notice announcing
//! the loss is written at the next block boundary.
//!
//! Transports with [`RetryPolicy::Identical`] must see a refused write offered again
//! byte for byte. The queue records the refused segment in [`RetryState`] and pins it:
//! it is never dropped, and no notice is inserted ahead of it. A notice that has been
//! synthesized is frozen and resent verbatim; losses after that point are announced by
//! a later notice.

use bytes::Bytes;
use mooring_linecodec::overflow_notice;
use mooring_transport::{Progress, RetryPolicy, Transport, TransportResult};
use std::collections::VecDeque;

/// Part of the output stream a write was attempted for
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Segment {
    /// The overflow notice
    Notice,
    /// A queued block, by sequence number
    Block(u64),
}

/// Constraint left behind by a refused write
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryState {
    /// The next write may offer anything
    Idle,
    /// The next write must offer `len` bytes of `segment` starting at `offset`
    AwaitingRetry {
        /// Segment that was refused
        segment: Segment,
        /// Cursor within the segment
        offset: usize,
        /// Bytes offered
        len: usize,
    },
}

/// Result of admitting a block
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Block appended after dropping `dropped` older blocks
    Queued {
        /// Older blocks removed to make room
        dropped: u64,
    },
    /// No room could be made; the new block was dropped along with `dropped` older ones
    Discarded {
        /// Older blocks removed before giving up
        dropped: u64,
    },
    /// Over budget and dropping was not allowed; nothing changed
    Refused,
}

impl EnqueueOutcome {
    /// Whether the caller's request succeeded
    pub fn is_accepted(self) -> bool {
        !matches!(self, EnqueueOutcome::Refused)
    }

    /// Lines lost by this call, including the new block if it was discarded
    pub fn lines_lost(self) -> u64 {
        match self {
            EnqueueOutcome::Queued { dropped } => dropped,
            EnqueueOutcome::Discarded { dropped } => dropped + 1,
            EnqueueOutcome::Refused => 0,
        }
    }
}

/// What a flush accomplished
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FlushReport {
    /// Bytes accepted by the transport, notice included
    pub written: usize,
    /// Whether everything, notice included, was written
    pub drained: bool,
}

#[derive(Debug)]
struct OutputBlock {
    seq: u64,
    data: Bytes,
    cursor: usize,
}

impl OutputBlock {
    fn remaining(&self) -> &[u8] {
        &self.data[self.cursor..]
    }

    fn remaining_len(&self) -> usize {
        self.data.len() - self.cursor
    }
}

#[derive(Debug)]
struct PendingNotice {
    data: Bytes,
    cursor: usize,
    covers: u64,
}

/// Ordered, budgeted queue of output blocks for one connection
#[derive(Debug)]
pub struct OutputQueue {
    blocks: VecDeque<OutputBlock>,
    total: usize,
    budget: usize,
    lines_flushed: u64,
    notice: Option<PendingNotice>,
    retry: RetryState,
    next_seq: u64,
    eol: Bytes,
}

impl OutputQueue {
    /// Create a queue holding at most `budget` unwritten bytes, using `eol` in notices
    pub fn new(budget: usize, eol: Bytes) -> Self {
        Self {
            blocks: VecDeque::new(),
            total: 0,
            budget,
            lines_flushed: 0,
            notice: None,
            retry: RetryState::Idle,
            next_seq: 0,
            eol,
        }
    }

    /// Unwritten bytes across all queued blocks
    pub fn len(&self) -> usize {
        self.total
    }

    /// Whether no blocks are queued
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Number of queued blocks
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Whether anything, including an overflow notice, is waiting to be written
    pub fn has_output(&self) -> bool {
        !self.blocks.is_empty() || self.notice.is_some() || self.lines_flushed > 0
    }

    /// Lines lost that have not yet been announced
    pub fn lines_flushed(&self) -> u64 {
        self.lines_flushed
    }

    /// Byte budget
    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Current retry constraint
    pub fn retry_state(&self) -> RetryState {
        self.retry
    }

    /// Whether admitting `len` more bytes would exceed the budget
    pub fn would_overflow(&self, len: usize) -> bool {
        self.total + len > self.budget
    }

    /// Admit a block.
    ///
    /// Over budget with `allow_drop` unset, nothing changes and [`EnqueueOutcome::Refused`]
    /// is returned. Otherwise the oldest droppable blocks are removed until the new block
    /// fits; if it still cannot fit, it is dropped too. Either way the queued total never
    /// ends above the budget.
    pub fn enqueue(&mut self, data: Bytes, allow_drop: bool) -> EnqueueOutcome {
        if data.is_empty() {
            return EnqueueOutcome::Queued { dropped: 0 };
        }
        let len = data.len();
        let mut dropped = 0;
        if self.would_overflow(len) {
            if !allow_drop {
                return EnqueueOutcome::Refused;
            }
            while self.would_overflow(len) {
                let Some(index) = self.first_droppable() else {
                    break;
                };
                if let Some(block) = self.blocks.remove(index) {
                    self.total -= block.remaining_len();
                    dropped += 1;
                }
            }
            self.lines_flushed += dropped;
            if self.would_overflow(len) {
                self.lines_flushed += 1;
                return EnqueueOutcome::Discarded { dropped };
            }
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.total += len;
        self.blocks.push_back(OutputBlock {
            seq,
            data,
            cursor: 0,
        });
        EnqueueOutcome::Queued { dropped }
    }

    fn is_pinned(&self, block: &OutputBlock) -> bool {
        block.cursor > 0
            || matches!(
                self.retry,
                RetryState::AwaitingRetry { segment: Segment::Block(seq), .. } if seq == block.seq
            )
    }

    fn first_droppable(&self) -> Option<usize> {
        let start = match self.blocks.front() {
            Some(head) if self.is_pinned(head) => 1,
            _ => 0,
        };
        (start < self.blocks.len()).then_some(start)
    }

    fn at_block_boundary(&self) -> bool {
        self.blocks.front().is_none_or(|head| !self.is_pinned(head))
    }

    /// Write as much as the transport accepts.
    ///
    /// Returns once everything is written or the transport would block. Errors are
    /// fatal for the connection.
    pub fn flush(&mut self, transport: &mut dyn Transport) -> TransportResult<FlushReport> {
        let identical = transport.retry_policy() == RetryPolicy::Identical;
        let mut written = 0;
        loop {
            if self.notice.is_none() && self.lines_flushed > 0 && self.at_block_boundary() {
                let covers = self.lines_flushed;
                self.notice = Some(PendingNotice {
                    data: overflow_notice(covers, &self.eol),
                    cursor: 0,
                    covers,
                });
            }

            let (segment, offset, bytes) = match (&self.notice, self.blocks.front()) {
                (Some(notice), _) => (Segment::Notice, notice.cursor, &notice.data[notice.cursor..]),
                (None, Some(block)) => (Segment::Block(block.seq), block.cursor, block.remaining()),
                (None, None) => {
                    return Ok(FlushReport {
                        written,
                        drained: true,
                    });
                }
            };
            let len = bytes.len();
            if let RetryState::AwaitingRetry {
                segment: pinned,
                offset: pinned_offset,
                len: pinned_len,
            } = self.retry
            {
                debug_assert!(
                    pinned == segment && pinned_offset == offset && pinned_len == len,
                    "refused write must be retried with the same bytes"
                );
            }

            match transport.write(bytes)? {
                Progress::Transferred(n) if n > 0 => {
                    self.retry = RetryState::Idle;
                    written += n;
                    self.advance(segment, n);
                }
                _ => {
                    if identical {
                        self.retry = RetryState::AwaitingRetry {
                            segment,
                            offset,
                            len,
                        };
                    }
                    return Ok(FlushReport {
                        written,
                        drained: false,
                    });
                }
            }
        }
    }

    fn advance(&mut self, segment: Segment, n: usize) {
        match segment {
            Segment::Notice => {
                if let Some(notice) = &mut self.notice {
                    notice.cursor += n;
                    if notice.cursor >= notice.data.len() {
                        self.lines_flushed = self.lines_flushed.saturating_sub(notice.covers);
                        self.notice = None;
                    }
                }
            }
            Segment::Block(_) => {
                if let Some(block) = self.blocks.front_mut() {
                    block.cursor += n;
                    self.total -= n;
                    if block.cursor >= block.data.len() {
                        self.blocks.pop_front();
                    }
                }
            }
        }
    }

    /// Discard everything
    pub fn clear(&mut self) {
        self.blocks.clear();
        self.total = 0;
        self.notice = None;
        self.lines_flushed = 0;
        self.retry = RetryState::Idle;
    }
}
