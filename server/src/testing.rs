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

//! Scripted transport for exercising output and connection logic without a real peer.

use mio::net::UnixStream;
use mio::{Interest, Registry, Token};
use mooring_transport::{
    Progress, RetryPolicy, Transport, TransportError, TransportKind, TransportResult,
};
use std::collections::VecDeque;
use std::io;
use std::os::fd::{AsFd, BorrowedFd};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// One scripted response to a write
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteStep {
    /// Accept up to this many bytes
    Accept(usize),
    /// Refuse with would-block
    Block,
    /// Fail fatally
    Fail,
}

/// Transport whose writes follow a script; accepts everything once the script runs out
#[derive(Debug)]
pub struct ScriptedTransport {
    stream: UnixStream,
    _peer: UnixStream,
    policy: RetryPolicy,
    script: VecDeque<WriteStep>,
    refused: Option<Vec<u8>>,
    written: Vec<u8>,
    mismatches: usize,
    input: VecDeque<u8>,
    dropped: Arc<AtomicBool>,
}

impl ScriptedTransport {
    pub fn new(policy: RetryPolicy, steps: impl IntoIterator<Item = WriteStep>) -> Self {
        let (stream, peer) = UnixStream::pair().expect("socket pair");
        Self {
            stream,
            _peer: peer,
            policy,
            script: steps.into_iter().collect(),
            refused: None,
            written: Vec::new(),
            mismatches: 0,
            input: VecDeque::new(),
            dropped: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag set once the transport, and with it the socket, is dropped
    pub fn drop_flag(&self) -> Arc<AtomicBool> {
        self.dropped.clone()
    }

    pub fn push_steps(&mut self, steps: impl IntoIterator<Item = WriteStep>) {
        self.script.extend(steps);
    }

    pub fn set_steps(&mut self, steps: impl IntoIterator<Item = WriteStep>) {
        self.script = steps.into_iter().collect();
    }

    pub fn push_input(&mut self, data: &[u8]) {
        self.input.extend(data);
    }

    pub fn written(&self) -> &[u8] {
        &self.written
    }

    pub fn mismatches(&self) -> usize {
        self.mismatches
    }
}

impl Transport for ScriptedTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Plain
    }

    fn read(&mut self, buf: &mut [u8]) -> TransportResult<Progress> {
        if self.input.is_empty() {
            return Ok(Progress::WouldBlock);
        }
        let n = buf.len().min(self.input.len());
        for (slot, byte) in buf.iter_mut().zip(self.input.drain(..n)) {
            *slot = byte;
        }
        Ok(Progress::Transferred(n))
    }

    fn write(&mut self, buf: &[u8]) -> TransportResult<Progress> {
        if let Some(refused) = &self.refused {
            if refused.as_slice() != buf {
                self.mismatches += 1;
                return Err(TransportError::RetryMismatch {
                    expected_len: refused.len(),
                    actual_len: buf.len(),
                });
            }
        }
        match self.script.pop_front().unwrap_or(WriteStep::Accept(usize::MAX)) {
            WriteStep::Accept(n) => {
                let n = n.min(buf.len());
                self.written.extend_from_slice(&buf[..n]);
                self.refused = None;
                Ok(Progress::Transferred(n))
            }
            WriteStep::Block => {
                if self.policy == RetryPolicy::Identical {
                    self.refused = Some(buf.to_vec());
                }
                Ok(Progress::WouldBlock)
            }
            WriteStep::Fail => Err(io::Error::from(io::ErrorKind::BrokenPipe).into()),
        }
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.policy
    }
}

impl Drop for ScriptedTransport {
    fn drop(&mut self) {
        self.dropped.store(true, Ordering::SeqCst);
    }
}

impl AsFd for ScriptedTransport {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.stream.as_fd()
    }
}

impl mio::event::Source for ScriptedTransport {
    fn register(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        self.stream.register(registry, token, interests)
    }

    fn reregister(
        &mut self,
        registry: &Registry,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        self.stream.reregister(registry, token, interests)
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        self.stream.deregister(registry)
    }
}
