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

//! Direct socket transport

use crate::{Progress, Transport, TransportKind, TransportResult};
use mio::event::Source;
use mio::{Interest, Registry, Token};
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, BorrowedFd};
use tracing::trace;

/// Transport that moves bytes straight between the caller and the socket
#[derive(Debug)]
pub struct PlainTransport<S> {
    stream: S,
}

impl<S> PlainTransport<S> {
    /// Wrap a non-blocking stream
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    /// Underlying stream
    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    /// Unwrap the stream
    pub fn into_inner(self) -> S {
        self.stream
    }
}

/// Map a socket call result to the transport contract
pub(crate) fn classify(result: io::Result<usize>) -> TransportResult<Progress> {
    match result {
        Ok(n) => Ok(Progress::Transferred(n)),
        Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(Progress::WouldBlock),
        Err(err) if err.kind() == io::ErrorKind::Interrupted => Ok(Progress::WouldBlock),
        Err(err) => Err(err.into()),
    }
}

impl<S> Transport for PlainTransport<S>
where
    S: Read + Write + Source + AsFd + Send + std::fmt::Debug,
{
    fn kind(&self) -> TransportKind {
        TransportKind::Plain
    }

    fn read(&mut self, buf: &mut [u8]) -> TransportResult<Progress> {
        let progress = classify(self.stream.read(buf))?;
        trace!(?progress, "plain read");
        Ok(progress)
    }

    fn write(&mut self, buf: &[u8]) -> TransportResult<Progress> {
        if buf.is_empty() {
            return Ok(Progress::Transferred(0));
        }
        match classify(self.stream.write(buf))? {
            Progress::Transferred(0) => Err(io::Error::from(io::ErrorKind::WriteZero).into()),
            progress => Ok(progress),
        }
    }
}

impl<S: AsFd> AsFd for PlainTransport<S> {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.stream.as_fd()
    }
}

impl<S: Source> Source for PlainTransport<S> {
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
