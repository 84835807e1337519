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

//! Readiness registration shared by listeners, connections and external descriptors

use mio::event::Source;
use mio::{Interest, Registry, Token};
use std::io;

/// Something the driver waits on each pass
pub trait Pollable {
    /// Token its readiness events carry
    fn token(&self) -> Token;

    /// Bring the poller's interest set in line with what the source currently needs
    fn sync_interest(&mut self, registry: &Registry) -> io::Result<()>;

    /// Withdraw from the poller
    fn deregister(&mut self, registry: &Registry) -> io::Result<()>;
}

/// Tracks what a source is registered for so interest changes are only pushed when needed
#[derive(Debug)]
pub struct Registration {
    token: Token,
    current: Option<Interest>,
}

impl Registration {
    /// Unregistered state for `token`
    pub fn new(token: Token) -> Self {
        Self {
            token,
            current: None,
        }
    }

    /// Token
    pub fn token(&self) -> Token {
        self.token
    }

    /// Interest currently registered
    pub fn current(&self) -> Option<Interest> {
        self.current
    }

    /// Register, reregister or deregister `source` to match `desired`
    pub fn sync<S>(
        &mut self,
        registry: &Registry,
        source: &mut S,
        desired: Option<Interest>,
    ) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        match (self.current, desired) {
            (None, Some(interest)) => registry.register(source, self.token, interest)?,
            (Some(current), Some(interest)) if current != interest => {
                registry.reregister(source, self.token, interest)?
            }
            (Some(_), None) => registry.deregister(source)?,
            _ => {}
        }
        self.current = desired;
        Ok(())
    }

    /// Deregister if registered
    pub fn clear<S>(&mut self, registry: &Registry, source: &mut S) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        self.sync(registry, source, None)
    }
}

/// Combine optional read and write interest
pub fn interest_for(readable: bool, writable: bool) -> Option<Interest> {
    match (readable, writable) {
        (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
        (true, false) => Some(Interest::READABLE),
        (false, true) => Some(Interest::WRITABLE),
        (false, false) => None,
    }
}
