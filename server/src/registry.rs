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

//! Descriptors owned by other subsystems that want callbacks from the same readiness pass

use crate::poll::{Pollable, Registration, interest_for};
use mio::unix::SourceFd;
use mio::{Registry, Token};
use std::fmt;
use std::io;
use std::os::fd::RawFd;

/// What to do with a registration after its callback ran
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FdDisposition {
    /// Keep watching
    Keep,
    /// Withdraw the descriptor
    Unregister,
}

/// Callback invoked with the ready descriptor
pub type FdCallback = Box<dyn FnMut(RawFd) -> FdDisposition>;

/// One registered descriptor
pub struct FdRegistration {
    fd: RawFd,
    on_readable: Option<FdCallback>,
    on_writable: Option<FdCallback>,
    registration: Registration,
}

impl FdRegistration {
    pub(crate) fn new(
        fd: RawFd,
        token: Token,
        on_readable: Option<FdCallback>,
        on_writable: Option<FdCallback>,
    ) -> Self {
        Self {
            fd,
            on_readable,
            on_writable,
            registration: Registration::new(token),
        }
    }

    /// Watched descriptor
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// Run the callbacks matching the reported readiness. Returns the combined disposition.
    pub(crate) fn dispatch(&mut self, readable: bool, writable: bool) -> FdDisposition {
        if readable {
            if let Some(callback) = self.on_readable.as_mut() {
                if callback(self.fd) == FdDisposition::Unregister {
                    return FdDisposition::Unregister;
                }
            }
        }
        if writable {
            if let Some(callback) = self.on_writable.as_mut() {
                if callback(self.fd) == FdDisposition::Unregister {
                    return FdDisposition::Unregister;
                }
            }
        }
        FdDisposition::Keep
    }
}

impl fmt::Debug for FdRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FdRegistration")
            .field("fd", &self.fd)
            .field("readable", &self.on_readable.is_some())
            .field("writable", &self.on_writable.is_some())
            .finish()
    }
}

impl Pollable for FdRegistration {
    fn token(&self) -> Token {
        self.registration.token()
    }

    fn sync_interest(&mut self, registry: &Registry) -> io::Result<()> {
        let desired = interest_for(self.on_readable.is_some(), self.on_writable.is_some());
        self.registration
            .sync(registry, &mut SourceFd(&self.fd), desired)
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        self.registration.clear(registry, &mut SourceFd(&self.fd))
    }
}
