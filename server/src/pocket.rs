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

//! Reserved descriptors for refusing connections when the descriptor table is full.
//!
//! The pool holds descriptors open on `/dev/null`. When accept fails because no
//! descriptor is free, one pocket descriptor is closed, the pending connection is
//! accepted into the freed slot and refused, and the pocket is refilled.

use crate::error::{NetworkError, Result};
use std::fs::File;
use std::io;
use std::os::fd::OwnedFd;
use tracing::{debug, error};

const POCKET_PATH: &str = "/dev/null";

/// Pool of reserved descriptors
#[derive(Debug)]
pub struct PocketPool {
    capacity: usize,
    held: Vec<OwnedFd>,
}

impl PocketPool {
    /// Reserve `capacity` descriptors; failure here means the process cannot degrade
    /// gracefully under descriptor exhaustion
    pub fn reserve(capacity: usize) -> Result<Self> {
        let mut pool = Self {
            capacity,
            held: Vec::with_capacity(capacity),
        };
        pool.refill().map_err(NetworkError::PocketUnavailable)?;
        debug!(capacity, "Pocket descriptors reserved");
        Ok(pool)
    }

    /// Descriptors currently held
    pub fn available(&self) -> usize {
        self.held.len()
    }

    /// Configured size
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Close one held descriptor, freeing its slot. Returns false when none are held.
    pub fn release_one(&mut self) -> bool {
        self.held.pop().is_some()
    }

    /// Reopen descriptors until the pool is full again
    pub fn refill(&mut self) -> io::Result<()> {
        while self.held.len() < self.capacity {
            let file = File::open(POCKET_PATH).inspect_err(|err| {
                error!(error = %err, held = self.held.len(), "Unable to refill pocket descriptors");
            })?;
            self.held.push(OwnedFd::from(file));
        }
        Ok(())
    }
}
