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

//! Error types for the line codec

use thiserror::Error;

/// Result type for codec operations
pub type LineCodecResult<T> = Result<T, LineCodecError>;

/// Errors raised while framing input
#[derive(Debug, Error)]
pub enum LineCodecError {
    /// I/O error surfaced through a framed reader
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer kept sending without a terminator past the configured bound
    #[error("Unterminated line of {length} bytes exceeds limit of {limit}")]
    LineTooLong {
        /// Bytes currently buffered
        length: usize,
        /// Configured bound
        limit: usize,
    },
}

impl LineCodecError {
    /// Check if the error was caused by the remote peer rather than local I/O
    pub fn is_peer_fault(&self) -> bool {
        matches!(self, LineCodecError::LineTooLong { .. })
    }
}
