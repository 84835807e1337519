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

//! # Mooring Line Codec
//!
//! Framing for the line-oriented protocol spoken by interactive multi-user servers.
//!
//! Incoming bytes are split into lines on CR, LF or CRLF. Telnet commands embedded in
//! the stream (negotiation, subnegotiation and the two byte commands) are lifted out and
//! delivered separately so that the application sees clean text. A connection can also be
//! put in binary mode, where every read is passed through untouched.
//!
//! ## Usage Example
//!
//! ```rust
//! use mooring_linecodec::{InputEvent, LineCodec};
//!
//! let mut codec = LineCodec::new();
//! codec.feed(b"hello\r\nwor").unwrap();
//! codec.feed(b"ld\n").unwrap();
//! assert_eq!(codec.next_event(), Some(InputEvent::Line("hello".into())));
//! assert_eq!(codec.next_event(), Some(InputEvent::Line("world".into())));
//! assert_eq!(codec.next_event(), None);
//! ```
//!
//! [`LineCodec`] also implements [`tokio_util::codec::Decoder`] and
//! [`tokio_util::codec::Encoder`] so it can sit behind a framed reader or writer.

pub mod consts;

mod codec;
mod event;
mod notice;
mod result;

pub use codec::LineCodec;
pub use event::{InputEvent, InputMode, OutputFrame};
pub use notice::{echo_command, overflow_notice};
pub use result::{LineCodecError, LineCodecResult};
