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

//! Callbacks from the event loop into the application

use crate::connection::ConnectionHandle;
use bytes::Bytes;

/// Application side of the network.
///
/// Every callback runs on the thread driving [`Network::process`](crate::Network::process).
/// The network keeps one reference to each connection for as long as it is open; a
/// session should refer to its connection by [`ConnectionId`](crate::ConnectionId) and
/// only hold a [`ConnectionHandle`] clone while it needs one, since a failed connection is
/// not torn down while other references remain.
pub trait NetworkHandler {
    /// Value given when a listener is created, passed back with its connections
    type ListenerTag: Clone;

    /// Per-connection application state
    type Session;

    /// A connection was accepted or opened
    fn new_connection(
        &mut self,
        listener: &Self::ListenerTag,
        connection: &ConnectionHandle,
        outbound: bool,
    ) -> Self::Session;

    /// A connection was accepted only to be turned away because no descriptors are left.
    /// Output queued here is flushed on a best-effort basis before the socket is closed.
    fn refuse_connection(&mut self, listener: &Self::ListenerTag, connection: &ConnectionHandle);

    /// A line, raw chunk (binary mode) or out-of-band block arrived
    fn deliver(
        &mut self,
        session: &mut Self::Session,
        connection: &ConnectionHandle,
        data: Bytes,
        out_of_band: bool,
    );

    /// The connection is gone; no further callbacks will mention it
    fn connection_closed(&mut self, session: Self::Session, connection: &ConnectionHandle);
}
