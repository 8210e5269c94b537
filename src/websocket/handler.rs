/*
 * handler.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Tern, a lightweight WebSocket server.
 *
 * Tern is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Tern is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Tern.  If not, see <http://www.gnu.org/licenses/>.
 */

//! WebSocket handler trait (callback-based). The connection delivers whole
//! messages: fragmented frames are reassembled before any callback fires, and
//! control frames never surface as messages.

/// Handler for WebSocket events (push model). Connection drives this as
/// messages arrive.
pub trait WebSocketHandler {
    /// Handshake succeeded; connection is now in WebSocket frame mode.
    fn connected(&mut self) {}

    /// Complete text message. Data is valid only for the duration of the call.
    fn text_message(&mut self, text: &str);

    /// Complete binary message.
    fn binary_message(&mut self, data: &[u8]);

    /// Pong received (e.g. in response to a keepalive ping). Useful for
    /// liveness bookkeeping; ignored by default.
    fn pong(&mut self, _data: &[u8]) {}

    /// Close handshake completed, or the transport went away.  Code and
    /// reason are those of the peer's close frame when there was one.
    /// Fires at most once per connection.
    fn closed(&mut self, code: Option<u16>, reason: &str);

    /// Transport-level error.  The connection still reports `closed` for
    /// teardown afterwards.
    fn failed(&mut self, error: &std::io::Error);

    /// If true, the connection's run() loop will exit after the current
    /// event. Default false.
    fn should_stop(&self) -> bool {
        false
    }
}
