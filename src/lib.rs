/*
 * lib.rs
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

//! Tern: a lightweight WebSocket server (RFC 6455) on top of any tokio byte
//! stream.  The `websocket` module carries the whole protocol: upgrade
//! handshake, frame codec with masking, fragmentation/reassembly, and the
//! ping/pong/close control handshake.  Everything above the message boundary
//! (listening, routing, application logic) belongs to the caller.

pub mod debug;
pub mod websocket;
