/*
 * mod.rs
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

//! WebSocket server (RFC 6455): HTTP/1.1 upgrade handshake, then frame-based
//! send/recv with fragmentation and the ping/pong/close control handshake.
//! Callback-based API: implement WebSocketHandler to receive messages.

pub mod connection;
pub mod frame;
mod handler;
pub mod handshake;
mod server;

pub use connection::{WebSocketConnection, WebSocketSender, DEFAULT_KEEPALIVE_INTERVAL};
pub use handler::WebSocketHandler;
pub use server::WebSocketServer;
