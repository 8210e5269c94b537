/*
 * server.rs
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

//! WebSocket server upgrade: read the HTTP request head from an accepted
//! stream, answer 101 Switching Protocols, return a WebSocketConnection.

use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::debug_log;
use crate::websocket::connection::WebSocketConnection;
use crate::websocket::handshake::{build_accept_response, parse_upgrade_request, UpgradeRequest};

/// WebSocket server side. Accept an upgraded connection with
/// `WebSocketServer::upgrade(stream)`.
pub struct WebSocketServer;

impl WebSocketServer {
    /// Read the HTTP request head from the stream, then complete the upgrade:
    /// derive the accept key, write the 101 response, and return a
    /// `WebSocketConnection`. Call `connected()` on your handler, then use
    /// `conn.run(handler)` to drive the read loop and `conn.sender()` /
    /// `conn.send_text()` etc. to send.
    pub async fn upgrade<S>(mut stream: S) -> io::Result<WebSocketConnection<S>>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut read_buf = Vec::with_capacity(4096);
        loop {
            let mut tmp = [0u8; 4096];
            let n = stream.read(&mut tmp).await?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed during handshake",
                ));
            }
            read_buf.extend_from_slice(&tmp[..n]);

            if let Some(result) = parse_upgrade_request(&read_buf) {
                let request = result?;
                // Any bytes after the HTTP headers are the start of WebSocket
                // frame data
                let leftover = read_buf[request.body_offset..].to_vec();
                return Self::upgrade_parsed(stream, &request, &leftover).await;
            }
        }
    }

    /// Complete an upgrade for a request head the caller has already read and
    /// parsed, e.g. after routing plain HTTP requests elsewhere. `leftover`
    /// is any frame data that arrived in the same reads as the head.
    pub async fn upgrade_parsed<S>(
        mut stream: S,
        request: &UpgradeRequest,
        leftover: &[u8],
    ) -> io::Result<WebSocketConnection<S>>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if !request.upgrade {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "not a websocket upgrade request",
            ));
        }
        let key = request.key.as_deref().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidData, "missing Sec-WebSocket-Key")
        })?;

        let response = build_accept_response(key);
        stream.write_all(&response).await?;
        stream.flush().await?;

        if !leftover.is_empty() {
            debug_log!("[ws] handshake leftover: {} bytes", leftover.len());
        }
        Ok(WebSocketConnection::new(stream, leftover))
    }
}
