/*
 * handshake.rs
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

//! WebSocket opening handshake (RFC 6455 §4), server side: parse the upgrade
//! request, derive Sec-WebSocket-Accept from the client key, build the 101.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use std::io;

/// Magic string for Sec-WebSocket-Accept (RFC 6455 §4.2.2).
const WS_ACCEPT_MAGIC: &[u8] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Compute Sec-WebSocket-Accept from the client's base64-encoded key:
/// SHA-1 over key + magic GUID, then standard base64.
pub fn derive_accept(key_base64: &str) -> String {
    use sha1::{Digest, Sha1};
    let mut hasher = Sha1::new();
    hasher.update(key_base64.as_bytes());
    hasher.update(WS_ACCEPT_MAGIC);
    let digest = hasher.finalize();
    BASE64.encode(digest.as_slice())
}

/// Build the 101 Switching Protocols response. Caller writes this to the
/// stream before any frame traffic.
pub fn build_accept_response(key_base64: &str) -> Vec<u8> {
    let accept = derive_accept(key_base64);
    let mut resp = Vec::new();
    resp.extend_from_slice(b"HTTP/1.1 101 Switching Protocols\r\n");
    resp.extend_from_slice(b"Upgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: ");
    resp.extend_from_slice(accept.as_bytes());
    resp.extend_from_slice(b"\r\n\r\n");
    resp
}

/// Minimal upgrade-request parse result.  Only the fields the server needs:
/// the request path (for routing plain HTTP), whether this is a websocket
/// upgrade, and the client key.
pub struct UpgradeRequest {
    pub path: String,
    pub upgrade: bool,
    pub key: Option<String>,
    /// Byte offset where WebSocket frame data begins in the input buffer.
    pub body_offset: usize,
}

/// Parse an HTTP request head from a buffer.
/// Looks for the request line, extracts the headers we care about, stops at
/// the empty CRLF line.  Returns None if the head is not yet complete (need
/// more data).  On success, `body_offset` indicates where frame data starts.
pub fn parse_upgrade_request(buf: &[u8]) -> Option<io::Result<UpgradeRequest>> {
    let crlf2_pos = find_header_end(buf)?;
    let body_offset = crlf2_pos + 4; // skip past \r\n\r\n
    let header_bytes = &buf[..crlf2_pos];
    let header_str = match std::str::from_utf8(header_bytes) {
        Ok(s) => s,
        Err(_) => {
            return Some(Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "invalid UTF-8 in HTTP request",
            )))
        }
    };

    let mut lines = header_str.split("\r\n");

    // Request line: GET /path HTTP/1.1
    let request_line = match lines.next() {
        Some(l) => l,
        None => {
            return Some(Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "empty HTTP request",
            )))
        }
    };
    let parts: Vec<&str> = request_line.splitn(3, ' ').collect();
    let path = parts.get(1).unwrap_or(&"/").to_string();

    // Headers
    let mut upgrade = false;
    let mut key: Option<String> = None;
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some(colon) = line.find(':') {
            let name = line[..colon].trim();
            let value = line[colon + 1..].trim();
            if name.eq_ignore_ascii_case("Upgrade") && value.eq_ignore_ascii_case("websocket") {
                upgrade = true;
            } else if name.eq_ignore_ascii_case("Sec-WebSocket-Key") {
                key = Some(value.to_string());
            }
        }
    }

    Some(Ok(UpgradeRequest { path, upgrade, key, body_offset }))
}

/// Find \r\n\r\n in buffer. Returns the offset of the first \r in \r\n\r\n.
fn find_header_end(buf: &[u8]) -> Option<usize> {
    if buf.len() < 4 {
        return None;
    }
    for i in 0..buf.len() - 3 {
        if buf[i] == b'\r' && buf[i + 1] == b'\n' && buf[i + 2] == b'\r' && buf[i + 3] == b'\n' {
            return Some(i);
        }
    }
    None
}

// ============================================================
// Tests (can be run with cargo test)
// ============================================================
