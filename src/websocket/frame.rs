/*
 * frame.rs
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

//! WebSocket frame format (RFC 6455 §5): parser for receive (client frames,
//! masked), encoder for send (server frames, unmasked).

use bytes::{Buf, BufMut, BytesMut};
use std::io;

// Opcodes
pub const OP_CONTINUATION: u8 = 0;
pub const OP_TEXT: u8 = 1;
pub const OP_BINARY: u8 = 2;
pub const OP_CLOSE: u8 = 8;
pub const OP_PING: u8 = 9;
pub const OP_PONG: u8 = 10;

/// Max payload length we put in a single outbound frame (64 KiB).
/// Larger messages are split across CONTINUATION frames on send.
pub const MAX_FRAME_PAYLOAD: usize = 65536;

/// Callback for completed frames (receive path).
pub trait FrameHandler {
    fn frame(&mut self, opcode: u8, fin: bool, data: &[u8]);
}

/// Push parser for WebSocket frames (client → server: payload may be masked).
pub struct FrameParser {
    state: FrameState,
    opcode: u8,
    fin: bool,
    masked: bool,
    mask_key: [u8; 4],
    payload_len: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameState {
    Header1,
    ExtendedLen2,
    ExtendedLen8,
    MaskKey,
    Payload,
}

impl FrameParser {
    pub fn new() -> Self {
        Self {
            state: FrameState::Header1,
            opcode: 0,
            fin: false,
            masked: false,
            mask_key: [0u8; 4],
            payload_len: 0,
        }
    }

    /// Feed bytes from the stream. Returns Ok(()) when more data is needed or
    /// every complete frame in `buf` has been dispatched.  A frame is only
    /// dispatched once its whole declared payload has arrived; partial frames
    /// stay buffered and parsing resumes on the next call.
    pub fn receive<H: FrameHandler>(
        &mut self,
        buf: &mut BytesMut,
        handler: &mut H,
    ) -> Result<(), io::Error> {
        loop {
            match self.state {
                FrameState::Header1 => {
                    if buf.len() < 2 {
                        return Ok(());
                    }
                    let b0 = buf.get_u8();
                    let b1 = buf.get_u8();
                    self.fin = (b0 & 0x80) != 0;
                    self.opcode = b0 & 0x0f;
                    self.masked = (b1 & 0x80) != 0;
                    let len7 = b1 & 0x7f;
                    if len7 == 126 {
                        self.state = FrameState::ExtendedLen2;
                    } else if len7 == 127 {
                        self.state = FrameState::ExtendedLen8;
                    } else {
                        self.payload_len = len7 as u64;
                        self.state = self.after_length();
                    }
                }
                FrameState::ExtendedLen2 => {
                    if buf.len() < 2 {
                        return Ok(());
                    }
                    self.payload_len = buf.get_u16() as u64;
                    self.state = self.after_length();
                }
                FrameState::ExtendedLen8 => {
                    if buf.len() < 8 {
                        return Ok(());
                    }
                    let len = buf.get_u64();
                    // The high 32 bits are treated as reserved; a frame that
                    // actually uses them is refused rather than truncated.
                    if len > u32::MAX as u64 {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            "frame length above the 32-bit limit",
                        ));
                    }
                    self.payload_len = len;
                    self.state = self.after_length();
                }
                FrameState::MaskKey => {
                    if buf.len() < 4 {
                        return Ok(());
                    }
                    buf.copy_to_slice(&mut self.mask_key);
                    self.state = FrameState::Payload;
                }
                FrameState::Payload => {
                    let need = self.payload_len as usize;
                    if need == 0 {
                        // Empty payload (e.g. ping with no data)
                        handler.frame(self.opcode, self.fin, &[]);
                        self.state = FrameState::Header1;
                        continue;
                    }
                    if buf.len() < need {
                        return Ok(());
                    }
                    let mut payload = buf.split_to(need);
                    if self.masked {
                        apply_mask(&self.mask_key, &mut payload);
                    }
                    let is_control = self.opcode == OP_CLOSE
                        || self.opcode == OP_PING
                        || self.opcode == OP_PONG;
                    if is_control && payload.len() > 125 {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            "control frame payload too long",
                        ));
                    }
                    handler.frame(self.opcode, self.fin, &payload);
                    self.state = FrameState::Header1;
                    continue;
                }
            }
        }
    }

    fn after_length(&self) -> FrameState {
        if self.masked {
            FrameState::MaskKey
        } else {
            FrameState::Payload
        }
    }
}

/// XOR `data` in place with the repeating 4-byte mask key (RFC 6455 §5.3).
/// Applying the same key twice restores the original bytes.
pub fn apply_mask(mask_key: &[u8; 4], data: &mut [u8]) {
    for (i, b) in data.iter_mut().enumerate() {
        *b ^= mask_key[i % 4];
    }
}

/// Encode one frame for sending (server → client: never masked).
pub fn encode_frame(
    opcode: u8,
    fin: bool,
    payload: &[u8],
    out: &mut BytesMut,
) -> io::Result<()> {
    if payload.len() as u64 > u32::MAX as u64 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "payload above the 32-bit length limit",
        ));
    }
    let fin_bit: u8 = if fin { 0x80 } else { 0x00 };
    out.put_u8(fin_bit | (opcode & 0x0f));
    let len = payload.len();
    if len < 126 {
        out.put_u8(len as u8);
    } else if len < 65536 {
        out.put_u8(126);
        out.put_u16(len as u16);
    } else {
        // 64-bit length field; the high 32 bits are always zero here.
        out.put_u8(127);
        out.put_u64(len as u64);
    }
    out.put_slice(payload);
    Ok(())
}

// ============================================================
// Tests (can be run with cargo test)
// ============================================================
