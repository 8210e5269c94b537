/*
 * connection.rs
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

//! WebSocket connection: owns the stream after the upgrade, drives the frame
//! parser, reassembles fragmented messages, answers pings, completes the close
//! handshake, and serializes every outbound write through its run loop.

use bytes::BytesMut;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::debug_log;
use crate::warn_log;
use crate::websocket::frame::{
    encode_frame, FrameHandler, FrameParser, MAX_FRAME_PAYLOAD, OP_BINARY, OP_CLOSE,
    OP_CONTINUATION, OP_PING, OP_PONG, OP_TEXT,
};
use crate::websocket::WebSocketHandler;

/// Payload carried by keepalive pings.
const KEEPALIVE_BODY: &[u8] = b"keepalive";

/// Default keepalive period, for callers that don't want to pick one.
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Close status for protocol violations (RFC 6455 §7.4.1).
const CLOSE_PROTOCOL_ERROR: u16 = 1002;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    /// Frames flow both ways.
    Open,
    /// We sent a close frame and are waiting for the peer's echo or EOF.
    Closing,
    /// Terminal. No frames are parsed or sent past this point.
    Closed,
}

enum Outbound {
    Text(String),
    Binary(Vec<u8>),
    Close(Option<u16>, String),
}

enum RunEvent {
    Data(io::Result<usize>),
    Outbound(Outbound),
    Keepalive,
}

/// WebSocket connection after a successful upgrade. Use run() to drive the
/// read loop with a handler; use send_text/send_binary/send_json/send_ping to
/// send directly, or sender() for a cloneable handle that queues sends into
/// the run loop (the way a handler replies from inside a callback).
pub struct WebSocketConnection<S> {
    stream: S,
    read_buf: BytesMut,
    frame_parser: FrameParser,
    reassembly_buf: BytesMut,
    /// Opcode from the first frame of an in-progress fragmented message;
    /// 0 (CONTINUATION) when no fragmentation sequence is in progress.
    reassembly_opcode: u8,
    state: ConnState,
    keepalive_interval: Option<Duration>,
    out_tx: mpsc::UnboundedSender<Outbound>,
    out_rx: mpsc::UnboundedReceiver<Outbound>,
}

/// Cloneable sending handle. Sends are queued and written by the connection's
/// run loop, so handlers can reply to messages without a second writer on the
/// stream. Queued sends are dropped once the connection has closed.
#[derive(Clone)]
pub struct WebSocketSender {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl WebSocketSender {
    /// Queue a text message.
    pub fn send_text(&self, text: &str) {
        let _ = self.tx.send(Outbound::Text(text.to_string()));
    }

    /// Queue a binary message.
    pub fn send_binary(&self, data: &[u8]) {
        let _ = self.tx.send(Outbound::Binary(data.to_vec()));
    }

    /// Queue a JSON value, sent as a text message.
    pub fn send_json(&self, value: &json::JsonValue) {
        let _ = self.tx.send(Outbound::Text(value.dump()));
    }

    /// Queue a close handshake (code is optional, e.g. 1000 = normal).
    pub fn close(&self, code: Option<u16>, reason: &str) {
        let _ = self.tx.send(Outbound::Close(code, reason.to_string()));
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> WebSocketConnection<S> {
    pub(crate) fn new(stream: S, initial_data: &[u8]) -> Self {
        let mut read_buf = BytesMut::with_capacity(8192);
        if !initial_data.is_empty() {
            read_buf.extend_from_slice(initial_data);
        }
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        Self {
            stream,
            read_buf,
            frame_parser: FrameParser::new(),
            reassembly_buf: BytesMut::new(),
            reassembly_opcode: OP_CONTINUATION,
            state: ConnState::Open,
            keepalive_interval: None,
            out_tx,
            out_rx,
        }
    }

    /// A handle for queueing sends into this connection's run loop.
    pub fn sender(&self) -> WebSocketSender {
        WebSocketSender { tx: self.out_tx.clone() }
    }

    /// Arm the keepalive driver: run() will send a ping immediately and then
    /// every `interval` until the connection closes. The timer lives inside
    /// run(), so it is gone the moment run() returns.
    pub fn keepalive(&mut self, interval: Duration) {
        self.keepalive_interval = Some(interval);
    }

    /// Run the event loop: read frames, dispatch messages to the handler,
    /// write queued sends and keepalive pings. Returns when the connection
    /// closes (either side), on a transport error (handler.failed is called
    /// before return), or when handler.should_stop() is true.
    pub async fn run(&mut self, handler: &mut (dyn WebSocketHandler + Send)) -> io::Result<()> {
        // Process any frame data that arrived with the handshake
        if !self.read_buf.is_empty() {
            debug_log!("[ws] processing {} leftover bytes", self.read_buf.len());
            self.process_frames(handler).await?;
            if self.state == ConnState::Closed || handler.should_stop() {
                return Ok(());
            }
        }
        let mut keepalive = self.keepalive_interval.map(tokio::time::interval);
        debug_log!("[ws] entering read loop");
        loop {
            let mut tmp = [0u8; 8192];
            let event = match keepalive.as_mut() {
                Some(timer) => tokio::select! {
                    r = self.stream.read(&mut tmp) => RunEvent::Data(r),
                    out = self.out_rx.recv() => {
                        match out {
                            Some(o) => RunEvent::Outbound(o),
                            None => continue,
                        }
                    },
                    _ = timer.tick() => RunEvent::Keepalive,
                },
                None => tokio::select! {
                    r = self.stream.read(&mut tmp) => RunEvent::Data(r),
                    out = self.out_rx.recv() => {
                        match out {
                            Some(o) => RunEvent::Outbound(o),
                            None => continue,
                        }
                    },
                },
            };
            match event {
                RunEvent::Data(Ok(0)) => {
                    debug_log!("[ws] stream EOF");
                    self.transport_closed(handler);
                    return Ok(());
                }
                RunEvent::Data(Ok(n)) => {
                    debug_log!("[ws] read {} bytes from stream (buf now {})", n, self.read_buf.len() + n);
                    self.read_buf.extend_from_slice(&tmp[..n]);
                    self.process_frames(handler).await?;
                    if self.state == ConnState::Closed || handler.should_stop() {
                        return Ok(());
                    }
                }
                RunEvent::Data(Err(e)) => {
                    warn_log!("[ws] stream read error: {}", e);
                    handler.failed(&e);
                    self.transport_closed(handler);
                    return Err(e);
                }
                RunEvent::Outbound(Outbound::Text(text)) => {
                    self.send_message(OP_TEXT, text.as_bytes()).await?;
                }
                RunEvent::Outbound(Outbound::Binary(data)) => {
                    self.send_message(OP_BINARY, &data).await?;
                }
                RunEvent::Outbound(Outbound::Close(code, reason)) => {
                    self.close(code, &reason).await?;
                }
                RunEvent::Keepalive => {
                    debug_log!("[ws] keepalive ping");
                    self.write_frame(OP_PING, true, KEEPALIVE_BODY).await?;
                }
            }
        }
    }

    /// Send a text message (fragmented if it exceeds the per-frame maximum).
    pub async fn send_text(&mut self, text: &str) -> io::Result<()> {
        self.send_message(OP_TEXT, text.as_bytes()).await
    }

    /// Send a binary message.
    pub async fn send_binary(&mut self, data: &[u8]) -> io::Result<()> {
        self.send_message(OP_BINARY, data).await
    }

    /// Send a JSON value as a text message.
    pub async fn send_json(&mut self, value: &json::JsonValue) -> io::Result<()> {
        self.send_message(OP_TEXT, value.dump().as_bytes()).await
    }

    /// Send a ping frame.
    pub async fn send_ping(&mut self, data: &[u8]) -> io::Result<()> {
        if data.len() > 125 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "ping payload max 125 bytes",
            ));
        }
        if self.state == ConnState::Closed {
            return Ok(());
        }
        self.write_frame(OP_PING, true, data).await
    }

    /// Initiate the close handshake. Reason is UTF-8; code is optional
    /// (e.g. 1000 = normal). The connection stays in run() until the peer
    /// echoes the close frame or the transport ends.
    pub async fn close(&mut self, code: Option<u16>, reason: &str) -> io::Result<()> {
        if self.state != ConnState::Open {
            return Ok(());
        }
        let mut payload = Vec::new();
        if let Some(c) = code {
            payload.extend_from_slice(&c.to_be_bytes());
        }
        payload.extend_from_slice(reason.as_bytes());
        if payload.len() > 125 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "close payload max 125 bytes",
            ));
        }
        self.write_frame(OP_CLOSE, true, &payload).await?;
        self.state = ConnState::Closing;
        Ok(())
    }

    /// Write one message, splitting it into continuation frames when it is
    /// larger than MAX_FRAME_PAYLOAD: first chunk carries the real opcode,
    /// the rest are CONTINUATION, only the last has FIN set.
    async fn send_message(&mut self, opcode: u8, payload: &[u8]) -> io::Result<()> {
        if self.state == ConnState::Closed {
            debug_log!("[ws] dropping {} byte send on closed connection", payload.len());
            return Ok(());
        }
        if payload.len() <= MAX_FRAME_PAYLOAD {
            return self.write_frame(opcode, true, payload).await;
        }
        let mut offset = 0;
        let mut first = true;
        while offset < payload.len() {
            let end = usize::min(offset + MAX_FRAME_PAYLOAD, payload.len());
            let fin = end == payload.len();
            let op = if first { opcode } else { OP_CONTINUATION };
            self.write_frame(op, fin, &payload[offset..end]).await?;
            first = false;
            offset = end;
        }
        Ok(())
    }

    async fn write_frame(&mut self, opcode: u8, fin: bool, payload: &[u8]) -> io::Result<()> {
        let mut out = BytesMut::with_capacity(10 + payload.len());
        encode_frame(opcode, fin, payload, &mut out)?;
        self.stream.write_all(&out).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Drain every complete frame from the read buffer and dispatch it.
    /// A parse-level protocol violation closes the connection with 1002.
    async fn process_frames(&mut self, handler: &mut (dyn WebSocketHandler + Send)) -> io::Result<()> {
        let mut queue = FrameQueue { frames: Vec::new() };
        let parsed = self.frame_parser.receive(&mut self.read_buf, &mut queue);
        for frame in queue.frames.drain(..) {
            if self.state == ConnState::Closed {
                break;
            }
            self.dispatch_frame(frame.opcode, frame.fin, &frame.payload, handler).await?;
            if handler.should_stop() {
                break;
            }
        }
        if let Err(e) = parsed {
            if self.state != ConnState::Closed {
                self.protocol_error_close(&e.to_string(), handler).await;
            }
        }
        debug_log!("[ws] after frame parse, buf remaining: {}", self.read_buf.len());
        Ok(())
    }

    async fn dispatch_frame(
        &mut self,
        opcode: u8,
        fin: bool,
        payload: &[u8],
        handler: &mut (dyn WebSocketHandler + Send),
    ) -> io::Result<()> {
        debug_log!("[ws] frame: opcode={} fin={} len={}", opcode, fin, payload.len());
        match opcode {
            // Control frames are never fragmented and may arrive between the
            // fragments of a data message; they leave the reassembly buffer
            // alone.
            OP_PING => {
                debug_log!("[ws] ping {} bytes, answering with pong", payload.len());
                self.write_frame(OP_PONG, true, payload).await?;
            }
            OP_PONG => {
                handler.pong(payload);
            }
            OP_CLOSE => {
                let (code, reason) = if payload.len() >= 2 {
                    let code = u16::from_be_bytes([payload[0], payload[1]]);
                    let reason = std::str::from_utf8(&payload[2..]).unwrap_or("").to_string();
                    (Some(code), reason)
                } else {
                    (None, String::new())
                };
                // Echo only when the peer initiated; if we are Closing the
                // peer's frame is already the echo of ours.
                let echo = self.state == ConnState::Open;
                self.state = ConnState::Closed;
                if echo {
                    let _ = self.write_frame(OP_CLOSE, true, payload).await;
                }
                let _ = self.stream.shutdown().await;
                handler.closed(code, &reason);
            }
            OP_CONTINUATION | OP_TEXT | OP_BINARY => {
                if !fin {
                    // First fragment carries the real opcode; continuations
                    // must not overwrite it.
                    if opcode != OP_CONTINUATION {
                        self.reassembly_opcode = opcode;
                    }
                    self.reassembly_buf.extend_from_slice(payload);
                    return Ok(());
                }
                let effective = if opcode != OP_CONTINUATION {
                    opcode
                } else {
                    self.reassembly_opcode
                };
                self.reassembly_buf.extend_from_slice(payload);
                let message = self.reassembly_buf.split();
                self.reassembly_opcode = OP_CONTINUATION;
                match effective {
                    OP_TEXT => match std::str::from_utf8(&message) {
                        Ok(text) => handler.text_message(text),
                        Err(e) => {
                            warn_log!("[ws] invalid UTF-8 in text message ({} bytes): {}", message.len(), e);
                        }
                    },
                    OP_BINARY => handler.binary_message(&message),
                    _ => {
                        // Final CONTINUATION with no message in progress
                        self.protocol_error_close("continuation frame without a message in progress", handler).await;
                    }
                }
            }
            other => {
                let reason = format!("unsupported opcode {}", other);
                self.protocol_error_close(&reason, handler).await;
            }
        }
        Ok(())
    }

    /// Locally terminate with close code 1002. The close frame write is
    /// best-effort; the closed event always fires.
    async fn protocol_error_close(&mut self, reason: &str, handler: &mut (dyn WebSocketHandler + Send)) {
        warn_log!("[ws] protocol error: {}", reason);
        if self.state == ConnState::Closed {
            return;
        }
        self.state = ConnState::Closed;
        let mut payload = Vec::with_capacity(2 + reason.len());
        payload.extend_from_slice(&CLOSE_PROTOCOL_ERROR.to_be_bytes());
        payload.extend_from_slice(reason.as_bytes());
        payload.truncate(125);
        let _ = self.write_frame(OP_CLOSE, true, &payload).await;
        let _ = self.stream.shutdown().await;
        handler.closed(Some(CLOSE_PROTOCOL_ERROR), reason);
    }

    /// Transport went away without a close frame. Safe to call more than
    /// once; the closed event fires only on the first.
    fn transport_closed(&mut self, handler: &mut (dyn WebSocketHandler + Send)) {
        if self.state == ConnState::Closed {
            return;
        }
        self.state = ConnState::Closed;
        handler.closed(None, "");
    }
}

/// Collects parsed frames so dispatch (which may write to the stream) can run
/// outside the parser callback.
struct FrameQueue {
    frames: Vec<QueuedFrame>,
}

struct QueuedFrame {
    opcode: u8,
    fin: bool,
    payload: Vec<u8>,
}

impl FrameHandler for FrameQueue {
    fn frame(&mut self, opcode: u8, fin: bool, data: &[u8]) {
        self.frames.push(QueuedFrame {
            opcode,
            fin,
            payload: data.to_vec(),
        });
    }
}
