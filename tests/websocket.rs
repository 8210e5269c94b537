/*
 * websocket.rs
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

//! End-to-end tests: a scripted client on one side of an in-memory duplex
//! stream, a real upgraded connection on the other.

use bytes::{BufMut, BytesMut};
use std::io;
use std::time::Duration;
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use tern::websocket::frame::{
    apply_mask, OP_BINARY, OP_CLOSE, OP_CONTINUATION, OP_PING, OP_PONG, OP_TEXT,
};
use tern::websocket::{WebSocketHandler, WebSocketSender, WebSocketServer};

const UPGRADE_REQUEST: &[u8] = b"GET /echo HTTP/1.1\r\n\
    Host: localhost:8080\r\n\
    Upgrade: websocket\r\n\
    Connection: Upgrade\r\n\
    Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
    Sec-WebSocket-Version: 13\r\n\r\n";

#[derive(Debug, PartialEq)]
enum Event {
    Text(String),
    Binary(Vec<u8>),
    Pong(Vec<u8>),
    Closed(Option<u16>, String),
    Failed(String),
}

/// Records every callback; optionally echoes messages back through the
/// connection's send queue, like the demo server does.
struct RecordingHandler {
    tx: mpsc::UnboundedSender<Event>,
    sender: WebSocketSender,
    echo: bool,
}

impl WebSocketHandler for RecordingHandler {
    fn text_message(&mut self, text: &str) {
        if self.echo {
            self.sender.send_text(text);
        }
        let _ = self.tx.send(Event::Text(text.to_string()));
    }

    fn binary_message(&mut self, data: &[u8]) {
        if self.echo {
            self.sender.send_binary(data);
        }
        let _ = self.tx.send(Event::Binary(data.to_vec()));
    }

    fn pong(&mut self, data: &[u8]) {
        let _ = self.tx.send(Event::Pong(data.to_vec()));
    }

    fn closed(&mut self, code: Option<u16>, reason: &str) {
        let _ = self.tx.send(Event::Closed(code, reason.to_string()));
    }

    fn failed(&mut self, error: &io::Error) {
        let _ = self.tx.send(Event::Failed(error.to_string()));
    }
}

/// Upgrade and run a connection on `server_io` in a background task.
fn spawn_server(
    server_io: DuplexStream,
    keepalive: Option<Duration>,
    echo: bool,
) -> (mpsc::UnboundedReceiver<Event>, JoinHandle<io::Result<()>>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(async move {
        let mut conn = WebSocketServer::upgrade(server_io).await?;
        if let Some(interval) = keepalive {
            conn.keepalive(interval);
        }
        let sender = conn.sender();
        let mut handler = RecordingHandler { tx, sender, echo };
        conn.run(&mut handler).await
    });
    (rx, handle)
}

/// Build a masked client → server frame.
fn client_frame(opcode: u8, fin: bool, payload: &[u8]) -> Vec<u8> {
    let key = [0x37, 0xfa, 0x21, 0x3d];
    let mut out = BytesMut::new();
    let fin_bit: u8 = if fin { 0x80 } else { 0x00 };
    out.put_u8(fin_bit | opcode);
    let len = payload.len();
    if len < 126 {
        out.put_u8(0x80 | len as u8);
    } else if len < 65536 {
        out.put_u8(0x80 | 126);
        out.put_u16(len as u16);
    } else {
        out.put_u8(0x80 | 127);
        out.put_u64(len as u64);
    }
    out.put_slice(&key);
    let mut masked = payload.to_vec();
    apply_mask(&key, &mut masked);
    out.put_slice(&masked);
    out.to_vec()
}

fn close_payload(code: u16, reason: &str) -> Vec<u8> {
    let mut payload = code.to_be_bytes().to_vec();
    payload.extend_from_slice(reason.as_bytes());
    payload
}

/// Read the 101 response head.
async fn read_http_head(client: &mut DuplexStream) -> String {
    let mut buf = Vec::new();
    loop {
        let b = client.read_u8().await.expect("response head");
        buf.push(b);
        if buf.ends_with(b"\r\n\r\n") {
            return String::from_utf8(buf).expect("ASCII head");
        }
    }
}

/// Read one server → client frame (always unmasked).
async fn read_frame(client: &mut DuplexStream) -> (u8, bool, Vec<u8>) {
    let b0 = client.read_u8().await.expect("frame byte 0");
    let b1 = client.read_u8().await.expect("frame byte 1");
    assert_eq!(b1 & 0x80, 0, "server frames must not be masked");
    let len = match b1 & 0x7f {
        126 => client.read_u16().await.expect("16-bit length") as usize,
        127 => client.read_u64().await.expect("64-bit length") as usize,
        l => l as usize,
    };
    let mut payload = vec![0u8; len];
    client.read_exact(&mut payload).await.expect("frame payload");
    (b0 & 0x0f, (b0 & 0x80) != 0, payload)
}

/// Collect every remaining event; the channel closes when run() returns.
async fn drain_events(mut rx: mpsc::UnboundedReceiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Some(e) = rx.recv().await {
        events.push(e);
    }
    events
}

async fn upgrade_client(client: &mut DuplexStream) -> String {
    client.write_all(UPGRADE_REQUEST).await.unwrap();
    read_http_head(client).await
}

#[tokio::test]
async fn test_upgrade_handshake_derives_rfc_accept() {
    let (mut client, server_io) = duplex(1 << 20);
    let (rx, handle) = spawn_server(server_io, None, false);

    let head = upgrade_client(&mut client).await;
    assert!(head.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
    assert!(head.contains("Upgrade: websocket\r\n"));
    assert!(head.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));

    drop(client);
    assert!(handle.await.unwrap().is_ok());
    let events = drain_events(rx).await;
    assert_eq!(events, vec![Event::Closed(None, String::new())]);
}

#[tokio::test]
async fn test_text_message_echoed() {
    let (mut client, server_io) = duplex(1 << 20);
    let (mut rx, _handle) = spawn_server(server_io, None, true);
    upgrade_client(&mut client).await;

    client.write_all(&client_frame(OP_TEXT, true, b"hello")).await.unwrap();
    assert_eq!(rx.recv().await.unwrap(), Event::Text(String::from("hello")));
    let (opcode, fin, payload) = read_frame(&mut client).await;
    assert_eq!((opcode, fin), (OP_TEXT, true));
    assert_eq!(payload, b"hello");
}

#[tokio::test]
async fn test_ping_answered_with_single_pong_and_no_message_event() {
    let (mut client, server_io) = duplex(1 << 20);
    let (rx, handle) = spawn_server(server_io, None, false);
    upgrade_client(&mut client).await;

    client.write_all(&client_frame(OP_PING, true, b"abc")).await.unwrap();
    let (opcode, fin, payload) = read_frame(&mut client).await;
    assert_eq!((opcode, fin), (OP_PONG, true));
    assert_eq!(payload, b"abc");

    // Close so the event channel drains
    client
        .write_all(&client_frame(OP_CLOSE, true, &close_payload(1000, "done")))
        .await
        .unwrap();
    let (opcode, _, _) = read_frame(&mut client).await;
    assert_eq!(opcode, OP_CLOSE);
    assert!(handle.await.unwrap().is_ok());

    let events = drain_events(rx).await;
    assert_eq!(events, vec![Event::Closed(Some(1000), String::from("done"))]);
}

#[tokio::test]
async fn test_close_handshake_echoes_code_and_reason() {
    let (mut client, server_io) = duplex(1 << 20);
    let (mut rx, handle) = spawn_server(server_io, None, false);
    upgrade_client(&mut client).await;

    client
        .write_all(&client_frame(OP_CLOSE, true, &close_payload(1000, "bye")))
        .await
        .unwrap();

    let (opcode, fin, payload) = read_frame(&mut client).await;
    assert_eq!((opcode, fin), (OP_CLOSE, true));
    assert_eq!(payload, close_payload(1000, "bye"));

    assert_eq!(
        rx.recv().await.unwrap(),
        Event::Closed(Some(1000), String::from("bye"))
    );
    assert!(handle.await.unwrap().is_ok());

    // Server half-closed its side after the echo
    let mut rest = Vec::new();
    client.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());
}

#[tokio::test]
async fn test_fragmented_message_reassembled_with_first_opcode() {
    let (mut client, server_io) = duplex(1 << 20);
    let (mut rx, _handle) = spawn_server(server_io, None, false);
    upgrade_client(&mut client).await;

    client.write_all(&client_frame(OP_TEXT, false, b"Hel")).await.unwrap();
    client.write_all(&client_frame(OP_CONTINUATION, false, b"lo, ")).await.unwrap();
    client.write_all(&client_frame(OP_CONTINUATION, true, b"websocket")).await.unwrap();

    assert_eq!(
        rx.recv().await.unwrap(),
        Event::Text(String::from("Hello, websocket"))
    );
}

#[tokio::test]
async fn test_ping_between_fragments_leaves_reassembly_intact() {
    let (mut client, server_io) = duplex(1 << 20);
    let (mut rx, _handle) = spawn_server(server_io, None, false);
    upgrade_client(&mut client).await;

    client.write_all(&client_frame(OP_TEXT, false, b"a")).await.unwrap();
    client.write_all(&client_frame(OP_PING, true, b"ping!")).await.unwrap();
    client.write_all(&client_frame(OP_CONTINUATION, true, b"b")).await.unwrap();

    let (opcode, _, payload) = read_frame(&mut client).await;
    assert_eq!(opcode, OP_PONG);
    assert_eq!(payload, b"ping!");
    assert_eq!(rx.recv().await.unwrap(), Event::Text(String::from("ab")));
}

#[tokio::test]
async fn test_large_echo_is_fragmented_on_send() {
    let (mut client, server_io) = duplex(1 << 20);
    let (mut rx, _handle) = spawn_server(server_io, None, true);
    upgrade_client(&mut client).await;

    let original: Vec<u8> = (0..150_000u32).map(|i| (i % 251) as u8).collect();
    client.write_all(&client_frame(OP_BINARY, true, &original)).await.unwrap();
    assert_eq!(rx.recv().await.unwrap(), Event::Binary(original.clone()));

    // 150000 = 65536 + 65536 + 18928
    let mut reassembled = Vec::new();
    let (opcode, fin, payload) = read_frame(&mut client).await;
    assert_eq!((opcode, fin, payload.len()), (OP_BINARY, false, 65536));
    reassembled.extend_from_slice(&payload);
    let (opcode, fin, payload) = read_frame(&mut client).await;
    assert_eq!((opcode, fin, payload.len()), (OP_CONTINUATION, false, 65536));
    reassembled.extend_from_slice(&payload);
    let (opcode, fin, payload) = read_frame(&mut client).await;
    assert_eq!((opcode, fin, payload.len()), (OP_CONTINUATION, true, 18928));
    reassembled.extend_from_slice(&payload);
    assert_eq!(reassembled, original);
}

#[tokio::test]
async fn test_reserved_opcode_closes_with_1002() {
    let (mut client, server_io) = duplex(1 << 20);
    let (rx, handle) = spawn_server(server_io, None, false);
    upgrade_client(&mut client).await;

    client.write_all(&client_frame(3, true, b"?")).await.unwrap();

    let (opcode, _, payload) = read_frame(&mut client).await;
    assert_eq!(opcode, OP_CLOSE);
    assert_eq!(u16::from_be_bytes([payload[0], payload[1]]), 1002);
    assert!(handle.await.unwrap().is_ok());

    let events = drain_events(rx).await;
    assert_eq!(events.len(), 1);
    match &events[0] {
        Event::Closed(Some(1002), reason) => assert!(reason.contains("unsupported opcode 3")),
        other => panic!("expected 1002 close event, got {:?}", other),
    }
}

#[tokio::test]
async fn test_oversized_length_field_closes_with_1002() {
    let (mut client, server_io) = duplex(1 << 20);
    let (rx, handle) = spawn_server(server_io, None, false);
    upgrade_client(&mut client).await;

    // 127-length frame whose 8-byte field uses the reserved high half
    let mut wire = vec![0x82u8, 0xff];
    wire.extend_from_slice(&(1u64 << 32).to_be_bytes());
    wire.extend_from_slice(&[0x37, 0xfa, 0x21, 0x3d]);
    client.write_all(&wire).await.unwrap();

    let (opcode, _, payload) = read_frame(&mut client).await;
    assert_eq!(opcode, OP_CLOSE);
    assert_eq!(u16::from_be_bytes([payload[0], payload[1]]), 1002);
    assert!(handle.await.unwrap().is_ok());

    let events = drain_events(rx).await;
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], Event::Closed(Some(1002), _)));
}

#[tokio::test]
async fn test_transport_eof_reports_close_exactly_once() {
    let (mut client, server_io) = duplex(1 << 20);
    let (rx, handle) = spawn_server(server_io, None, false);
    upgrade_client(&mut client).await;

    drop(client);
    assert!(handle.await.unwrap().is_ok());
    let events = drain_events(rx).await;
    assert_eq!(events, vec![Event::Closed(None, String::new())]);
}

#[tokio::test]
async fn test_close_then_eof_reports_close_exactly_once() {
    let (mut client, server_io) = duplex(1 << 20);
    let (rx, handle) = spawn_server(server_io, None, false);
    upgrade_client(&mut client).await;

    client
        .write_all(&client_frame(OP_CLOSE, true, &close_payload(1001, "going away")))
        .await
        .unwrap();
    drop(client);
    assert!(handle.await.unwrap().is_ok());

    let events = drain_events(rx).await;
    assert_eq!(
        events,
        vec![Event::Closed(Some(1001), String::from("going away"))]
    );
}

#[tokio::test(start_paused = true)]
async fn test_keepalive_pings_immediately_and_on_interval() {
    let (mut client, server_io) = duplex(1 << 20);
    let (_rx, _handle) = spawn_server(server_io, Some(Duration::from_secs(10)), false);
    upgrade_client(&mut client).await;

    // First ping fires as soon as the loop starts
    let (opcode, fin, payload) = read_frame(&mut client).await;
    assert_eq!((opcode, fin), (OP_PING, true));
    assert_eq!(payload, b"keepalive");

    // The next one needs the interval to elapse; paused time auto-advances
    let (opcode, _, payload) = read_frame(&mut client).await;
    assert_eq!(opcode, OP_PING);
    assert_eq!(payload, b"keepalive");
}

#[tokio::test]
async fn test_direct_send_json_before_run() {
    let (mut client, server_io) = duplex(1 << 20);
    client.write_all(UPGRADE_REQUEST).await.unwrap();

    let mut conn = WebSocketServer::upgrade(server_io).await.unwrap();
    read_http_head(&mut client).await;

    let value = json::object! { kind: "greeting", body: "hi" };
    conn.send_json(&value).await.unwrap();

    let (opcode, fin, payload) = read_frame(&mut client).await;
    assert_eq!((opcode, fin), (OP_TEXT, true));
    assert_eq!(payload, br#"{"kind":"greeting","body":"hi"}"#);
}

#[tokio::test]
async fn test_unmasked_client_frame_is_accepted() {
    let (mut client, server_io) = duplex(1 << 20);
    let (mut rx, _handle) = spawn_server(server_io, None, false);
    upgrade_client(&mut client).await;

    // Unmasked frame: mask bit clear, no key
    let mut wire = vec![0x80u8 | OP_TEXT, 4];
    wire.extend_from_slice(b"bare");
    client.write_all(&wire).await.unwrap();

    assert_eq!(rx.recv().await.unwrap(), Event::Text(String::from("bare")));
}
