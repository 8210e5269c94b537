/*
 * main.rs
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

//! Demo echo server: serves a small HTML test page over plain HTTP and echoes
//! every WebSocket message back to its sender. Everything in this file is
//! ordinary I/O plumbing around the websocket module.

use std::io;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use tern::websocket::handshake::parse_upgrade_request;
use tern::websocket::{
    WebSocketHandler, WebSocketSender, WebSocketServer, DEFAULT_KEEPALIVE_INTERVAL,
};
use tern::{debug_log, warn_log};

/// Test page with a tiny in-browser client.
const INDEX_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>Tern echo test</title></head>
<body>
<h1>Tern echo test</h1>
<input id="msg" placeholder="say something"> <button id="send">Send</button>
<pre id="log"></pre>
<script>
var log = function (line) {
  document.getElementById("log").textContent += line + "\n";
};
var ws = new WebSocket("ws://" + location.host + "/echo");
ws.onopen = function () { log("open"); };
ws.onmessage = function (ev) { log("echo: " + ev.data); };
ws.onclose = function (ev) { log("close " + ev.code + " " + ev.reason); };
document.getElementById("send").onclick = function () {
  ws.send(document.getElementById("msg").value);
};
</script>
</body>
</html>
"#;

/// Echoes every message straight back through the connection's send queue.
struct EchoHandler {
    sender: WebSocketSender,
}

impl WebSocketHandler for EchoHandler {
    fn connected(&mut self) {
        debug_log!("[echo] client connected");
    }

    fn text_message(&mut self, text: &str) {
        debug_log!("[echo] text message, {} bytes", text.len());
        self.sender.send_text(text);
    }

    fn binary_message(&mut self, data: &[u8]) {
        debug_log!("[echo] binary message, {} bytes", data.len());
        self.sender.send_binary(data);
    }

    fn closed(&mut self, code: Option<u16>, reason: &str) {
        debug_log!("[echo] closed code={:?} reason={:?}", code, reason);
    }

    fn failed(&mut self, error: &io::Error) {
        warn_log!("[echo] connection error: {}", error);
    }
}

#[tokio::main]
async fn main() -> io::Result<()> {
    let addr = std::env::var("TERN_LISTEN").unwrap_or_else(|_| String::from("127.0.0.1:8080"));
    let listener = TcpListener::bind(&addr).await?;
    println!("Listening on http://{}", addr);
    loop {
        let (stream, peer) = listener.accept().await?;
        tokio::spawn(async move {
            if let Err(e) = handle_client(stream).await {
                debug_log!("[echo] {}: {}", peer, e);
            }
        });
    }
}

/// Read the request head, then route: plain GET gets the test page,
/// websocket upgrades get an echoing connection with keepalive armed.
async fn handle_client(mut stream: TcpStream) -> io::Result<()> {
    let mut read_buf = Vec::with_capacity(4096);
    let request = loop {
        let mut tmp = [0u8; 4096];
        let n = stream.read(&mut tmp).await?;
        if n == 0 {
            return Ok(());
        }
        read_buf.extend_from_slice(&tmp[..n]);
        if let Some(result) = parse_upgrade_request(&read_buf) {
            break result?;
        }
    };

    if !request.upgrade {
        debug_log!("[echo] GET {}", request.path);
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            INDEX_PAGE.len(),
            INDEX_PAGE
        );
        stream.write_all(response.as_bytes()).await?;
        return stream.shutdown().await;
    }

    let leftover = read_buf[request.body_offset..].to_vec();
    let mut conn = WebSocketServer::upgrade_parsed(stream, &request, &leftover).await?;
    conn.keepalive(DEFAULT_KEEPALIVE_INTERVAL);
    let mut handler = EchoHandler { sender: conn.sender() };
    handler.connected();
    conn.run(&mut handler).await
}
