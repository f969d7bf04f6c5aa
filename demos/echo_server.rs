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

//! Length-prefixed echo server
//!
//! Every frame (a 4 byte big-endian length followed by the body) is sent
//! straight back to the client that sent it. Close stdin to stop.
//!
//! ```text
//! cargo run --example echo_server -- 4000
//! ```

use ioport_server::framing::{consume_frames, encode_frame};
use ioport_server::{
    CompletionReactor, Connection, ReactorConfig, ServerHandler, initialize_networking_stack,
    teardown_networking_stack,
};
use std::io::Read;
use std::sync::Arc;
use tracing::{info, warn};

struct FrameEcho;

impl ServerHandler for FrameEcho {
    fn on_receive(&self, conn: &Connection, data: &[u8]) -> usize {
        consume_frames(data, |body| {
            if let Err(err) = conn.enqueue_send_bytes(encode_frame(body)) {
                warn!(handle = %conn.handle(), error = %err, "Echo failed");
            }
        })
    }

    fn on_disconnect(&self, conn: &Connection) {
        info!(
            handle = %conn.handle(),
            peer = %conn.peer_addr(),
            sent = conn.bytes_sent(),
            received = conn.bytes_received(),
            "Client left"
        );
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let port = std::env::args()
        .nth(1)
        .map(|arg| arg.parse::<u16>())
        .transpose()?
        .unwrap_or(4000);

    initialize_networking_stack()?;

    let mut reactor = CompletionReactor::new(ReactorConfig::new(port));
    reactor.start(Arc::new(FrameEcho))?;
    if let Some(addr) = reactor.local_addr() {
        info!(%addr, "Echo server listening, close stdin to stop");
    }

    // Block until stdin is closed
    let mut sink = Vec::new();
    std::io::stdin().read_to_end(&mut sink)?;

    if let Some(snapshot) = reactor.snapshot() {
        info!(
            connections = snapshot.active_connections,
            uptime = ?snapshot.uptime,
            "Stopping"
        );
    }
    reactor.stop()?;
    teardown_networking_stack()?;
    Ok(())
}
