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

//! Completion-Dispatch TCP Server
//!
//! This crate hosts an application's message-processing callback behind a
//! reactor that accepts connections, runs their socket I/O asynchronously
//! and hands the results to a fixed pool of worker threads:
//!
//! - A fixed number of accepts is always outstanding on the listener
//! - Exactly one receive and at most one send in flight per connection
//! - Partially consumed input is reassembled, capped per connection
//! - Large or back-to-back sends drain in order, in bounded chunks
//! - Disconnected sockets are recycled through a bounded pool
//! - Lock-free metrics and monitoring
//!
//! # Architecture
//!
//! ```text
//! CompletionReactor
//!     ↓
//! worker threads ← completion queue ← I/O runtime
//!     ↓
//! Acceptor → ConnectionRegistry → Connection (RecvAccumulator, SendQueue)
//!                                     ↓
//!                                 SocketPool
//! ```
//!
//! # Example
//!
//! ```no_run
//! use ioport_server::{
//!     CompletionReactor, Connection, ReactorConfig, ServerHandler, initialize_networking_stack,
//!     teardown_networking_stack,
//! };
//! use std::sync::Arc;
//!
//! struct Echo;
//!
//! impl ServerHandler for Echo {
//!     fn on_receive(&self, conn: &Connection, data: &[u8]) -> usize {
//!         let _ = conn.enqueue_send(data);
//!         data.len()
//!     }
//! }
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     initialize_networking_stack()?;
//!     let mut reactor = CompletionReactor::new(ReactorConfig::default());
//!     reactor.start(Arc::new(Echo))?;
//!     // ...
//!     reactor.stop()?;
//!     teardown_networking_stack()?;
//!     Ok(())
//! }
//! ```

mod acceptor;
mod buffer;
mod config;
mod connection;
mod error;
pub mod framing;
mod handler;
mod metrics;
mod pool;
mod port;
mod reactor;
mod registry;
mod result;
mod stack;
mod types;

pub use buffer::{RecvAccumulator, SendQueue};
pub use config::{
    DEFAULT_CHUNK_SIZE, DEFAULT_LISTEN_BACKLOG, DEFAULT_MAX_PENDING_ACCEPTS,
    DEFAULT_RECV_ACCUMULATOR_LIMIT, DEFAULT_SOCKET_POOL_CAPACITY, ReactorConfig,
    default_worker_threads,
};
pub use connection::Connection;
pub use error::{ReactorError, Result};
pub use handler::{CallbackHandler, ServerHandler};
pub use metrics::{MetricsSnapshot, ServerMetrics};
pub use pool::{PooledSocket, SocketPool};
pub use reactor::{BroadcastResult, CompletionReactor};
pub use registry::ConnectionRegistry;
pub use result::{ConnectionError, ConnectionResult};
pub use stack::{
    initialize_networking_stack, is_networking_stack_initialized, teardown_networking_stack,
};
pub use types::{
    ConnectionHandle, ConnectionInfo, ConnectionState, SendOutcome, ServerSnapshot, SocketId,
};
