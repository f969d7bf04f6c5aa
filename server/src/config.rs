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

//! Reactor configuration

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Default number of accepts kept outstanding against the listener
pub const DEFAULT_MAX_PENDING_ACCEPTS: usize = 10;

/// Default size of a single receive or send operation
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Default cap on unconsumed received bytes per connection
pub const DEFAULT_RECV_ACCUMULATOR_LIMIT: usize = 32767;

/// Default number of idle sockets retained for reuse
pub const DEFAULT_SOCKET_POOL_CAPACITY: usize = 128;

/// Default listen backlog
pub const DEFAULT_LISTEN_BACKLOG: u32 = 1024;

/// Reactor configuration
///
/// This structure contains all configuration options for the completion
/// reactor. Use the builder pattern methods to customize the configuration.
///
/// # Example
///
/// ```
/// use ioport_server::ReactorConfig;
///
/// let config = ReactorConfig::new(8899)
///     .with_bind_address("127.0.0.1".parse().unwrap())
///     .with_worker_threads(4)
///     .with_recv_accumulator_limit(65535);
/// ```
#[derive(Debug, Clone)]
pub struct ReactorConfig {
    /// Address to bind the listener to (`None` binds every IPv4 interface)
    pub bind_address: Option<IpAddr>,

    /// Port to listen on (0 picks an ephemeral port)
    pub port: u16,

    /// Worker threads draining the completion queue
    ///
    /// `None` uses twice the available parallelism plus two.
    pub worker_threads: Option<usize>,

    /// Threads driving the asynchronous socket operations
    pub io_threads: usize,

    /// Accepts kept outstanding against the listener at all times
    pub max_pending_accepts: usize,

    /// Largest single receive
    pub recv_chunk_size: usize,

    /// Largest single send
    ///
    /// Submissions larger than this are written as a series of chunks.
    pub send_chunk_size: usize,

    /// Cap on received bytes the application has not consumed yet
    ///
    /// A connection whose backlog would exceed this is torn down.
    pub recv_accumulator_limit: usize,

    /// Idle sockets retained for reuse; extras are closed
    pub socket_pool_capacity: usize,

    /// Listen backlog passed to the OS
    pub listen_backlog: u32,

    /// Disable Nagle's algorithm on accepted sockets
    pub nodelay: bool,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            bind_address: None,
            port: 8899,
            worker_threads: None,
            io_threads: 2,
            max_pending_accepts: DEFAULT_MAX_PENDING_ACCEPTS,
            recv_chunk_size: DEFAULT_CHUNK_SIZE,
            send_chunk_size: DEFAULT_CHUNK_SIZE,
            recv_accumulator_limit: DEFAULT_RECV_ACCUMULATOR_LIMIT,
            socket_pool_capacity: DEFAULT_SOCKET_POOL_CAPACITY,
            listen_backlog: DEFAULT_LISTEN_BACKLOG,
            nodelay: false,
        }
    }
}

impl ReactorConfig {
    /// Create a new configuration listening on the given port
    ///
    /// All other settings will use their default values.
    pub fn new(port: u16) -> Self {
        Self {
            port,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn with_bind_address(mut self, address: IpAddr) -> Self {
        self.bind_address = Some(address);
        self
    }

    /// Set the port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the number of worker threads
    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = Some(threads);
        self
    }

    /// Set the number of I/O driver threads
    pub fn with_io_threads(mut self, threads: usize) -> Self {
        self.io_threads = threads;
        self
    }

    /// Set the number of outstanding accepts
    pub fn with_max_pending_accepts(mut self, count: usize) -> Self {
        self.max_pending_accepts = count;
        self
    }

    /// Set the receive chunk size
    pub fn with_recv_chunk_size(mut self, size: usize) -> Self {
        self.recv_chunk_size = size;
        self
    }

    /// Set the send chunk size
    pub fn with_send_chunk_size(mut self, size: usize) -> Self {
        self.send_chunk_size = size;
        self
    }

    /// Set the receive accumulator limit
    pub fn with_recv_accumulator_limit(mut self, limit: usize) -> Self {
        self.recv_accumulator_limit = limit;
        self
    }

    /// Set the socket pool capacity
    pub fn with_socket_pool_capacity(mut self, capacity: usize) -> Self {
        self.socket_pool_capacity = capacity;
        self
    }

    /// Set the listen backlog
    pub fn with_listen_backlog(mut self, backlog: u32) -> Self {
        self.listen_backlog = backlog;
        self
    }

    /// Enable or disable TCP_NODELAY on accepted sockets
    pub fn with_nodelay(mut self, enabled: bool) -> Self {
        self.nodelay = enabled;
        self
    }

    /// Address the listener binds to
    pub fn socket_addr(&self) -> SocketAddr {
        let ip = self
            .bind_address
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        SocketAddr::new(ip, self.port)
    }

    /// Number of worker threads the reactor will spawn
    pub fn effective_worker_threads(&self) -> usize {
        self.worker_threads
            .unwrap_or_else(default_worker_threads)
            .max(1)
    }

    /// Validate the configuration
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.worker_threads == Some(0) {
            return Err("worker_threads must be greater than 0".to_string());
        }

        if self.io_threads == 0 {
            return Err("io_threads must be greater than 0".to_string());
        }

        if self.max_pending_accepts == 0 {
            return Err("max_pending_accepts must be greater than 0".to_string());
        }

        if self.recv_chunk_size == 0 {
            return Err("recv_chunk_size must be greater than 0".to_string());
        }

        if self.send_chunk_size == 0 {
            return Err("send_chunk_size must be greater than 0".to_string());
        }

        if self.recv_accumulator_limit < self.recv_chunk_size {
            return Err("recv_accumulator_limit must be at least recv_chunk_size".to_string());
        }

        Ok(())
    }
}

/// Default worker count: twice the available parallelism plus two
pub fn default_worker_threads() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    cpus * 2 + 2
}
