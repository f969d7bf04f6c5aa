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

//! Lock-free metrics for the completion reactor
//!
//! Counters live in process-local atomics so tests and snapshots can read
//! them directly; the same events are mirrored to the `metrics` facade under
//! the `ioport.*` namespace for whatever recorder the application installs.

use metrics::{counter, gauge};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Lock-free server metrics
///
/// All metrics are stored as atomics and can be accessed concurrently
/// without locks. Use the `snapshot()` method to get a consistent view
/// of all metrics at a point in time.
#[derive(Debug)]
pub struct ServerMetrics {
    // Connection counts
    total_connections: AtomicU64,
    active_connections: AtomicU64,

    // Throughput
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    receives_completed: AtomicU64,
    sends_completed: AtomicU64,
    accepts_completed: AtomicU64,

    // Errors
    accept_errors: AtomicU64,
    connection_errors: AtomicU64,
    overflow_disconnects: AtomicU64,

    // Socket pool
    sockets_created: AtomicU64,
    sockets_reused: AtomicU64,
    sockets_recycled: AtomicU64,
    sockets_discarded: AtomicU64,

    // Timing (stored as nanoseconds)
    total_connection_duration_ns: AtomicU64,

    // Server start time
    started_at: Instant,
}

impl Default for ServerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerMetrics {
    /// Create a new metrics instance
    pub fn new() -> Self {
        Self {
            total_connections: AtomicU64::new(0),
            active_connections: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            receives_completed: AtomicU64::new(0),
            sends_completed: AtomicU64::new(0),
            accepts_completed: AtomicU64::new(0),
            accept_errors: AtomicU64::new(0),
            connection_errors: AtomicU64::new(0),
            overflow_disconnects: AtomicU64::new(0),
            sockets_created: AtomicU64::new(0),
            sockets_reused: AtomicU64::new(0),
            sockets_recycled: AtomicU64::new(0),
            sockets_discarded: AtomicU64::new(0),
            total_connection_duration_ns: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    // Connection tracking

    /// Record a new connection being registered
    pub fn connection_opened(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        counter!("ioport.connections.total").increment(1);
        gauge!("ioport.connections.active").increment(1.0);
    }

    /// Record a connection being torn down
    pub fn connection_closed(&self, duration: Duration) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
        self.total_connection_duration_ns
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
        gauge!("ioport.connections.active").decrement(1.0);
    }

    /// Get the current number of active connections
    pub fn active_connections(&self) -> u64 {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Get the total number of connections since server start
    pub fn total_connections(&self) -> u64 {
        self.total_connections.load(Ordering::Relaxed)
    }

    // Completion tracking

    /// Record a completed accept
    pub fn accept_completed(&self) {
        self.accepts_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed receive of `count` bytes
    pub fn receive_completed(&self, count: u64) {
        self.receives_completed.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(count, Ordering::Relaxed);
        counter!("ioport.bytes.received").increment(count);
    }

    /// Record a completed send of `count` bytes
    pub fn send_completed(&self, count: u64) {
        self.sends_completed.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(count, Ordering::Relaxed);
        counter!("ioport.bytes.sent").increment(count);
    }

    // Error tracking

    /// Record a failed accept on the listener
    pub fn accept_error(&self) {
        self.accept_errors.fetch_add(1, Ordering::Relaxed);
        counter!("ioport.errors.accept").increment(1);
    }

    /// Record a connection torn down by an error
    pub fn connection_error(&self) {
        self.connection_errors.fetch_add(1, Ordering::Relaxed);
        counter!("ioport.errors.connection").increment(1);
    }

    /// Record a connection torn down by receive accumulator overflow
    pub fn overflow_disconnect(&self) {
        self.overflow_disconnects.fetch_add(1, Ordering::Relaxed);
        counter!("ioport.errors.overflow").increment(1);
    }

    // Socket pool tracking

    /// Record a freshly allocated socket
    pub fn socket_created(&self) {
        self.sockets_created.fetch_add(1, Ordering::Relaxed);
        counter!("ioport.sockets.created").increment(1);
    }

    /// Record a socket taken from the pool
    pub fn socket_reused(&self) {
        self.sockets_reused.fetch_add(1, Ordering::Relaxed);
        counter!("ioport.sockets.reused").increment(1);
    }

    /// Record a socket returned to the pool
    pub fn socket_recycled(&self) {
        self.sockets_recycled.fetch_add(1, Ordering::Relaxed);
        counter!("ioport.sockets.recycled").increment(1);
    }

    /// Record a socket closed instead of pooled
    pub fn socket_discarded(&self) {
        self.sockets_discarded.fetch_add(1, Ordering::Relaxed);
        counter!("ioport.sockets.discarded").increment(1);
    }

    /// Get the number of freshly allocated sockets
    pub fn sockets_created(&self) -> u64 {
        self.sockets_created.load(Ordering::Relaxed)
    }

    /// Get the number of sockets returned to the pool
    pub fn sockets_recycled(&self) -> u64 {
        self.sockets_recycled.load(Ordering::Relaxed)
    }

    // Snapshot

    /// Get a consistent snapshot of all metrics
    ///
    /// This creates a point-in-time view of all metrics. Note that the
    /// snapshot may not be perfectly consistent if metrics are being
    /// updated concurrently, but it will be close enough for monitoring
    /// purposes.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_connections: self.total_connections.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            receives_completed: self.receives_completed.load(Ordering::Relaxed),
            sends_completed: self.sends_completed.load(Ordering::Relaxed),
            accepts_completed: self.accepts_completed.load(Ordering::Relaxed),
            accept_errors: self.accept_errors.load(Ordering::Relaxed),
            connection_errors: self.connection_errors.load(Ordering::Relaxed),
            overflow_disconnects: self.overflow_disconnects.load(Ordering::Relaxed),
            sockets_created: self.sockets_created.load(Ordering::Relaxed),
            sockets_reused: self.sockets_reused.load(Ordering::Relaxed),
            sockets_recycled: self.sockets_recycled.load(Ordering::Relaxed),
            sockets_discarded: self.sockets_discarded.load(Ordering::Relaxed),
            uptime: self.started_at.elapsed(),
            avg_connection_duration: self.average_connection_duration(),
        }
    }

    fn average_connection_duration(&self) -> Duration {
        let total = self.total_connections.load(Ordering::Relaxed);
        if total == 0 {
            return Duration::ZERO;
        }
        let total_ns = self.total_connection_duration_ns.load(Ordering::Relaxed);
        Duration::from_nanos(total_ns / total)
    }
}

/// A snapshot of server metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    /// Total connections since server start
    pub total_connections: u64,
    /// Current active connections
    pub active_connections: u64,
    /// Total bytes sent
    pub bytes_sent: u64,
    /// Total bytes received
    pub bytes_received: u64,
    /// Completed receive operations
    pub receives_completed: u64,
    /// Completed send operations
    pub sends_completed: u64,
    /// Completed accept operations
    pub accepts_completed: u64,
    /// Failed accept operations
    pub accept_errors: u64,
    /// Connections torn down by an error
    pub connection_errors: u64,
    /// Connections torn down by accumulator overflow
    pub overflow_disconnects: u64,
    /// Sockets freshly allocated
    pub sockets_created: u64,
    /// Sockets taken from the pool
    pub sockets_reused: u64,
    /// Sockets returned to the pool
    pub sockets_recycled: u64,
    /// Sockets closed instead of pooled
    pub sockets_discarded: u64,
    /// Server uptime
    pub uptime: Duration,
    /// Average connection duration
    pub avg_connection_duration: Duration,
}

impl MetricsSnapshot {
    /// Calculate bytes per second (sent)
    pub fn bytes_sent_per_sec(&self) -> f64 {
        if self.uptime.is_zero() {
            return 0.0;
        }
        self.bytes_sent as f64 / self.uptime.as_secs_f64()
    }

    /// Calculate bytes per second (received)
    pub fn bytes_received_per_sec(&self) -> f64 {
        if self.uptime.is_zero() {
            return 0.0;
        }
        self.bytes_received as f64 / self.uptime.as_secs_f64()
    }

    /// Calculate total error count
    pub fn total_errors(&self) -> u64 {
        self.accept_errors + self.connection_errors + self.overflow_disconnects
    }

    /// Fraction of accepts served from the socket pool
    pub fn socket_reuse_ratio(&self) -> f64 {
        let total = self.sockets_created + self.sockets_reused;
        if total == 0 {
            return 0.0;
        }
        self.sockets_reused as f64 / total as f64
    }
}
