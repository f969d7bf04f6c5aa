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

//! Core types for the completion reactor

use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Stable handle to a connection's registry slot
///
/// The generation is bumped every time a slot is vacated, so a handle held
/// past its connection's removal never resolves to the slot's next occupant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionHandle {
    index: u32,
    generation: u32,
}

impl ConnectionHandle {
    /// Create a new connection handle
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Get the slot index
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Get the slot generation
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}.{}", self.index, self.generation)
    }
}

/// Identity of a pooled reactor socket (survives reuse across connections)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketId(u64);

impl SocketId {
    /// Create a new socket ID
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the underlying u64 value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sock-{}", self.0)
    }
}

/// Connection state (stored as atomic u8 for lock-free state management)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Registered, first receive not yet posted
    Connecting = 0,
    /// Receiving and sending
    Active = 1,
    /// Teardown in progress, no new I/O is issued
    Closing = 2,
    /// Removed from the registry, socket handed back
    Closed = 3,
}

impl ConnectionState {
    /// Convert from u8 (for atomic operations)
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Active,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }

    /// Convert to u8 (for atomic operations)
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Check if the connection is in a terminal state
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closing | Self::Closed)
    }

    /// Check if the connection accepts new I/O
    pub fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Active)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Active => write!(f, "active"),
            Self::Closing => write!(f, "closing"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// What [`Connection::enqueue_send`](crate::Connection::enqueue_send) did with the bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// No send was in flight; the first chunk has been posted
    Posted,
    /// A send was in flight; the bytes wait in the pending queue
    Queued,
    /// Nothing to send (empty submission)
    Empty,
}

/// Connection information snapshot (for non-blocking queries)
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Registry handle
    pub handle: ConnectionHandle,
    /// Reactor socket the connection runs on
    pub socket_id: SocketId,
    /// Current state
    pub state: ConnectionState,
    /// Peer address
    pub peer_addr: SocketAddr,
    /// Local address
    pub local_addr: SocketAddr,
    /// When the connection was accepted
    pub created_at: Instant,
    /// Total bytes sent
    pub bytes_sent: u64,
    /// Total bytes received
    pub bytes_received: u64,
    /// Completed receive operations
    pub receives: u64,
    /// Completed send operations
    pub sends: u64,
    /// Bytes waiting in the receive accumulator
    pub buffered_bytes: usize,
    /// Bytes waiting to be sent (active remainder plus pending queue)
    pub queued_bytes: usize,
}

impl ConnectionInfo {
    /// Get the connection duration
    pub fn duration(&self) -> Duration {
        self.created_at.elapsed()
    }
}

/// Server snapshot for non-blocking debug information
#[derive(Debug, Clone)]
pub struct ServerSnapshot {
    /// Number of registered connections
    pub active_connections: usize,
    /// Total connections since server start
    pub total_connections: u64,
    /// Listener address
    pub local_addr: SocketAddr,
    /// Worker threads draining the completion queue
    pub worker_threads: usize,
    /// Accepts currently outstanding against the listener
    pub outstanding_accepts: usize,
    /// Sockets idle in the reuse pool
    pub pooled_sockets: usize,
    /// Server uptime
    pub uptime: Duration,
    /// Server start time
    pub started_at: Instant,
}

impl fmt::Display for ServerSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CompletionReactor {{ active: {}, total: {}, addr: {}, workers: {}, accepts: {}, pooled: {}, uptime: {:?} }}",
            self.active_connections,
            self.total_connections,
            self.local_addr,
            self.worker_threads,
            self.outstanding_accepts,
            self.pooled_sockets,
            self.uptime
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_handle() {
        let a = ConnectionHandle::new(1, 0);
        let b = ConnectionHandle::new(1, 1);

        assert_eq!(a.index(), b.index());
        assert_ne!(a, b);
        assert_eq!(b.to_string(), "conn-1.1");
    }

    #[test]
    fn test_connection_state_conversion() {
        for state in [
            ConnectionState::Connecting,
            ConnectionState::Active,
            ConnectionState::Closing,
            ConnectionState::Closed,
        ] {
            assert_eq!(state, ConnectionState::from_u8(state.as_u8()));
        }
        assert_eq!(ConnectionState::from_u8(200), ConnectionState::Closed);
    }

    #[test]
    fn test_connection_state_terminal() {
        assert!(!ConnectionState::Connecting.is_terminal());
        assert!(!ConnectionState::Active.is_terminal());
        assert!(ConnectionState::Closing.is_terminal());
        assert!(ConnectionState::Closed.is_terminal());
        assert!(ConnectionState::Connecting.is_active());
        assert!(!ConnectionState::Closing.is_active());
    }

    #[test]
    fn test_socket_id_display() {
        assert_eq!(SocketId::new(12).to_string(), "sock-12");
    }
}
