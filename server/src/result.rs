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

//! Error types and result aliases for connection operations

/// Result type for connection operations
///
/// This is a convenience type alias that uses [`ConnectionError`] as the error type.
///
/// # Examples
///
/// ```
/// use ioport_server::ConnectionResult;
///
/// fn example() -> ConnectionResult<()> {
///     Ok(())
/// }
/// ```
pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// Errors that end a single connection
///
/// Every variant is resolved inside the reactor by tearing the connection
/// down. Applications only observe the outcome through the disconnect
/// callback, which carries no cause.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// An I/O error occurred on the socket
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer closed its side of the connection (zero-byte receive)
    #[error("Peer closed the connection")]
    PeerClosed,

    /// The peer reset or aborted the connection
    #[error("Connection reset by peer")]
    Reset,

    /// Unconsumed received bytes would exceed the accumulator limit
    ///
    /// This is the receive-side backpressure bound: an application that
    /// never consumes what it is given cannot grow the buffer without limit.
    #[error("Receive accumulator overflow: {buffered} bytes buffered, limit {limit}")]
    AccumulatorOverflow {
        /// Bytes that would have been buffered
        buffered: usize,
        /// Configured limit
        limit: usize,
    },

    /// The connection is closing or has been closed
    #[error("Connection closed")]
    Closed,

    /// A follow-up operation could not be issued on the socket
    #[error("Failed to post operation: {0}")]
    PostFailed(String),
}

impl ConnectionError {
    /// Classify an I/O error reported by a completed operation
    ///
    /// Reset-style errors collapse into [`ConnectionError::Reset`]; everything
    /// else stays a generic I/O failure.
    pub fn from_io(error: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match error.kind() {
            ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe => {
                ConnectionError::Reset
            }
            _ => ConnectionError::Io(error),
        }
    }

    /// Check if the peer ended the connection
    pub fn is_peer_initiated(&self) -> bool {
        matches!(self, ConnectionError::PeerClosed | ConnectionError::Reset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error, ErrorKind};

    #[test]
    fn test_from_io_classifies_resets() {
        assert!(matches!(
            ConnectionError::from_io(Error::from(ErrorKind::ConnectionReset)),
            ConnectionError::Reset
        ));
        assert!(matches!(
            ConnectionError::from_io(Error::from(ErrorKind::BrokenPipe)),
            ConnectionError::Reset
        ));
        assert!(matches!(
            ConnectionError::from_io(Error::from(ErrorKind::TimedOut)),
            ConnectionError::Io(_)
        ));
    }

    #[test]
    fn test_peer_initiated() {
        assert!(ConnectionError::PeerClosed.is_peer_initiated());
        assert!(ConnectionError::Reset.is_peer_initiated());
        assert!(!ConnectionError::Closed.is_peer_initiated());
        assert!(
            !ConnectionError::AccumulatorOverflow {
                buffered: 40000,
                limit: 32767
            }
            .is_peer_initiated()
        );
    }

    #[test]
    fn test_overflow_display() {
        let err = ConnectionError::AccumulatorOverflow {
            buffered: 32768,
            limit: 32767,
        };
        assert_eq!(
            err.to_string(),
            "Receive accumulator overflow: 32768 bytes buffered, limit 32767"
        );
    }
}
