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

//! Error types for the completion reactor

use crate::result::ConnectionError;
use crate::types::ConnectionHandle;
use std::net::SocketAddr;
use thiserror::Error;

/// Result type for reactor operations
pub type Result<T> = std::result::Result<T, ReactorError>;

/// Reactor error types
#[derive(Debug, Error)]
pub enum ReactorError {
    /// I/O error from a socket or thread operation
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The completion queue or its I/O runtime could not be created
    #[error("Failed to create completion queue: {0}")]
    QueueCreation(#[source] std::io::Error),

    /// A worker thread could not be spawned
    #[error("Failed to spawn worker thread: {0}")]
    WorkerSpawn(#[source] std::io::Error),

    /// The listening socket could not be bound
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// Address we attempted to bind
        addr: SocketAddr,
        /// Underlying OS error
        #[source]
        source: std::io::Error,
    },

    /// The listening socket could not enter the listening state
    #[error("Failed to listen on {addr}: {source}")]
    Listen {
        /// Address the listener was bound to
        addr: SocketAddr,
        /// Underlying OS error
        #[source]
        source: std::io::Error,
    },

    /// The listening socket has been closed
    #[error("Listener closed")]
    ListenerClosed,

    /// The process-wide networking stack has not been initialized
    #[error("Networking stack not initialized")]
    StackNotInitialized,

    /// Teardown was requested for a networking stack that is not running
    #[error("Networking stack not running")]
    StackNotRunning,

    /// The reactor is already running
    #[error("Reactor already running")]
    AlreadyRunning,

    /// The reactor is not running
    #[error("Reactor not running")]
    NotRunning,

    /// Connection with the given handle was not found
    #[error("Connection {0} not found")]
    ConnectionNotFound(ConnectionHandle),

    /// Configuration rejected by validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Error raised by a single connection
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),
}

impl ReactorError {
    /// Check if the error was raised while bringing the reactor up
    ///
    /// Setup errors are the only failures that propagate out of
    /// [`CompletionReactor::start`](crate::CompletionReactor::start).
    pub fn is_setup_error(&self) -> bool {
        matches!(
            self,
            ReactorError::QueueCreation(_)
                | ReactorError::WorkerSpawn(_)
                | ReactorError::Bind { .. }
                | ReactorError::Listen { .. }
                | ReactorError::ListenerClosed
                | ReactorError::StackNotInitialized
                | ReactorError::InvalidConfig(_)
        )
    }

    /// Check if the error concerns a single connection
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            ReactorError::ConnectionNotFound(_) | ReactorError::Connection(_)
        )
    }
}
