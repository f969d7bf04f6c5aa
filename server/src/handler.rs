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

//! Handler traits and implementations for the completion reactor

use crate::Connection;

/// Server event handler trait
///
/// Implement this trait to process received bytes and observe disconnects.
/// Both methods run on a reactor worker thread and must not block.
///
/// # Example
///
/// ```no_run
/// use ioport_server::{Connection, ServerHandler};
///
/// struct Echo;
///
/// impl ServerHandler for Echo {
///     fn on_receive(&self, conn: &Connection, data: &[u8]) -> usize {
///         let _ = conn.enqueue_send(data);
///         data.len()
///     }
/// }
/// ```
pub trait ServerHandler: Send + Sync + 'static {
    /// Called with the unconsumed bytes of a connection
    ///
    /// `data` is every byte received and not yet consumed, in arrival order.
    /// Return how many leading bytes were fully handled; the rest are handed
    /// back (with whatever arrives next) on the following call. Returning
    /// more than `data.len()` is treated as `data.len()`.
    ///
    /// Runs under the connection's receive lock, so calls for one connection
    /// never overlap. Calling [`Connection::enqueue_send`] from here is fine.
    fn on_receive(&self, conn: &Connection, data: &[u8]) -> usize;

    /// Called once when a connection is torn down
    ///
    /// The connection has stopped issuing I/O and is about to be destroyed.
    /// No cause is passed.
    fn on_disconnect(&self, _conn: &Connection) {}
}

type ReceiveFn = Box<dyn Fn(&Connection, &[u8]) -> usize + Send + Sync + 'static>;
type DisconnectFn = Box<dyn Fn(&Connection) + Send + Sync + 'static>;

/// Callback-based handler implementation
///
/// This provides a flexible way to implement handlers using closures instead
/// of implementing the `ServerHandler` trait.
///
/// # Example
///
/// ```no_run
/// use ioport_server::CallbackHandler;
///
/// let handler = CallbackHandler::new(|_conn, data| data.len())
///     .with_disconnect(|conn| println!("{} closed", conn.handle()));
/// ```
pub struct CallbackHandler {
    /// Called with unconsumed bytes
    pub on_receive: ReceiveFn,
    /// Called on disconnection
    pub on_disconnect: Option<DisconnectFn>,
}

impl CallbackHandler {
    /// Create a handler from a receive callback
    pub fn new<F>(on_receive: F) -> Self
    where
        F: Fn(&Connection, &[u8]) -> usize + Send + Sync + 'static,
    {
        Self {
            on_receive: Box::new(on_receive),
            on_disconnect: None,
        }
    }

    /// Set the disconnect callback
    pub fn with_disconnect<F>(mut self, on_disconnect: F) -> Self
    where
        F: Fn(&Connection) + Send + Sync + 'static,
    {
        self.on_disconnect = Some(Box::new(on_disconnect));
        self
    }
}

impl ServerHandler for CallbackHandler {
    fn on_receive(&self, conn: &Connection, data: &[u8]) -> usize {
        (self.on_receive)(conn, data)
    }

    fn on_disconnect(&self, conn: &Connection) {
        if let Some(ref f) = self.on_disconnect {
            f(conn);
        }
    }
}

impl std::fmt::Debug for CallbackHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackHandler")
            .field("on_disconnect", &self.on_disconnect.is_some())
            .finish_non_exhaustive()
    }
}
