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

//! Socket reuse pool
//!
//! A [`PooledSocket`] is the reactor-side half of a connection: a stable
//! identity plus the receive scratch buffer every read on that connection
//! lands in. Accepts draw one from the [`SocketPool`]; teardown resets it
//! and hands it back, so a steady stream of short connections stops
//! allocating once the pool is warm.
//!
//! A socket torn down while its receive is still in flight cannot be reset
//! yet. It is parked under its [`SocketId`] until the cancelled receive
//! hands the scratch buffer back through [`SocketPool::return_scratch`].

use crate::ServerMetrics;
use crate::types::SocketId;
use bytes::BytesMut;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace};

/// Reusable reactor socket
#[derive(Debug)]
pub struct PooledSocket {
    id: SocketId,
    scratch: Option<BytesMut>,
    uses: u64,
}

impl PooledSocket {
    fn new(id: SocketId, scratch_size: usize) -> Self {
        Self {
            id,
            scratch: Some(BytesMut::zeroed(scratch_size)),
            uses: 1,
        }
    }

    /// Socket identity
    pub fn id(&self) -> SocketId {
        self.id
    }

    /// Number of connections this socket has carried, the current one included
    pub fn uses(&self) -> u64 {
        self.uses
    }

    /// Lend the receive scratch buffer out
    pub fn take_scratch(&mut self) -> Option<BytesMut> {
        self.scratch.take()
    }

    /// Return a lent scratch buffer
    pub fn restore_scratch(&mut self, scratch: BytesMut) {
        self.scratch = Some(scratch);
    }

    /// Check whether the scratch buffer is home
    pub fn is_reusable(&self) -> bool {
        self.scratch.is_some()
    }

    /// Prepare for the next connection
    ///
    /// Fails if the scratch buffer is still lent to an in-flight operation.
    fn reset(&mut self, scratch_size: usize) -> bool {
        match self.scratch.as_mut() {
            Some(scratch) => {
                scratch.clear();
                scratch.resize(scratch_size, 0);
                true
            }
            None => false,
        }
    }
}

/// Free list of reusable reactor sockets
#[derive(Debug)]
pub struct SocketPool {
    sockets: Mutex<Vec<PooledSocket>>,
    parked: Mutex<HashMap<SocketId, PooledSocket>>,
    capacity: usize,
    scratch_size: usize,
    next_id: AtomicU64,
    metrics: Arc<ServerMetrics>,
}

impl SocketPool {
    /// Create an empty pool
    ///
    /// `capacity` bounds how many idle sockets are retained, `scratch_size`
    /// is the size of each socket's receive buffer.
    pub fn new(capacity: usize, scratch_size: usize, metrics: Arc<ServerMetrics>) -> Self {
        Self {
            sockets: Mutex::new(Vec::with_capacity(capacity)),
            parked: Mutex::new(HashMap::new()),
            capacity,
            scratch_size,
            next_id: AtomicU64::new(1),
            metrics,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<PooledSocket>> {
        self.sockets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take an idle socket, or create one if the pool is empty
    pub fn acquire(&self) -> PooledSocket {
        if let Some(mut socket) = self.lock().pop() {
            socket.uses += 1;
            self.metrics.socket_reused();
            trace!(socket = %socket.id, uses = socket.uses, "Reusing pooled socket");
            return socket;
        }

        let id = SocketId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.metrics.socket_created();
        trace!(socket = %id, "Allocated socket");
        PooledSocket::new(id, self.scratch_size)
    }

    /// Hand a socket back for reuse
    ///
    /// The socket is closed instead when it cannot be reset or the pool is
    /// full. Returns whether it was retained.
    pub fn release(&self, mut socket: PooledSocket) -> bool {
        if !socket.reset(self.scratch_size) {
            self.metrics.socket_discarded();
            debug!(socket = %socket.id, "Socket busy, closing instead of pooling");
            return false;
        }

        let mut sockets = self.lock();
        if sockets.len() >= self.capacity {
            drop(sockets);
            self.metrics.socket_discarded();
            trace!(socket = %socket.id, "Socket pool full, closing socket");
            return false;
        }
        sockets.push(socket);
        drop(sockets);
        self.metrics.socket_recycled();
        true
    }

    /// Hold a socket whose scratch buffer is still lent to a receive
    pub fn park(&self, socket: PooledSocket) {
        trace!(socket = %socket.id, "Parking socket until its receive returns");
        self.parked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(socket.id, socket);
    }

    /// Reunite a parked socket with its scratch buffer and release it
    ///
    /// Returns whether the socket was retained. Buffers for sockets that
    /// are not parked are dropped.
    pub fn return_scratch(&self, id: SocketId, scratch: BytesMut) -> bool {
        let parked = self
            .parked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        match parked {
            Some(mut socket) => {
                socket.restore_scratch(scratch);
                self.release(socket)
            }
            None => {
                trace!(socket = %id, "No parked socket for returned scratch");
                false
            }
        }
    }

    /// Number of sockets waiting for their scratch buffer
    pub fn parked_len(&self) -> usize {
        self.parked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Number of idle sockets
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Check if no sockets are idle
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of idle sockets retained
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Close every idle and parked socket, returning how many were closed
    pub fn drain(&self) -> usize {
        let parked = std::mem::take(
            &mut *self.parked.lock().unwrap_or_else(PoisonError::into_inner),
        )
        .len();
        let closed = std::mem::take(&mut *self.lock()).len() + parked;
        debug!(closed, parked, "Socket pool drained");
        closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(capacity: usize) -> (SocketPool, Arc<ServerMetrics>) {
        let metrics = Arc::new(ServerMetrics::new());
        (SocketPool::new(capacity, 64, metrics.clone()), metrics)
    }

    #[test]
    fn test_acquire_allocates_when_empty() {
        let (pool, metrics) = pool(4);
        let a = pool.acquire();
        let b = pool.acquire();

        assert_ne!(a.id(), b.id());
        assert_eq!(metrics.sockets_created(), 2);
        assert!(pool.is_empty());
    }

    #[test]
    fn test_release_then_reuse() {
        let (pool, metrics) = pool(4);
        let socket = pool.acquire();
        let id = socket.id();

        assert!(pool.release(socket));
        assert_eq!(pool.len(), 1);

        let reused = pool.acquire();
        assert_eq!(reused.id(), id);
        assert_eq!(reused.uses(), 2);
        assert_eq!(metrics.sockets_created(), 1);
        assert_eq!(metrics.snapshot().sockets_reused, 1);
    }

    #[test]
    fn test_release_resets_scratch() {
        let (pool, _) = pool(4);
        let mut socket = pool.acquire();
        let mut scratch = socket.take_scratch().unwrap();
        scratch.truncate(3);
        scratch[..3].copy_from_slice(b"abc");
        socket.restore_scratch(scratch);
        pool.release(socket);

        let mut socket = pool.acquire();
        let scratch = socket.take_scratch().unwrap();
        assert_eq!(scratch.len(), 64);
        assert!(scratch.iter().all(|b| *b == 0));
    }

    #[test]
    fn test_busy_socket_is_discarded() {
        let (pool, metrics) = pool(4);
        let mut socket = pool.acquire();
        let _lent = socket.take_scratch();
        assert!(!socket.is_reusable());

        assert!(!pool.release(socket));
        assert!(pool.is_empty());
        assert_eq!(metrics.snapshot().sockets_discarded, 1);
    }

    #[test]
    fn test_parked_socket_returns_with_scratch() {
        let (pool, metrics) = pool(4);
        let mut socket = pool.acquire();
        let id = socket.id();
        let lent = socket.take_scratch().unwrap();

        pool.park(socket);
        assert_eq!(pool.parked_len(), 1);
        assert!(pool.is_empty());

        assert!(pool.return_scratch(id, lent));
        assert_eq!(pool.parked_len(), 0);
        assert_eq!(pool.len(), 1);
        assert_eq!(metrics.sockets_recycled(), 1);
        assert_eq!(pool.acquire().id(), id);

        assert!(!pool.return_scratch(SocketId::new(999), BytesMut::zeroed(64)));
        assert!(pool.is_empty());
    }

    #[test]
    fn test_drain_closes_parked_sockets() {
        let (pool, _) = pool(4);
        let mut busy = pool.acquire();
        let _lent = busy.take_scratch();
        pool.park(busy);
        pool.release(pool.acquire());

        assert_eq!(pool.drain(), 2);
        assert_eq!(pool.parked_len(), 0);
        assert!(pool.is_empty());
    }

    #[test]
    fn test_full_pool_closes_extra() {
        let (pool, metrics) = pool(2);
        let sockets: Vec<_> = (0..3).map(|_| pool.acquire()).collect();
        let retained: Vec<bool> = sockets.into_iter().map(|s| pool.release(s)).collect();

        assert_eq!(retained, vec![true, true, false]);
        assert_eq!(pool.len(), 2);
        assert_eq!(metrics.sockets_recycled(), 2);
        assert_eq!(metrics.snapshot().sockets_discarded, 1);

        assert_eq!(pool.drain(), 2);
        assert!(pool.is_empty());
    }
}
