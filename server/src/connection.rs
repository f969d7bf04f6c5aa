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

//! Reactor connection
//!
//! A [`Connection`] owns one accepted socket. Its receive side and send side
//! each sit behind their own lock and hold the stream half they drive; while
//! an operation is in flight the half (and for receives, the scratch buffer)
//! travels with the operation and comes back on its completion. Because a
//! side can only post while it holds its half, there is never more than one
//! receive and one send outstanding.
//!
//! Teardown detaches the pooled socket under the receive lock. If a receive
//! still holds the scratch buffer the socket is parked in the pool, and the
//! buffer is sent after it when that receive comes back.

use crate::acceptor::AcceptedSocket;
use crate::buffer::{RecvAccumulator, SendQueue};
use crate::pool::{PooledSocket, SocketPool};
use crate::port::PortHandle;
use crate::types::{ConnectionHandle, ConnectionInfo, ConnectionState, SendOutcome, SocketId};
use crate::{ConnectionError, ConnectionResult, ReactorConfig, ServerHandler, ServerMetrics};
use bytes::{Bytes, BytesMut};
use std::any::Any;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Instant;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio_util::sync::CancellationToken;
use tracing::{instrument, trace, warn};

struct RecvSide {
    accumulator: RecvAccumulator,
    reader: Option<OwnedReadHalf>,
    scratch: Option<BytesMut>,
    socket: Option<PooledSocket>,
    detached: bool,
}

struct SendSide {
    queue: SendQueue,
    writer: Option<OwnedWriteHalf>,
}

/// A live connection hosted by the reactor
pub struct Connection {
    // Metadata (lock-free access)
    handle: ConnectionHandle,
    socket_id: SocketId,
    peer_addr: SocketAddr,
    local_addr: SocketAddr,
    created_at: Instant,
    state: AtomicU8,

    // I/O sides, locked independently
    recv: Mutex<RecvSide>,
    send: Mutex<SendSide>,
    cancel: CancellationToken,
    port: PortHandle,
    pool: Arc<SocketPool>,

    // Metrics (lock-free)
    metrics: Arc<ServerMetrics>,
    buffered: AtomicUsize,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    receives: AtomicU64,
    sends: AtomicU64,

    // User-defined metadata storage
    user_data: RwLock<Option<Box<dyn Any + Send + Sync>>>,
}

impl Connection {
    pub(crate) fn new(
        handle: ConnectionHandle,
        accepted: AcceptedSocket,
        port: PortHandle,
        pool: Arc<SocketPool>,
        config: &ReactorConfig,
        metrics: Arc<ServerMetrics>,
    ) -> Self {
        let AcceptedSocket {
            stream,
            peer_addr,
            local_addr,
            mut socket,
        } = accepted;
        let scratch = socket
            .take_scratch()
            .unwrap_or_else(|| BytesMut::zeroed(config.recv_chunk_size));
        let (reader, writer) = stream.into_split();
        let socket_id = socket.id();

        Self {
            handle,
            socket_id,
            peer_addr,
            local_addr,
            created_at: Instant::now(),
            state: AtomicU8::new(ConnectionState::Connecting.as_u8()),
            recv: Mutex::new(RecvSide {
                accumulator: RecvAccumulator::new(config.recv_accumulator_limit),
                reader: Some(reader),
                scratch: Some(scratch),
                socket: Some(socket),
                detached: false,
            }),
            send: Mutex::new(SendSide {
                queue: SendQueue::new(config.send_chunk_size),
                writer: Some(writer),
            }),
            cancel: CancellationToken::new(),
            port,
            pool,
            metrics,
            buffered: AtomicUsize::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            receives: AtomicU64::new(0),
            sends: AtomicU64::new(0),
            user_data: RwLock::new(None),
        }
    }

    fn lock_recv(&self) -> MutexGuard<'_, RecvSide> {
        self.recv.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_send(&self) -> MutexGuard<'_, SendSide> {
        self.send.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get the registry handle
    pub fn handle(&self) -> ConnectionHandle {
        self.handle
    }

    /// Get the identity of the reactor socket this connection runs on
    pub fn socket_id(&self) -> SocketId {
        self.socket_id
    }

    /// Get the peer address
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Get the local address
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Get when the connection was accepted
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Get the current state
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Check if the connection still issues I/O
    pub fn is_active(&self) -> bool {
        self.state().is_active()
    }

    /// Get bytes sent
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    /// Get bytes received
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    /// Get the number of received bytes not yet consumed
    pub fn buffered_bytes(&self) -> usize {
        self.buffered.load(Ordering::Relaxed)
    }

    /// Get the number of submitted bytes not yet handed to a send
    pub fn queued_bytes(&self) -> usize {
        self.lock_send().queue.queued_bytes()
    }

    /// Get a point-in-time summary of the connection
    ///
    /// Safe to call from inside [`ServerHandler::on_receive`].
    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            handle: self.handle,
            socket_id: self.socket_id,
            state: self.state(),
            peer_addr: self.peer_addr,
            local_addr: self.local_addr,
            created_at: self.created_at,
            bytes_sent: self.bytes_sent(),
            bytes_received: self.bytes_received(),
            receives: self.receives.load(Ordering::Relaxed),
            sends: self.sends.load(Ordering::Relaxed),
            buffered_bytes: self.buffered_bytes(),
            queued_bytes: self.queued_bytes(),
        }
    }

    /// Queue bytes for transmission
    ///
    /// The bytes are copied. If no send is in flight the first chunk is
    /// posted immediately, otherwise the whole submission waits behind the
    /// ones already queued. Bytes reach the peer in submission order.
    pub fn enqueue_send(&self, data: &[u8]) -> ConnectionResult<SendOutcome> {
        if data.is_empty() {
            return self.enqueue_send_bytes(Bytes::new());
        }
        self.enqueue_send_bytes(Bytes::copy_from_slice(data))
    }

    /// Queue an owned buffer for transmission without copying
    #[instrument(level = "trace", skip_all, fields(connection = %self.handle, len = data.len()))]
    pub fn enqueue_send_bytes(&self, data: Bytes) -> ConnectionResult<SendOutcome> {
        if !self.is_active() {
            return Err(ConnectionError::Closed);
        }
        if data.is_empty() {
            return Ok(SendOutcome::Empty);
        }

        let mut send = self.lock_send();
        let Some(chunk) = send.queue.submit(data) else {
            trace!(pending = send.queue.pending_len(), "Send in flight, queued");
            return Ok(SendOutcome::Queued);
        };
        let Some(writer) = send.writer.take() else {
            send.queue.clear();
            return Err(ConnectionError::Closed);
        };
        if let Err(err) = self
            .port
            .post_send(self.handle, writer, chunk, self.cancel.clone())
        {
            send.queue.clear();
            return Err(err);
        }
        Ok(SendOutcome::Posted)
    }

    /// Store user-defined data, replacing any previous value
    ///
    /// # Example
    /// ```no_run
    /// # use ioport_server::Connection;
    /// # fn example(conn: &Connection) {
    /// conn.set_user_data(12345u64);
    /// # }
    /// ```
    pub fn set_user_data<T: Any + Send + Sync>(&self, value: T) {
        *self
            .user_data
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Box::new(value));
    }

    /// Borrow user-defined data
    ///
    /// Returns `None` if nothing is stored or the type doesn't match.
    pub fn with_user_data<T: Any + Send + Sync, R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.user_data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(|value| value.downcast_ref::<T>())
            .map(f)
    }

    /// Remove and return user-defined data
    ///
    /// Leaves the slot untouched if the stored type doesn't match.
    pub fn take_user_data<T: Any + Send + Sync>(&self) -> Option<T> {
        let mut slot = self
            .user_data
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if !slot.as_ref().is_some_and(|value| value.is::<T>()) {
            return None;
        }
        slot.take()
            .and_then(|value| value.downcast::<T>().ok())
            .map(|value| *value)
    }

    /// Check if user-defined data is stored
    pub fn has_user_data(&self) -> bool {
        self.user_data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Move to `Active` and post the first receive
    #[instrument(level = "debug", skip_all, fields(connection = %self.handle))]
    pub(crate) fn start_receiving(&self) -> ConnectionResult<()> {
        self.state
            .compare_exchange(
                ConnectionState::Connecting.as_u8(),
                ConnectionState::Active.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map_err(|_| ConnectionError::Closed)?;

        let mut recv = self.lock_recv();
        let (Some(reader), Some(buf)) = (recv.reader.take(), recv.scratch.take()) else {
            return Err(ConnectionError::Closed);
        };
        drop(recv);
        self.port.post_receive(
            self.handle,
            self.socket_id,
            reader,
            buf,
            self.cancel.clone(),
        )
    }

    /// Process a receive that produced `n > 0` bytes and post the next one
    ///
    /// Runs the handler under the receive lock. On failure the stream half
    /// and scratch buffer go back to the connection, or to the pool if the
    /// connection was already detached.
    pub(crate) fn on_receive_complete(
        &self,
        reader: OwnedReadHalf,
        buf: BytesMut,
        n: usize,
        handler: &dyn ServerHandler,
    ) -> ConnectionResult<()> {
        let mut recv = self.lock_recv();
        if !self.is_active() {
            self.stash(&mut recv, reader, buf);
            return Err(ConnectionError::Closed);
        }
        self.receives.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(n as u64, Ordering::Relaxed);
        self.metrics.receive_completed(n as u64);

        let fed = recv
            .accumulator
            .feed(&buf[..n], |data| handler.on_receive(self, data));
        self.buffered
            .store(recv.accumulator.len(), Ordering::Relaxed);

        if let Err(err) = fed {
            self.stash(&mut recv, reader, buf);
            return Err(err);
        }
        if !self.is_active() {
            self.stash(&mut recv, reader, buf);
            return Err(ConnectionError::Closed);
        }
        drop(recv);
        self.port.post_receive(
            self.handle,
            self.socket_id,
            reader,
            buf,
            self.cancel.clone(),
        )
    }

    /// Give a receive's stream half and buffer back without processing
    pub(crate) fn reclaim(&self, reader: OwnedReadHalf, buf: BytesMut) {
        let mut recv = self.lock_recv();
        self.stash(&mut recv, reader, buf);
    }

    fn stash(&self, recv: &mut RecvSide, reader: OwnedReadHalf, buf: BytesMut) {
        if recv.detached {
            drop(reader);
            self.pool.return_scratch(self.socket_id, buf);
        } else {
            recv.reader = Some(reader);
            recv.scratch = Some(buf);
        }
    }

    /// Record a finished send and post the next chunk, if any
    ///
    /// Fails only if the next chunk cannot be posted. The writer is gone at
    /// that point, so the queue is dropped with it.
    pub(crate) fn on_send_complete(
        &self,
        writer: OwnedWriteHalf,
        n: usize,
    ) -> ConnectionResult<()> {
        self.sends.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(n as u64, Ordering::Relaxed);
        self.metrics.send_completed(n as u64);

        let mut send = self.lock_send();
        if !self.is_active() {
            send.queue.clear();
            return Ok(());
        }
        let Some(chunk) = send.queue.complete() else {
            send.writer = Some(writer);
            return Ok(());
        };
        if let Err(err) = self
            .port
            .post_send(self.handle, writer, chunk, self.cancel.clone())
        {
            send.queue.clear();
            warn!(connection = %self.handle, error = %err, "Failed to post next send");
            return Err(err);
        }
        Ok(())
    }

    /// Claim the teardown of this connection
    ///
    /// Returns `true` for exactly one caller. Cancels every in-flight
    /// operation.
    pub(crate) fn begin_close(&self) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if ConnectionState::from_u8(current).is_terminal() {
                return false;
            }
            match self.state.compare_exchange_weak(
                current,
                ConnectionState::Closing.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        self.cancel.cancel();
        true
    }

    /// Close the stream and hand back the pooled socket
    ///
    /// Waits for a handler running under the receive lock to return. If a
    /// receive still holds the scratch buffer the socket is parked in the
    /// pool instead and `None` is returned; the receive's completion
    /// releases it later.
    pub(crate) fn detach(&self) -> Option<PooledSocket> {
        let mut recv = self.lock_recv();
        if recv.detached {
            return None;
        }
        recv.detached = true;
        recv.reader = None;
        recv.accumulator.reset();
        self.buffered.store(0, Ordering::Relaxed);
        let scratch = recv.scratch.take();
        let socket = recv.socket.take().and_then(|mut socket| match scratch {
            Some(scratch) => {
                socket.restore_scratch(scratch);
                Some(socket)
            }
            None => {
                self.pool.park(socket);
                None
            }
        });
        drop(recv);

        let mut send = self.lock_send();
        send.writer = None;
        send.queue.clear();
        socket
    }

    pub(crate) fn mark_closed(&self) {
        self.state
            .store(ConnectionState::Closed.as_u8(), Ordering::Release);
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("handle", &self.handle)
            .field("socket_id", &self.socket_id)
            .field("peer_addr", &self.peer_addr)
            .field("state", &self.state())
            .field("bytes_sent", &self.bytes_sent())
            .field("bytes_received", &self.bytes_received())
            .finish()
    }
}
