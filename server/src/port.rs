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

//! Completion queue
//!
//! Socket operations are issued asynchronously on a small tokio runtime.
//! Each posted operation runs as its own task and, when it finishes, posts
//! exactly one [`Completion`] into a shared multi-consumer channel. Reactor
//! workers block on that channel and never touch the runtime themselves.
//!
//! Every completion carries back the resources its operation borrowed
//! (stream halves, scratch buffer, pooled socket) so ownership always has a
//! single home: either the connection, or the operation in flight.

use crate::acceptor::PendingAccept;
use crate::types::{ConnectionHandle, SocketId};
use crate::{ConnectionError, ConnectionResult, ReactorError, Result};
use bytes::{Bytes, BytesMut};
use crossbeam_channel::{Receiver, Sender};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::{Builder, EnterGuard, Handle, Runtime};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// How long shutdown waits for cancelled operations to unwind
const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// A finished socket operation
pub(crate) enum Completion {
    /// An accept finished on the listener
    Accept {
        pending: PendingAccept,
        result: io::Result<(TcpStream, SocketAddr)>,
    },
    /// A receive finished; `Ok(0)` means the peer closed
    Receive {
        handle: ConnectionHandle,
        socket: SocketId,
        reader: OwnedReadHalf,
        buf: BytesMut,
        result: io::Result<usize>,
    },
    /// A send of one chunk finished
    Send {
        handle: ConnectionHandle,
        writer: OwnedWriteHalf,
        result: io::Result<usize>,
    },
    /// Nudge a worker to re-check the shutdown flag
    Wakeup,
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Completion::Accept { pending, result } => f
                .debug_struct("Accept")
                .field("slot", &pending.slot())
                .field("ok", &result.is_ok())
                .finish(),
            Completion::Receive {
                handle,
                socket,
                result,
                ..
            } => f
                .debug_struct("Receive")
                .field("handle", handle)
                .field("socket", socket)
                .field("result", result)
                .finish(),
            Completion::Send { handle, result, .. } => f
                .debug_struct("Send")
                .field("handle", handle)
                .field("result", result)
                .finish(),
            Completion::Wakeup => f.write_str("Wakeup"),
        }
    }
}

fn aborted() -> io::Error {
    io::Error::from(io::ErrorKind::ConnectionAborted)
}

/// Owner of the completion queue and the I/O runtime
pub(crate) struct CompletionPort {
    receiver: Receiver<Completion>,
    handle: PortHandle,
    runtime: Option<Runtime>,
}

impl CompletionPort {
    /// Create the queue and start `io_threads` I/O driver threads
    pub fn new(io_threads: usize) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(io_threads.max(1))
            .thread_name("reactor-io")
            .enable_io()
            .build()
            .map_err(ReactorError::QueueCreation)?;
        let (sender, receiver) = crossbeam_channel::unbounded();

        let handle = PortHandle {
            sender,
            runtime: runtime.handle().clone(),
            closed: Arc::new(AtomicBool::new(false)),
        };
        debug!(io_threads, "Completion port created");

        Ok(Self {
            receiver,
            handle,
            runtime: Some(runtime),
        })
    }

    /// Posting side of the queue
    pub fn handle(&self) -> PortHandle {
        self.handle.clone()
    }

    /// Consuming side of the queue, one clone per worker
    pub fn receiver(&self) -> Receiver<Completion> {
        self.receiver.clone()
    }

    /// Post one wake-up per worker
    pub fn wake(&self, workers: usize) {
        for _ in 0..workers {
            self.handle.post(Completion::Wakeup);
        }
    }

    /// Completions waiting to be dequeued
    pub fn backlog(&self) -> usize {
        self.receiver.len()
    }

    /// Refuse further operations and stop the I/O runtime
    ///
    /// Completions still queued are dropped, which closes whatever sockets
    /// they carry.
    pub fn shutdown(&mut self) {
        self.handle.closed.store(true, Ordering::Release);
        let dropped = self.receiver.try_iter().count();
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);
        }
        // tasks cancelled during the runtime shutdown may have posted late
        let dropped = dropped + self.receiver.try_iter().count();
        debug!(dropped, "Completion port shut down");
    }
}

impl Drop for CompletionPort {
    fn drop(&mut self) {
        if self.runtime.is_some() {
            self.shutdown();
        }
    }
}

/// Cloneable posting handle for the completion queue
#[derive(Clone)]
pub(crate) struct PortHandle {
    sender: Sender<Completion>,
    runtime: Handle,
    closed: Arc<AtomicBool>,
}

impl PortHandle {
    /// Check whether the port refuses new operations
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Enter the I/O runtime (sockets must be registered from inside it)
    pub fn enter(&self) -> EnterGuard<'_> {
        self.runtime.enter()
    }

    /// Post a completion directly
    pub fn post(&self, completion: Completion) {
        if let Err(err) = self.sender.send(completion) {
            trace!(completion = ?err.into_inner(), "Completion queue closed");
        }
    }

    /// Issue an asynchronous accept
    ///
    /// Hands `pending` back if the port no longer accepts operations.
    pub fn post_accept(
        &self,
        listener: Arc<TcpListener>,
        cancel: CancellationToken,
        pending: PendingAccept,
    ) -> std::result::Result<(), PendingAccept> {
        if self.is_closed() {
            return Err(pending);
        }
        let port = self.clone();
        self.runtime.spawn(async move {
            let result = tokio::select! {
                _ = cancel.cancelled() => Err(aborted()),
                result = listener.accept() => result,
            };
            drop(listener);
            port.post(Completion::Accept { pending, result });
        });
        Ok(())
    }

    /// Issue an asynchronous receive of at most `buf.len()` bytes
    pub fn post_receive(
        &self,
        handle: ConnectionHandle,
        socket: SocketId,
        mut reader: OwnedReadHalf,
        mut buf: BytesMut,
        cancel: CancellationToken,
    ) -> ConnectionResult<()> {
        if self.is_closed() {
            return Err(ConnectionError::PostFailed(
                "completion port closed".to_string(),
            ));
        }
        let port = self.clone();
        self.runtime.spawn(async move {
            let result = tokio::select! {
                _ = cancel.cancelled() => Err(aborted()),
                result = reader.read(&mut buf[..]) => result,
            };
            port.post(Completion::Receive {
                handle,
                socket,
                reader,
                buf,
                result,
            });
        });
        Ok(())
    }

    /// Issue an asynchronous send of one whole chunk
    pub fn post_send(
        &self,
        handle: ConnectionHandle,
        mut writer: OwnedWriteHalf,
        chunk: Bytes,
        cancel: CancellationToken,
    ) -> ConnectionResult<()> {
        if self.is_closed() {
            return Err(ConnectionError::PostFailed(
                "completion port closed".to_string(),
            ));
        }
        let port = self.clone();
        self.runtime.spawn(async move {
            let result = tokio::select! {
                _ = cancel.cancelled() => Err(aborted()),
                result = writer.write_all(&chunk) => result.map(|()| chunk.len()),
            };
            port.post(Completion::Send {
                handle,
                writer,
                result,
            });
        });
        Ok(())
    }
}

impl std::fmt::Debug for PortHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortHandle")
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wakeups_are_delivered() {
        let port = CompletionPort::new(1).unwrap();
        let receiver = port.receiver();

        port.wake(3);
        assert_eq!(port.backlog(), 3);
        for _ in 0..3 {
            assert!(matches!(receiver.recv().unwrap(), Completion::Wakeup));
        }
    }

    #[test]
    fn test_shutdown_closes_port_and_drops_backlog() {
        let mut port = CompletionPort::new(1).unwrap();
        let handle = port.handle();
        port.wake(2);

        port.shutdown();
        assert!(handle.is_closed());
        assert_eq!(port.backlog(), 0);
    }

    #[test]
    fn test_receive_and_send_complete_through_queue() {
        let port = CompletionPort::new(1).unwrap();
        let handle = port.handle();
        let receiver = port.receiver();
        let conn = ConnectionHandle::new(0, 0);

        let (server, client) = {
            let _guard = handle.enter();
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            let client = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
            let (server, _) = listener.accept().unwrap();
            server.set_nonblocking(true).unwrap();
            (TcpStream::from_std(server).unwrap(), client)
        };
        let (reader, writer) = server.into_split();

        handle
            .post_send(conn, writer, Bytes::from_static(b"ping"), CancellationToken::new())
            .unwrap();
        let writer = match receiver.recv().unwrap() {
            Completion::Send { result, writer, .. } => {
                assert_eq!(result.unwrap(), 4);
                writer
            }
            other => panic!("unexpected completion {other:?}"),
        };

        use std::io::{Read, Write};
        let mut client = client;
        let mut echoed = [0u8; 4];
        client.read_exact(&mut echoed).unwrap();
        assert_eq!(&echoed, b"ping");

        client.write_all(b"pong").unwrap();
        handle
            .post_receive(
                conn,
                SocketId::new(1),
                reader,
                BytesMut::zeroed(16),
                CancellationToken::new(),
            )
            .unwrap();
        match receiver.recv().unwrap() {
            Completion::Receive { result, buf, .. } => {
                let n = result.unwrap();
                assert!(n > 0 && n <= 4);
                assert_eq!(&buf[..n], &b"pong"[..n]);
            }
            other => panic!("unexpected completion {other:?}"),
        }
        drop(writer);
    }

    #[test]
    fn test_cancelled_receive_completes_aborted() {
        let port = CompletionPort::new(1).unwrap();
        let handle = port.handle();
        let receiver = port.receiver();

        let (server, _client) = {
            let _guard = handle.enter();
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            let client = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
            let (server, _) = listener.accept().unwrap();
            server.set_nonblocking(true).unwrap();
            (TcpStream::from_std(server).unwrap(), client)
        };
        let (reader, _writer) = server.into_split();

        let cancel = CancellationToken::new();
        handle
            .post_receive(
                ConnectionHandle::new(1, 0),
                SocketId::new(7),
                reader,
                BytesMut::zeroed(8),
                cancel.clone(),
            )
            .unwrap();
        cancel.cancel();

        match receiver.recv().unwrap() {
            Completion::Receive {
                handle,
                socket,
                result,
                ..
            } => {
                assert_eq!(handle, ConnectionHandle::new(1, 0));
                assert_eq!(socket, SocketId::new(7));
                assert_eq!(result.unwrap_err().kind(), io::ErrorKind::ConnectionAborted);
            }
            other => panic!("unexpected completion {other:?}"),
        }
    }
}
