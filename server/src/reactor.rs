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

//! Completion reactor
//!
//! The [`CompletionReactor`] is the main entry point. It owns the completion
//! queue, a fixed pool of worker threads parked on it, the listener, the
//! connection registry and the socket pool. Workers dequeue one completion
//! at a time and dispatch it by kind; every teardown, whatever triggered it,
//! runs through a single disconnect path that executes exactly once per
//! connection.

use crate::acceptor::{AcceptOutcome, Acceptor};
use crate::port::{Completion, CompletionPort};
use crate::registry::ConnectionRegistry;
use crate::stack::is_networking_stack_initialized;
use crate::types::{ConnectionHandle, ConnectionInfo, SendOutcome, ServerSnapshot};
use crate::{
    CallbackHandler, Connection, ConnectionError, ReactorConfig, ReactorError, Result,
    ServerHandler, ServerMetrics, SocketPool,
};
use bytes::Bytes;
use crossbeam_channel::Receiver;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, error, info, trace, warn};

/// Result of a broadcast operation
#[derive(Debug, Clone, Default)]
pub struct BroadcastResult {
    /// Total number of connections attempted
    pub total: usize,
    /// Number of successful submissions
    pub succeeded: usize,
    /// Number of failed submissions
    pub failed: usize,
    /// Errors that occurred (handle and error message)
    pub errors: Vec<(ConnectionHandle, String)>,
}

impl BroadcastResult {
    /// Check if all broadcasts succeeded
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }

    /// Get the success rate as a percentage
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            (self.succeeded as f64 / self.total as f64) * 100.0
        }
    }
}

/// State shared by every worker of one run
struct ReactorCore {
    handler: Arc<dyn ServerHandler>,
    registry: Arc<ConnectionRegistry>,
    pool: Arc<SocketPool>,
    acceptor: Acceptor,
    metrics: Arc<ServerMetrics>,
    shutdown: AtomicBool,
}

impl ReactorCore {
    fn run_worker(&self, worker: usize, receiver: Receiver<Completion>) {
        debug!(worker, "Worker started");
        while !self.shutdown.load(Ordering::Acquire) {
            let Ok(completion) = receiver.recv() else {
                break;
            };
            self.dispatch(completion);
        }
        debug!(worker, "Worker stopped");
    }

    fn dispatch(&self, completion: Completion) {
        match completion {
            Completion::Accept { pending, result } => {
                if let AcceptOutcome::Failed(conn, err) =
                    self.acceptor.on_accept_complete(pending, result)
                {
                    self.disconnect(&conn, err);
                }
            }
            Completion::Receive {
                handle,
                socket,
                reader,
                buf,
                result,
            } => {
                let Some(conn) = self.registry.get(handle) else {
                    trace!(connection = %handle, "Stale receive completion, returning scratch");
                    drop(reader);
                    self.pool.return_scratch(socket, buf);
                    return;
                };
                if !conn.is_active() {
                    conn.reclaim(reader, buf);
                    return;
                }
                match result {
                    Ok(0) => {
                        conn.reclaim(reader, buf);
                        self.disconnect(&conn, ConnectionError::PeerClosed);
                    }
                    Ok(n) => {
                        if let Err(err) =
                            conn.on_receive_complete(reader, buf, n, self.handler.as_ref())
                        {
                            self.disconnect(&conn, err);
                        }
                    }
                    Err(err) => {
                        conn.reclaim(reader, buf);
                        self.disconnect(&conn, ConnectionError::from_io(err));
                    }
                }
            }
            Completion::Send {
                handle,
                writer,
                result,
            } => {
                let Some(conn) = self.registry.get(handle).filter(|conn| conn.is_active()) else {
                    trace!(connection = %handle, "Dropping stale send completion");
                    return;
                };
                match result {
                    Ok(n) => {
                        if let Err(err) = conn.on_send_complete(writer, n) {
                            self.disconnect(&conn, err);
                        }
                    }
                    Err(err) => {
                        drop(writer);
                        self.disconnect(&conn, ConnectionError::from_io(err));
                    }
                }
            }
            Completion::Wakeup => {}
        }
    }

    /// Tear a connection down; only the first caller for a connection acts
    fn disconnect(&self, conn: &Arc<Connection>, cause: ConnectionError) {
        if !conn.begin_close() {
            return;
        }
        let handle = conn.handle();
        match &cause {
            ConnectionError::AccumulatorOverflow { buffered, limit } => {
                self.metrics.overflow_disconnect();
                warn!(connection = %handle, buffered, limit, "Receive accumulator overflow, disconnecting");
            }
            ConnectionError::Closed => {
                debug!(connection = %handle, "Closing connection");
            }
            cause if cause.is_peer_initiated() => {
                debug!(connection = %handle, %cause, "Peer disconnected");
            }
            cause => {
                self.metrics.connection_error();
                debug!(connection = %handle, %cause, "Connection failed");
            }
        }

        let socket = conn.detach();
        self.handler.on_disconnect(conn);
        self.registry.remove(handle);
        self.metrics.connection_closed(conn.created_at().elapsed());
        if let Some(socket) = socket {
            self.pool.release(socket);
        }
        conn.mark_closed();
        info!(connection = %handle, peer_addr = %conn.peer_addr(), "Connection closed");
    }
}

struct Running {
    core: Arc<ReactorCore>,
    port: CompletionPort,
    workers: Vec<JoinHandle<()>>,
    started_at: Instant,
}

impl Running {
    /// Stop workers and the I/O runtime without touching connections
    fn halt(&mut self) {
        self.core.shutdown.store(true, Ordering::Release);
        self.core.acceptor.close();
        self.port.wake(self.workers.len());
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                error!("Reactor worker panicked");
            }
        }
        debug!(backlog = self.port.backlog(), "Reactor workers joined");
    }
}

/// Completion-dispatch TCP server
///
/// # Example
///
/// ```no_run
/// use ioport_server::{CompletionReactor, ReactorConfig, initialize_networking_stack};
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     initialize_networking_stack()?;
///     let mut reactor = CompletionReactor::new(ReactorConfig::new(8899));
///     reactor.start_with(
///         |conn, data| {
///             let _ = conn.enqueue_send(data);
///             data.len()
///         },
///         |conn| println!("{} closed", conn.handle()),
///     )?;
///
///     // Serve until told otherwise
///     reactor.stop()?;
///     Ok(())
/// }
/// ```
pub struct CompletionReactor {
    config: Arc<ReactorConfig>,
    metrics: Arc<ServerMetrics>,
    running: Option<Running>,
}

impl CompletionReactor {
    /// Create a stopped reactor
    pub fn new(config: ReactorConfig) -> Self {
        Self {
            config: Arc::new(config),
            metrics: Arc::new(ServerMetrics::new()),
            running: None,
        }
    }

    /// Start serving with the given handler
    ///
    /// Brings up the completion queue and I/O threads, binds and listens,
    /// spawns the workers and posts the accept batch. On any failure
    /// everything already brought up is torn down again before the error
    /// is returned.
    pub fn start(&mut self, handler: Arc<dyn ServerHandler>) -> Result<()> {
        if self.running.is_some() {
            return Err(ReactorError::AlreadyRunning);
        }
        if !is_networking_stack_initialized() {
            return Err(ReactorError::StackNotInitialized);
        }
        self.config.validate().map_err(ReactorError::InvalidConfig)?;

        let port = CompletionPort::new(self.config.io_threads)?;
        let pool = Arc::new(SocketPool::new(
            self.config.socket_pool_capacity,
            self.config.recv_chunk_size,
            self.metrics.clone(),
        ));
        let registry = Arc::new(ConnectionRegistry::new());
        let acceptor = Acceptor::bind(
            self.config.clone(),
            port.handle(),
            pool.clone(),
            registry.clone(),
            self.metrics.clone(),
        )?;

        let core = Arc::new(ReactorCore {
            handler,
            registry,
            pool,
            acceptor,
            metrics: self.metrics.clone(),
            shutdown: AtomicBool::new(false),
        });
        let worker_count = self.config.effective_worker_threads();
        let mut running = Running {
            core,
            port,
            workers: Vec::with_capacity(worker_count),
            started_at: Instant::now(),
        };

        for worker in 0..worker_count {
            let core = running.core.clone();
            let receiver = running.port.receiver();
            let spawned = thread::Builder::new()
                .name(format!("reactor-worker-{worker}"))
                .spawn(move || core.run_worker(worker, receiver));
            match spawned {
                Ok(handle) => running.workers.push(handle),
                Err(err) => {
                    running.halt();
                    running.port.shutdown();
                    return Err(ReactorError::WorkerSpawn(err));
                }
            }
        }

        if let Err(err) = running.core.acceptor.post_all() {
            running.halt();
            running.port.shutdown();
            return Err(err);
        }

        info!(
            local_addr = %running.core.acceptor.local_addr(),
            workers = worker_count,
            io_threads = self.config.io_threads,
            "Completion reactor started"
        );
        self.running = Some(running);
        Ok(())
    }

    /// Start serving with closures instead of a [`ServerHandler`]
    pub fn start_with<R, D>(&mut self, on_receive: R, on_disconnect: D) -> Result<()>
    where
        R: Fn(&Connection, &[u8]) -> usize + Send + Sync + 'static,
        D: Fn(&Connection) + Send + Sync + 'static,
    {
        self.start(Arc::new(
            CallbackHandler::new(on_receive).with_disconnect(on_disconnect),
        ))
    }

    /// Stop serving
    ///
    /// Closes the listener, wakes and joins every worker, tears down every
    /// remaining connection (each gets its disconnect callback), closes the
    /// pooled sockets and stops the I/O threads. Returns once all of that is
    /// done.
    pub fn stop(&mut self) -> Result<()> {
        let Some(mut running) = self.running.take() else {
            return Err(ReactorError::NotRunning);
        };
        info!("Stopping completion reactor");

        running.halt();

        let core = &running.core;
        let remaining = core.registry.entries();
        let closed = remaining.len();
        for (_, conn) in remaining {
            core.disconnect(&conn, ConnectionError::Closed);
        }
        core.registry.drain();
        let pooled = core.pool.drain();
        running.port.shutdown();

        info!(
            closed,
            pooled,
            uptime = ?running.started_at.elapsed(),
            "Completion reactor stopped"
        );
        Ok(())
    }

    /// Check if the reactor is running
    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Address the listener is bound to, while running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running
            .as_ref()
            .map(|running| running.core.acceptor.local_addr())
    }

    /// Number of registered connections
    pub fn connection_count(&self) -> usize {
        self.running
            .as_ref()
            .map_or(0, |running| running.core.registry.len())
    }

    /// Look up a connection by handle
    pub fn connection(&self, handle: ConnectionHandle) -> Option<Arc<Connection>> {
        self.running.as_ref()?.core.registry.get(handle)
    }

    /// Summaries of every registered connection
    pub fn connections(&self) -> Vec<ConnectionInfo> {
        self.running.as_ref().map_or_else(Vec::new, |running| {
            running
                .core
                .registry
                .entries()
                .into_iter()
                .map(|(_, conn)| conn.info())
                .collect()
        })
    }

    /// Queue bytes for one connection
    pub fn send_to(&self, handle: ConnectionHandle, data: &[u8]) -> Result<SendOutcome> {
        let running = self.running.as_ref().ok_or(ReactorError::NotRunning)?;
        let conn = running
            .core
            .registry
            .get(handle)
            .ok_or(ReactorError::ConnectionNotFound(handle))?;
        Ok(conn.enqueue_send(data)?)
    }

    /// Queue the same bytes for every registered connection
    pub fn broadcast(&self, data: &[u8]) -> BroadcastResult {
        let mut result = BroadcastResult::default();
        let Some(running) = self.running.as_ref() else {
            return result;
        };

        let payload = Bytes::copy_from_slice(data);
        let connections = running.core.registry.entries();
        result.total = connections.len();
        for (handle, conn) in connections {
            match conn.enqueue_send_bytes(payload.clone()) {
                Ok(_) => result.succeeded += 1,
                Err(err) => {
                    result.failed += 1;
                    result.errors.push((handle, err.to_string()));
                }
            }
        }
        debug!(
            total = result.total,
            succeeded = result.succeeded,
            failed = result.failed,
            "Broadcast complete"
        );
        result
    }

    /// Close a connection from the server side
    ///
    /// The disconnect callback runs on the calling thread before this returns.
    pub fn disconnect(&self, handle: ConnectionHandle) -> Result<()> {
        let running = self.running.as_ref().ok_or(ReactorError::NotRunning)?;
        let conn = running
            .core
            .registry
            .get(handle)
            .ok_or(ReactorError::ConnectionNotFound(handle))?;
        running.core.disconnect(&conn, ConnectionError::Closed);
        Ok(())
    }

    /// Get a snapshot of the server state, while running
    pub fn snapshot(&self) -> Option<ServerSnapshot> {
        let running = self.running.as_ref()?;
        Some(ServerSnapshot {
            active_connections: running.core.registry.len(),
            total_connections: self.metrics.total_connections(),
            local_addr: running.core.acceptor.local_addr(),
            worker_threads: running.workers.len(),
            outstanding_accepts: running.core.acceptor.outstanding(),
            pooled_sockets: running.core.pool.len(),
            uptime: running.started_at.elapsed(),
            started_at: running.started_at,
        })
    }

    /// Get the server metrics
    pub fn metrics(&self) -> Arc<ServerMetrics> {
        self.metrics.clone()
    }

    /// Get the reactor configuration
    pub fn config(&self) -> &ReactorConfig {
        &self.config
    }
}

impl std::fmt::Debug for CompletionReactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionReactor")
            .field("local_addr", &self.local_addr())
            .field("running", &self.is_running())
            .field("connection_count", &self.connection_count())
            .finish()
    }
}

impl Drop for CompletionReactor {
    fn drop(&mut self) {
        if self.running.is_some() {
            warn!("CompletionReactor dropped while still running");
            let _ = self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::{initialize_networking_stack, teardown_networking_stack};
    use std::io::{Read, Write};
    use std::net::TcpStream;
    use std::time::Duration;

    fn local_config() -> ReactorConfig {
        ReactorConfig::new(0)
            .with_bind_address("127.0.0.1".parse().unwrap())
            .with_worker_threads(2)
            .with_io_threads(1)
    }

    fn echo(mut reactor: CompletionReactor) -> CompletionReactor {
        reactor
            .start_with(
                |conn, data| {
                    conn.enqueue_send(data).unwrap();
                    data.len()
                },
                |_| {},
            )
            .unwrap();
        reactor
    }

    #[test]
    fn test_reactor_lifecycle() {
        initialize_networking_stack().unwrap();
        let reactor = CompletionReactor::new(local_config());
        assert!(!reactor.is_running());
        assert!(reactor.local_addr().is_none());
        assert!(reactor.snapshot().is_none());

        let mut reactor = echo(reactor);
        assert!(reactor.is_running());
        let snapshot = reactor.snapshot().unwrap();
        assert_eq!(snapshot.worker_threads, 2);
        assert_eq!(snapshot.active_connections, 0);
        assert_ne!(snapshot.local_addr.port(), 0);

        reactor.stop().unwrap();
        assert!(!reactor.is_running());
        assert!(matches!(reactor.stop(), Err(ReactorError::NotRunning)));
        teardown_networking_stack().unwrap();
    }

    #[test]
    fn test_reactor_double_start() {
        initialize_networking_stack().unwrap();
        let mut reactor = echo(CompletionReactor::new(local_config()));

        let result = reactor.start_with(|_, data| data.len(), |_| {});
        assert!(matches!(result, Err(ReactorError::AlreadyRunning)));

        reactor.stop().unwrap();
        teardown_networking_stack().unwrap();
    }

    #[test]
    fn test_reactor_rejects_invalid_config() {
        initialize_networking_stack().unwrap();
        let mut reactor = CompletionReactor::new(local_config().with_max_pending_accepts(0));

        let result = reactor.start_with(|_, data| data.len(), |_| {});
        assert!(matches!(result, Err(ReactorError::InvalidConfig(_))));
        assert!(!reactor.is_running());
        teardown_networking_stack().unwrap();
    }

    #[test]
    fn test_reactor_restart() {
        initialize_networking_stack().unwrap();
        let mut reactor = echo(CompletionReactor::new(local_config()));
        reactor.stop().unwrap();

        reactor = echo(reactor);
        let mut client = TcpStream::connect(reactor.local_addr().unwrap()).unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        client.write_all(b"again").unwrap();
        let mut reply = [0u8; 5];
        client.read_exact(&mut reply).unwrap();
        assert_eq!(&reply, b"again");

        reactor.stop().unwrap();
        teardown_networking_stack().unwrap();
    }

    #[test]
    fn test_unknown_handle() {
        initialize_networking_stack().unwrap();
        let reactor = echo(CompletionReactor::new(local_config()));
        let handle = ConnectionHandle::new(42, 7);

        assert!(reactor.connection(handle).is_none());
        assert!(matches!(
            reactor.send_to(handle, b"x"),
            Err(ReactorError::ConnectionNotFound(_))
        ));
        assert!(matches!(
            reactor.disconnect(handle),
            Err(ReactorError::ConnectionNotFound(_))
        ));
        assert!(reactor.broadcast(b"x").all_succeeded());

        drop(reactor);
        teardown_networking_stack().unwrap();
    }

    #[test]
    fn test_broadcast_result() {
        let result = BroadcastResult {
            total: 4,
            succeeded: 3,
            failed: 1,
            errors: vec![(ConnectionHandle::new(0, 0), "Connection closed".into())],
        };
        assert!(!result.all_succeeded());
        assert_eq!(result.success_rate(), 75.0);
        assert_eq!(BroadcastResult::default().success_rate(), 100.0);
    }
}
