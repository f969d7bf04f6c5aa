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

//! Listener and outstanding accepts
//!
//! The acceptor keeps a fixed number of accepts outstanding against the
//! listening socket. Every accept completion, successful or not, posts a
//! replacement on the same slot, so the number outstanding stays constant
//! until the listener is closed.

use crate::connection::Connection;
use crate::pool::{PooledSocket, SocketPool};
use crate::port::PortHandle;
use crate::registry::ConnectionRegistry;
use crate::types::ConnectionHandle;
use crate::{ConnectionError, ReactorConfig, ReactorError, Result, ServerMetrics};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// One outstanding accept
#[derive(Debug)]
pub(crate) struct PendingAccept {
    slot: usize,
    socket: PooledSocket,
}

impl PendingAccept {
    pub fn slot(&self) -> usize {
        self.slot
    }
}

/// An accepted stream paired with the pooled socket it will run on
#[derive(Debug)]
pub(crate) struct AcceptedSocket {
    pub stream: TcpStream,
    pub peer_addr: SocketAddr,
    pub local_addr: SocketAddr,
    pub socket: PooledSocket,
}

/// What became of an accept completion
#[derive(Debug)]
pub(crate) enum AcceptOutcome {
    /// Registered and receiving
    Established(ConnectionHandle),
    /// Registered but the first receive could not be posted
    Failed(Arc<Connection>, ConnectionError),
    /// Nothing was registered
    Abandoned,
}

/// Keeps accepts outstanding and turns their completions into connections
pub(crate) struct Acceptor {
    listener: Mutex<Option<Arc<TcpListener>>>,
    local_addr: SocketAddr,
    cancel: CancellationToken,
    slots: usize,
    outstanding: AtomicUsize,
    config: Arc<ReactorConfig>,
    port: PortHandle,
    pool: Arc<SocketPool>,
    registry: Arc<ConnectionRegistry>,
    metrics: Arc<ServerMetrics>,
}

impl Acceptor {
    /// Create, bind and listen on the listening socket
    pub fn bind(
        config: Arc<ReactorConfig>,
        port: PortHandle,
        pool: Arc<SocketPool>,
        registry: Arc<ConnectionRegistry>,
        metrics: Arc<ServerMetrics>,
    ) -> Result<Self> {
        let addr = config.socket_addr();
        let listener = {
            let _guard = port.enter();
            let socket = match addr {
                SocketAddr::V4(_) => TcpSocket::new_v4(),
                SocketAddr::V6(_) => TcpSocket::new_v6(),
            }?;
            socket
                .bind(addr)
                .map_err(|source| ReactorError::Bind { addr, source })?;
            socket
                .listen(config.listen_backlog)
                .map_err(|source| ReactorError::Listen { addr, source })?
        };
        let local_addr = listener.local_addr()?;
        info!(%local_addr, backlog = config.listen_backlog, "Listening");

        Ok(Self {
            listener: Mutex::new(Some(Arc::new(listener))),
            local_addr,
            cancel: CancellationToken::new(),
            slots: config.max_pending_accepts,
            outstanding: AtomicUsize::new(0),
            config,
            port,
            pool,
            registry,
            metrics,
        })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts currently outstanding
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Post the full batch of accepts
    pub fn post_all(&self) -> Result<()> {
        for slot in 0..self.slots {
            self.post_accept(slot)?;
        }
        debug!(slots = self.slots, "Accept batch posted");
        Ok(())
    }

    /// Issue one accept on `slot`
    ///
    /// Fails with [`ReactorError::ListenerClosed`] once the listener is
    /// closed.
    pub fn post_accept(&self, slot: usize) -> Result<()> {
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(ReactorError::ListenerClosed)?;
        if self.cancel.is_cancelled() {
            return Err(ReactorError::ListenerClosed);
        }

        let pending = PendingAccept {
            slot,
            socket: self.pool.acquire(),
        };
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        if let Err(pending) = self.port.post_accept(listener, self.cancel.clone(), pending) {
            self.outstanding.fetch_sub(1, Ordering::AcqRel);
            self.pool.release(pending.socket);
            return Err(ReactorError::ListenerClosed);
        }
        Ok(())
    }

    /// Close the listener; outstanding accepts complete with an error
    pub fn close(&self) {
        self.cancel.cancel();
        if self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
        {
            debug!(local_addr = %self.local_addr, "Listener closed");
        }
    }

    /// Check if the listener has been closed
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Handle a finished accept and re-post its slot
    pub fn on_accept_complete(
        &self,
        pending: PendingAccept,
        result: io::Result<(TcpStream, SocketAddr)>,
    ) -> AcceptOutcome {
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
        let PendingAccept { slot, socket } = pending;

        let outcome = match result {
            Ok((stream, peer_addr)) => self.establish(stream, peer_addr, socket),
            Err(err) => {
                self.pool.release(socket);
                if !self.is_closed() {
                    self.metrics.accept_error();
                    warn!(slot, error = %err, "Accept failed");
                }
                AcceptOutcome::Abandoned
            }
        };

        if !self.is_closed() {
            if let Err(err) = self.post_accept(slot) {
                error!(slot, error = %err, "Failed to re-post accept");
            }
        }
        outcome
    }

    fn establish(
        &self,
        stream: TcpStream,
        peer_addr: SocketAddr,
        socket: PooledSocket,
    ) -> AcceptOutcome {
        self.metrics.accept_completed();
        if self.is_closed() {
            trace!(%peer_addr, "Accept completed during shutdown, dropping");
            self.pool.release(socket);
            return AcceptOutcome::Abandoned;
        }

        let local_addr = match stream.local_addr() {
            Ok(addr) => addr,
            Err(err) => {
                warn!(%peer_addr, error = %err, "Accepted socket has no local address");
                self.metrics.connection_error();
                self.pool.release(socket);
                return AcceptOutcome::Abandoned;
            }
        };
        if self.config.nodelay {
            if let Err(err) = stream.set_nodelay(true) {
                debug!(%peer_addr, error = %err, "Failed to set TCP_NODELAY");
            }
        }

        let Some(handle) = self.registry.reserve() else {
            error!(%peer_addr, "Connection registry exhausted, dropping connection");
            self.metrics.connection_error();
            self.pool.release(socket);
            return AcceptOutcome::Abandoned;
        };
        let accepted = AcceptedSocket {
            stream,
            peer_addr,
            local_addr,
            socket,
        };
        let connection = Arc::new(Connection::new(
            handle,
            accepted,
            self.port.clone(),
            self.pool.clone(),
            &self.config,
            self.metrics.clone(),
        ));
        if self.registry.fill(handle, connection.clone()).is_err() {
            // placeholder vanished, which only a concurrent drain can do
            if let Some(socket) = connection.detach() {
                self.pool.release(socket);
            }
            return AcceptOutcome::Abandoned;
        }
        self.metrics.connection_opened();
        info!(connection = %handle, %peer_addr, socket = %connection.socket_id(), "Connection established");

        match connection.start_receiving() {
            Ok(()) => AcceptOutcome::Established(handle),
            Err(err) => AcceptOutcome::Failed(connection, err),
        }
    }
}

impl std::fmt::Debug for Acceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Acceptor")
            .field("local_addr", &self.local_addr)
            .field("slots", &self.slots)
            .field("outstanding", &self.outstanding())
            .field("closed", &self.is_closed())
            .finish()
    }
}
