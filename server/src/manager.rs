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

//! Worker bookkeeping
//!
//! Every accepted socket gets a [`ConnectionWorker`] task and an entry in a
//! concurrent map. The entry removes itself when the task ends, so the map
//! size is the live connection count the acceptor checks against the cap.

use crate::{
    ConnectionId, ConnectionInfo, ConnectionState, ConnectionWorker, Result, ServerContext,
    XmppConnection, XmppError,
};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Interval at which shutdown checks for connections to drain
pub const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Managed connection entry
struct ManagedConnection {
    id: ConnectionId,
    peer_addr: SocketAddr,
    created_at: Instant,
    /// Mirrors the worker's handshake state
    state: Arc<AtomicU8>,
    /// Force-close signal
    cancel: CancellationToken,
    /// Taken by shutdown to await the worker
    handle: Option<JoinHandle<()>>,
}

impl ManagedConnection {
    fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            id: self.id,
            state: ConnectionState::from_u8(self.state.load(Ordering::Acquire)),
            peer_addr: self.peer_addr,
            created_at: self.created_at,
        }
    }
}

/// Connection manager
pub struct ConnectionManager {
    /// Live workers (lock-free concurrent map)
    connections: Arc<DashMap<ConnectionId, ManagedConnection>>,
    /// Next connection ID (monotonically increasing)
    next_id: AtomicU64,
    /// State handed to every worker
    context: ServerContext,
}

impl ConnectionManager {
    /// Create a new connection manager
    pub fn new(context: ServerContext) -> Self {
        Self {
            connections: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(1),
            context,
        }
    }

    fn next_connection_id(&self) -> ConnectionId {
        ConnectionId::new(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Take ownership of an accepted socket and spawn its worker
    ///
    /// The entry is removed by the worker task itself when it finishes.
    pub fn add_connection(&self, socket: TcpStream) -> Result<ConnectionId> {
        let id = self.next_connection_id();
        let connection = XmppConnection::wrap(socket, id, self.context.metrics.clone())?;
        let peer_addr = connection.peer_addr();

        let state = Arc::new(AtomicU8::new(ConnectionState::AwaitingStreamOpen.as_u8()));
        let cancel = CancellationToken::new();
        let worker =
            ConnectionWorker::new(connection, self.context.clone(), state.clone(), cancel.clone());

        self.connections.insert(
            id,
            ManagedConnection {
                id,
                peer_addr,
                created_at: Instant::now(),
                state,
                cancel,
                handle: None,
            },
        );
        self.context.metrics.connection_opened();

        let connections = self.connections.clone();
        let metrics = self.context.metrics.clone();
        let handle = tokio::spawn(async move {
            let start = Instant::now();
            worker.run().await;

            if connections.remove(&id).is_some() {
                metrics.connection_closed(start.elapsed());
            }
        });

        // The worker may already have finished and removed itself
        if let Some(mut entry) = self.connections.get_mut(&id) {
            entry.handle = Some(handle);
        }

        info!(connection_id = %id, peer_addr = %peer_addr, "Connection established");
        Ok(id)
    }

    /// Force-close one connection without a closing stanza
    pub fn close_connection(&self, id: ConnectionId) -> Result<()> {
        match self.connections.get(&id) {
            Some(entry) => {
                entry.cancel.cancel();
                Ok(())
            }
            None => Err(XmppError::ConnectionNotFound(id)),
        }
    }

    /// Get connection info
    pub fn connection_info(&self, id: ConnectionId) -> Option<ConnectionInfo> {
        self.connections.get(&id).map(|entry| entry.info())
    }

    /// Get all connection IDs
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.connections.iter().map(|entry| *entry.key()).collect()
    }

    /// Get all connection infos
    pub fn all_connection_infos(&self) -> Vec<ConnectionInfo> {
        self.connections
            .iter()
            .map(|entry| entry.value().info())
            .collect()
    }

    /// Number of live workers
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Wait for connections to drain, then force-close the rest
    ///
    /// Polls the live count every [`SHUTDOWN_POLL_INTERVAL`] until it reaches
    /// zero or `grace` elapses. Remaining workers are cancelled and awaited for
    /// up to another `grace`; any still running after that are aborted.
    pub async fn shutdown(&self, grace: Duration) {
        let deadline = tokio::time::Instant::now() + grace;

        while self.connection_count() > 0 {
            let now = tokio::time::Instant::now();
            if now >= deadline {
                break;
            }
            tokio::time::sleep(SHUTDOWN_POLL_INTERVAL.min(deadline - now)).await;
        }

        let remaining = self.connection_count();
        if remaining == 0 {
            debug!("All connections drained");
            return;
        }

        warn!(remaining, "Grace period elapsed, force-closing connections");
        for entry in self.connections.iter() {
            entry.cancel.cancel();
        }

        let handles: Vec<_> = self
            .connections
            .iter_mut()
            .filter_map(|mut entry| entry.handle.take())
            .collect();

        let join_deadline = tokio::time::Instant::now() + grace;
        let joins = handles.into_iter().map(|mut handle| async move {
            if tokio::time::timeout_at(join_deadline, &mut handle).await.is_err() {
                handle.abort();
                let _ = handle.await;
            }
        });
        futures_util::future::join_all(joins).await;

        // Aborted workers never reached their own cleanup
        let leftover: Vec<_> = self.connection_ids();
        for id in leftover {
            if let Some((_, managed)) = self.connections.remove(&id) {
                self.context.metrics.connection_closed(managed.created_at.elapsed());
            }
        }
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("connection_count", &self.connection_count())
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish()
    }
}
