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

//! XMPP server implementation
//!
//! The XmppServer is the entry point for embedding applications. It owns the
//! TCP listener and the accept loop, enforces the connection cap, and
//! coordinates shutdown with the ConnectionManager.

use crate::{
    ConnectionManager, Directory, MessageLog, Result, ServerConfig, ServerContext, ServerMetrics,
    ServerSnapshot,
};
use metrics::counter;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Pause after a failed `accept` before trying again
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// The running accept loop
struct Acceptor {
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

/// Embedded XMPP server
///
/// # Example
///
/// ```no_run
/// use jabbernest_server::{ServerConfig, XmppServer};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = ServerConfig::builder()
///         .port(5222)
///         .add_user("alice", "password123")
///         .add_user("bob", "password456")
///         .build()?;
///
///     let server = XmppServer::new(config);
///     server.start().await?;
///
///     tokio::signal::ctrl_c().await?;
///     server.stop().await;
///     Ok(())
/// }
/// ```
pub struct XmppServer {
    /// State shared with every worker
    context: ServerContext,
    /// Connection manager
    manager: Arc<ConnectionManager>,
    /// Address the listener is bound to while running
    local_addr: Mutex<Option<SocketAddr>>,
    /// Accept loop, present while running
    acceptor: Mutex<Option<Acceptor>>,
    /// Serialises start and stop
    lifecycle: tokio::sync::Mutex<()>,
    /// Server creation time
    started_at: Instant,
}

impl XmppServer {
    /// Create a server; nothing is bound until [`start`](Self::start)
    pub fn new(config: ServerConfig) -> Self {
        let context = ServerContext::new(config);
        let manager = Arc::new(ConnectionManager::new(context.clone()));
        Self {
            context,
            manager,
            local_addr: Mutex::new(None),
            acceptor: Mutex::new(None),
            lifecycle: tokio::sync::Mutex::new(()),
            started_at: Instant::now(),
        }
    }

    /// Bind the listener and start accepting
    ///
    /// Calling `start` on a running server does nothing.
    pub async fn start(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        if self.is_running() {
            debug!("Server already running");
            return Ok(());
        }

        let listener = TcpListener::bind(self.context.config.bind_address()).await?;
        let local_addr = listener.local_addr()?;
        *self.local_addr.lock() = Some(local_addr);
        self.context.running.store(true, Ordering::Release);

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(accept_loop(
            listener,
            self.manager.clone(),
            self.context.clone(),
            shutdown.clone(),
        ));
        *self.acceptor.lock() = Some(Acceptor { shutdown, handle });

        info!(
            local_addr = %local_addr,
            server_name = self.context.config.server_name(),
            "XMPP server started"
        );
        Ok(())
    }

    /// Stop accepting and shut down every connection
    ///
    /// Connections get the configured shutdown timeout to finish; the rest are
    /// force-closed. Safe to call more than once; a concurrent caller waits for
    /// the first to finish.
    pub async fn stop(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        if !self.context.running.swap(false, Ordering::AcqRel) {
            debug!("Server not running");
            return;
        }

        info!("Shutting down XMPP server");

        // Dropping the listener inside the loop refuses new connections
        let acceptor = self.acceptor.lock().take();
        if let Some(Acceptor { shutdown, handle }) = acceptor {
            shutdown.cancel();
            if let Err(e) = handle.await {
                error!(error = %e, "Accept loop panicked");
            }
        }

        self.manager
            .shutdown(self.context.config.shutdown_timeout())
            .await;
        *self.local_addr.lock() = None;

        info!("XMPP server shutdown complete");
    }

    /// Check if the server is running
    pub fn is_running(&self) -> bool {
        self.context.is_running()
    }

    /// Address the listener is bound to, while running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    /// Number of live connections
    pub fn connection_count(&self) -> usize {
        self.manager.connection_count()
    }

    /// Get a snapshot of the server state
    pub fn snapshot(&self) -> ServerSnapshot {
        ServerSnapshot {
            active_connections: self.manager.connection_count(),
            total_connections: self.context.metrics.total_connections(),
            bound_sessions: self.context.directory.len(),
            local_addr: self.local_addr(),
            running: self.is_running(),
            uptime: self.started_at.elapsed(),
            started_at: self.started_at,
        }
    }

    /// Get the server metrics
    pub fn metrics(&self) -> Arc<ServerMetrics> {
        self.context.metrics.clone()
    }

    /// Session directory
    pub fn directory(&self) -> &Directory {
        &self.context.directory
    }

    /// Record of message stanzas
    pub fn message_log(&self) -> &MessageLog {
        &self.context.message_log
    }

    /// Get the connection manager
    pub fn manager(&self) -> Arc<ConnectionManager> {
        self.manager.clone()
    }

    /// Get the server configuration
    pub fn config(&self) -> &ServerConfig {
        &self.context.config
    }
}

async fn accept_loop(
    listener: TcpListener,
    manager: Arc<ConnectionManager>,
    context: ServerContext,
    shutdown: CancellationToken,
) {
    let max_connections = context.config.max_connections();

    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((socket, peer_addr)) => {
                if manager.connection_count() >= max_connections {
                    warn!(
                        peer_addr = %peer_addr,
                        max_connections,
                        "Connection limit reached, rejecting connection"
                    );
                    context.metrics.connection_rejected();
                    counter!("jabbernest.connections.rejected").increment(1);
                    drop(socket);
                    continue;
                }

                if let Err(e) = manager.add_connection(socket) {
                    error!(peer_addr = %peer_addr, error = %e, "Failed to set up connection");
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to accept connection");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }

    info!("Accept loop terminated");
}

impl std::fmt::Debug for XmppServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XmppServer")
            .field("local_addr", &self.local_addr())
            .field("running", &self.is_running())
            .field("connection_count", &self.connection_count())
            .field("uptime", &self.started_at.elapsed())
            .finish()
    }
}

impl Drop for XmppServer {
    fn drop(&mut self) {
        if self.context.running.swap(false, Ordering::AcqRel) {
            warn!("XmppServer dropped while still running");
            if let Some(acceptor) = self.acceptor.get_mut().take() {
                acceptor.shutdown.cancel();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ServerConfig {
        ServerConfig::builder()
            .port(1)
            .socket_timeout(Duration::from_millis(50))
            .shutdown_timeout(Duration::from_millis(200))
            .build()
            .unwrap()
    }

    fn ephemeral() -> ServerConfig {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        ServerConfig::builder()
            .port(port)
            .socket_timeout(Duration::from_millis(50))
            .shutdown_timeout(Duration::from_millis(200))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_server_lifecycle() {
        let server = XmppServer::new(ephemeral());
        assert!(!server.is_running());
        assert!(server.local_addr().is_none());

        server.start().await.unwrap();
        assert!(server.is_running());
        let addr = server.local_addr().unwrap();
        assert_eq!(addr.port(), server.config().port());

        server.stop().await;
        assert!(!server.is_running());
        assert!(server.local_addr().is_none());
        assert!(tokio::net::TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_start_and_stop_are_idempotent() {
        let server = XmppServer::new(ephemeral());
        server.start().await.unwrap();
        let addr = server.local_addr();
        server.start().await.unwrap();
        assert_eq!(server.local_addr(), addr);

        server.stop().await;
        server.stop().await;
        assert!(!server.is_running());
    }

    #[tokio::test]
    async fn test_stop_without_start() {
        let server = XmppServer::new(config());
        server.stop().await;
        assert!(!server.is_running());
    }

    #[tokio::test]
    async fn test_server_snapshot() {
        let server = XmppServer::new(config());
        let snapshot = server.snapshot();

        assert_eq!(snapshot.active_connections, 0);
        assert_eq!(snapshot.total_connections, 0);
        assert_eq!(snapshot.bound_sessions, 0);
        assert!(!snapshot.running);
        assert!(snapshot.local_addr.is_none());
    }
}
