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

//! Connection worker implementation
//!
//! The ConnectionWorker owns one [`XmppConnection`] for its whole life and is
//! the only code that writes to its socket. Each loop iteration it:
//! - stops if the stream closed or the server is shutting down
//! - writes any queued deliveries for its session
//! - reads and handles the next frame, then writes the replies
//! - on an idle tick (the configured socket timeout) drains the queue
//!
//! Teardown unroutes the session first: the directory entry goes and the
//! delivery queue is closed to new senders. Whatever was already queued is
//! then written, and only after that is the socket closed. A sender racing
//! the teardown either lands in the final flush or gets a failed enqueue.

use crate::protocol::{self, ConnectionContext, ProtocolEnv, Step, StreamEvent};
use crate::{
    ConnectionId, ConnectionState, Delivery, DeliveryReceiver, Directory, MessageLog, Result,
    ServerConfig, ServerMetrics, SessionRegistration, XmppConnection, XmppError,
};
use jabbernest_codec::XmppFrame;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use tokio::select;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// State shared by the acceptor and every worker
#[derive(Debug, Clone)]
pub struct ServerContext {
    /// Server configuration
    pub config: Arc<ServerConfig>,
    /// Session directory
    pub directory: Directory,
    /// Message record
    pub message_log: MessageLog,
    /// Server metrics
    pub metrics: Arc<ServerMetrics>,
    /// Cleared when the server begins shutting down
    pub running: Arc<AtomicBool>,
}

impl ServerContext {
    /// Create fresh shared state for `config`
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config: Arc::new(config),
            directory: Directory::new(),
            message_log: MessageLog::new(),
            metrics: Arc::new(ServerMetrics::new()),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether the server is accepting and serving
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Why the event loop ended
#[derive(Debug)]
enum Exit {
    /// Peer closed the socket
    PeerClosed,
    /// Either side closed the stream
    StreamClosed,
    /// Server is shutting down
    ServerStopping,
    /// Force-closed by the manager
    Cancelled,
    /// Read, write or protocol failure
    Failed(XmppError),
}

/// Connection worker that manages a single connection's lifecycle
pub struct ConnectionWorker {
    id: ConnectionId,
    connection: XmppConnection,
    shared: ServerContext,
    context: ConnectionContext,
    registration: Option<SessionRegistration>,
    deliveries: Option<DeliveryReceiver>,
    state: Arc<AtomicU8>,
    cancel: CancellationToken,
}

impl ConnectionWorker {
    /// Create a worker
    ///
    /// `state` mirrors the handshake state for observers; `cancel` force-closes
    /// the connection without a closing stanza.
    pub fn new(
        connection: XmppConnection,
        shared: ServerContext,
        state: Arc<AtomicU8>,
        cancel: CancellationToken,
    ) -> Self {
        let context = ConnectionContext::new();
        state.store(context.state().as_u8(), Ordering::Release);
        Self {
            id: connection.id(),
            connection,
            shared,
            context,
            registration: None,
            deliveries: None,
            state,
            cancel,
        }
    }

    /// Connection ID
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Get the current state
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, new_state: ConnectionState) {
        self.state.store(new_state.as_u8(), Ordering::Release);
    }

    /// Run the worker until the connection ends
    #[instrument(skip(self), fields(connection_id = %self.id, peer_addr = %self.connection.peer_addr()))]
    pub async fn run(mut self) {
        debug!("Worker started");
        let exit = self.event_loop().await;
        self.teardown(exit).await;
        debug!("Worker finished");
    }

    async fn event_loop(&mut self) -> Exit {
        let tick = self.shared.config.socket_timeout();

        loop {
            if self.context.state().is_terminal() {
                return Exit::StreamClosed;
            }
            if !self.shared.is_running() {
                return Exit::ServerStopping;
            }

            select! {
                biased;

                _ = self.cancel.cancelled() => return Exit::Cancelled,

                Some(delivery) = recv_delivery(&mut self.deliveries) => {
                    let frame: XmppFrame = protocol::message::render(&delivery).into();
                    if let Err(e) = self.connection.send(frame).await {
                        return Exit::Failed(e);
                    }
                }

                frame = self.connection.next_frame() => match frame {
                    None => return Exit::PeerClosed,
                    Some(Err(e)) => return Exit::Failed(e),
                    Some(Ok(frame)) => {
                        if let Err(e) = self.handle_frame(frame).await {
                            return Exit::Failed(e);
                        }
                    }
                },

                _ = sleep(tick), if !tick.is_zero() => {
                    self.shared.metrics.idle_tick();
                    if let Err(e) = self.flush_deliveries().await {
                        return Exit::Failed(e);
                    }
                }
            }
        }
    }

    async fn handle_frame(&mut self, frame: XmppFrame) -> Result<()> {
        let event = StreamEvent::from(frame);
        let env = ProtocolEnv {
            connection_id: self.id,
            config: &self.shared.config,
            directory: &self.shared.directory,
            message_log: &self.shared.message_log,
            metrics: &self.shared.metrics,
        };
        let Step {
            context,
            replies,
            bound,
        } = protocol::handle_event(&self.context, event, &env)?;

        if let Some(bound) = bound {
            self.registration = Some(bound.registration);
            self.deliveries = Some(bound.deliveries);
        }
        self.context = context;
        self.set_state(self.context.state());

        if self.context.state().is_terminal() {
            // Queued messages go out ahead of the footer
            self.unroute();
            self.flush_deliveries().await?;
            self.connection.send_all(replies).await
        } else {
            self.connection.send_all(replies).await?;
            self.flush_deliveries().await
        }
    }

    /// Leave the directory and refuse further deliveries
    ///
    /// Messages already queued stay readable until the receiver is dropped.
    fn unroute(&mut self) {
        self.registration = None;
        if let Some(deliveries) = self.deliveries.as_mut() {
            deliveries.close();
        }
    }

    /// Write everything currently queued for this session
    async fn flush_deliveries(&mut self) -> Result<()> {
        let Some(deliveries) = self.deliveries.as_mut() else {
            return Ok(());
        };
        let mut frames: Vec<XmppFrame> = Vec::new();
        while let Ok(delivery) = deliveries.try_recv() {
            frames.push(protocol::message::render(&delivery).into());
        }
        self.connection.send_all(frames).await
    }

    fn stream_opened(&self) -> bool {
        !matches!(
            self.context.state(),
            ConnectionState::AwaitingStreamOpen | ConnectionState::Closed
        )
    }

    async fn teardown(&mut self, exit: Exit) {
        let grace = self.shared.config.shutdown_timeout();
        self.unroute();

        match exit {
            Exit::PeerClosed => debug!("Peer closed the connection"),
            Exit::StreamClosed => debug!("Stream closed"),
            Exit::ServerStopping => {
                info!("Closing stream for server shutdown");
                let polite = async {
                    self.flush_deliveries().await?;
                    if self.stream_opened() {
                        self.connection.send(XmppFrame::Footer).await?;
                    }
                    Ok::<_, XmppError>(())
                };
                if let Ok(Err(e)) = timeout(grace, polite).await {
                    debug!(error = %e, "Failed to close stream cleanly");
                }
            }
            Exit::Cancelled => {
                info!("Connection force-closed");
                self.shared.metrics.forced_close();
            }
            Exit::Failed(e) if e.is_protocol_error() => {
                warn!(error = %e, "Protocol error, closing connection");
                self.shared.metrics.protocol_error();
                let farewell = async {
                    self.flush_deliveries().await?;
                    if self.stream_opened() {
                        self.connection.send(XmppFrame::Footer).await?;
                    }
                    Ok::<_, XmppError>(())
                };
                let _ = timeout(grace, farewell).await;
            }
            Exit::Failed(e) => debug!(error = %e, "Connection failed"),
        }

        self.set_state(ConnectionState::Closed);
        self.deliveries = None;

        if let Ok(Err(e)) = timeout(grace, self.connection.close()).await {
            debug!(error = %e, "Error closing socket");
        }
    }
}

impl std::fmt::Debug for ConnectionWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionWorker")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("jid", &self.context.full_jid().map(ToString::to_string))
            .finish()
    }
}

async fn recv_delivery(deliveries: &mut Option<DeliveryReceiver>) -> Option<Delivery> {
    match deliveries {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
