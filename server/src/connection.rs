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

//! Framed XMPP connection over a TCP stream

use crate::{ConnectionId, Result, ServerMetrics};
use futures::{SinkExt, StreamExt};
use jabbernest_codec::{XmppCodec, XmppFrame};
use metrics::{counter, gauge, histogram};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, instrument, trace};

/// One client connection with independent read and write halves
///
/// Owned by exactly one worker; nothing else writes to the socket.
pub struct XmppConnection {
    id: ConnectionId,
    peer_addr: SocketAddr,
    created_at: Instant,
    reader: FramedRead<OwnedReadHalf, XmppCodec>,
    writer: FramedWrite<OwnedWriteHalf, XmppCodec>,
    metrics: Arc<ServerMetrics>,
    frames_received: u64,
    frames_sent: u64,
}

impl XmppConnection {
    /// Split a TCP stream and attach the XMPP codec to both halves
    #[instrument(skip(socket, metrics), fields(connection_id = %id))]
    pub fn wrap(socket: TcpStream, id: ConnectionId, metrics: Arc<ServerMetrics>) -> Result<Self> {
        let peer_addr = socket.peer_addr()?;
        socket.set_nodelay(true)?;

        info!(peer_addr = %peer_addr, "Accepted XMPP connection");

        counter!("jabbernest.connections.total").increment(1);
        gauge!("jabbernest.connections.active").increment(1.0);

        let (read_half, write_half) = socket.into_split();

        Ok(Self {
            id,
            peer_addr,
            created_at: Instant::now(),
            reader: FramedRead::new(read_half, XmppCodec::new()),
            writer: FramedWrite::new(write_half, XmppCodec::new()),
            metrics,
            frames_received: 0,
            frames_sent: 0,
        })
    }

    /// Connection ID
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Remote address
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// When the socket was accepted
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Frames decoded so far
    pub fn frames_received(&self) -> u64 {
        self.frames_received
    }

    /// Frames written so far
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    /// Read the next frame
    ///
    /// `None` means the peer closed its write side.
    pub async fn next_frame(&mut self) -> Option<Result<XmppFrame>> {
        let frame = self.reader.next().await?;
        match frame {
            Ok(frame) => {
                self.frames_received += 1;
                self.metrics.stanza_received();
                counter!("jabbernest.frames.received").increment(1);
                trace!(connection_id = %self.id, ?frame, "Frame received");
                Some(Ok(frame))
            }
            Err(e) => {
                counter!("jabbernest.errors.receive").increment(1);
                Some(Err(e.into()))
            }
        }
    }

    /// Write and flush one frame
    pub async fn send(&mut self, frame: XmppFrame) -> Result<()> {
        let start = Instant::now();
        self.writer.send(frame).await?;
        self.record_sent(1);
        histogram!("jabbernest.frames.send_duration").record(start.elapsed().as_secs_f64());
        Ok(())
    }

    /// Write several frames with a single flush
    pub async fn send_all(&mut self, frames: Vec<XmppFrame>) -> Result<()> {
        if frames.is_empty() {
            return Ok(());
        }
        let count = frames.len() as u64;
        for frame in frames {
            self.writer.feed(frame).await?;
        }
        SinkExt::<XmppFrame>::flush(&mut self.writer).await?;
        self.record_sent(count);
        Ok(())
    }

    /// Flush and shut down the write half
    pub async fn close(&mut self) -> Result<()> {
        debug!(connection_id = %self.id, "Closing connection");
        SinkExt::<XmppFrame>::close(&mut self.writer).await?;
        Ok(())
    }

    fn record_sent(&mut self, count: u64) {
        self.frames_sent += count;
        self.metrics.stanzas_sent(count);
        counter!("jabbernest.frames.sent").increment(count);
    }
}

impl std::fmt::Debug for XmppConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XmppConnection")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("frames_received", &self.frames_received)
            .field("frames_sent", &self.frames_sent)
            .finish()
    }
}

impl Drop for XmppConnection {
    fn drop(&mut self) {
        gauge!("jabbernest.connections.active").decrement(1.0);
    }
}
