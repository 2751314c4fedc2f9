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

//! Identifiers, handshake states and read-only views shared across the server

use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Identifies one accepted socket for the lifetime of a server
///
/// Handed out in increasing order by the manager and never reused, even
/// across a stop and restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Wrap a raw counter value
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw counter value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Handshake state of a single connection
///
/// Stored as an atomic u8 so the manager can report it without touching the
/// worker. Only the owning worker ever changes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectionState {
    /// Waiting for the client's first `<stream:stream>`
    AwaitingStreamOpen = 0,
    /// SASL mechanisms advertised, waiting for `<auth>`
    AwaitingAuth = 1,
    /// SASL succeeded, waiting for the stream restart
    AuthenticatedAwaitingRestart = 2,
    /// Bind/session features advertised; stanzas are processed
    Active = 3,
    /// Stream closed or connection torn down
    Closed = 4,
}

impl ConnectionState {
    const ALL: [ConnectionState; 5] = [
        Self::AwaitingStreamOpen,
        Self::AwaitingAuth,
        Self::AuthenticatedAwaitingRestart,
        Self::Active,
        Self::Closed,
    ];

    /// Decode a value loaded from the shared atomic
    ///
    /// Anything out of range reads as `Closed`.
    pub fn from_u8(value: u8) -> Self {
        Self::ALL
            .get(usize::from(value))
            .copied()
            .unwrap_or(Self::Closed)
    }

    /// Encode for storing in the shared atomic
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// `Closed` is the only state a connection never leaves
    pub fn is_terminal(self) -> bool {
        self == Self::Closed
    }

    /// SASL has succeeded on this connection
    pub fn is_authenticated(self) -> bool {
        matches!(self, Self::AuthenticatedAwaitingRestart | Self::Active)
    }

    /// Short lowercase label used in logs
    pub fn label(self) -> &'static str {
        match self {
            Self::AwaitingStreamOpen => "awaiting-stream-open",
            Self::AwaitingAuth => "awaiting-auth",
            Self::AuthenticatedAwaitingRestart => "awaiting-restart",
            Self::Active => "active",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Point-in-time view of one managed connection
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Manager-assigned identifier
    pub id: ConnectionId,
    /// Handshake state at the time of the query
    pub state: ConnectionState,
    /// Remote socket address
    pub peer_addr: SocketAddr,
    /// When the connection was accepted
    pub created_at: Instant,
}

impl ConnectionInfo {
    /// Time since the socket was accepted
    pub fn duration(&self) -> Duration {
        self.created_at.elapsed()
    }
}

/// Point-in-time view of the whole server, cheap enough to poll
#[derive(Debug, Clone)]
pub struct ServerSnapshot {
    /// Number of live connection workers
    pub active_connections: usize,
    /// Total connections accepted since server creation
    pub total_connections: u64,
    /// Number of bound sessions in the directory
    pub bound_sessions: usize,
    /// Listening address, while running
    pub local_addr: Option<SocketAddr>,
    /// Whether the acceptor is running
    pub running: bool,
    /// Server uptime
    pub uptime: Duration,
    /// Server creation time
    pub started_at: Instant,
}

impl fmt::Display for ServerSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let addr = self
            .local_addr
            .map_or_else(|| "-".to_string(), |a| a.to_string());
        write!(
            f,
            "XmppServer {{ running: {}, active: {}, sessions: {}, total: {}, addr: {}, uptime: {:?} }}",
            self.running,
            self.active_connections,
            self.bound_sessions,
            self.total_connections,
            addr,
            self.uptime
        )
    }
}
