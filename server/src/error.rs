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

//! Errors raised by the server and its configuration

use crate::types::{ConnectionId, ConnectionState};
use jabbernest_codec::CodecError;
use thiserror::Error;

/// Result type for server operations
pub type Result<T> = std::result::Result<T, XmppError>;

/// Rejected [`ServerConfig`](crate::ServerConfig) values
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Port 0 cannot be advertised to clients
    #[error("Port must be between 1 and 65535, got {0}")]
    InvalidPort(u16),

    /// Server name was empty or whitespace
    #[error("Server name cannot be empty")]
    EmptyServerName,

    /// A connection cap of zero would refuse everyone
    #[error("Max connections must be positive, got {0}")]
    InvalidMaxConnections(usize),

    /// A credential entry had an empty username
    #[error("Username cannot be empty")]
    EmptyUsername,

    /// A credential username contained `@`, `/` or whitespace
    #[error("Username {0:?} is not a valid JID local part")]
    InvalidUsername(String),
}

/// Everything that can go wrong while serving
#[derive(Debug, Error)]
pub enum XmppError {
    /// Socket failure, including bind failures at start
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer's byte stream was not a well-formed XMPP stream
    #[error("Codec error: {0}")]
    Codec(CodecError),

    /// Rejected configuration
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// The peer sent something its handshake state does not allow
    #[error("Unexpected {event} in state {state}")]
    UnexpectedEvent {
        /// State the connection was in
        state: ConnectionState,
        /// Short description of the offending event
        event: String,
    },

    /// No managed connection has this id
    #[error("Connection {0} not found")]
    ConnectionNotFound(ConnectionId),
}

impl From<CodecError> for XmppError {
    fn from(error: CodecError) -> Self {
        // A dead socket is not the peer's protocol mistake
        match error {
            CodecError::Io(io) => XmppError::Io(io),
            other => XmppError::Codec(other),
        }
    }
}

impl XmppError {
    /// The peer broke the protocol, as opposed to the transport failing
    ///
    /// Workers answer these with a stream footer when they can.
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, XmppError::Codec(_) | XmppError::UnexpectedEvent { .. })
    }
}
