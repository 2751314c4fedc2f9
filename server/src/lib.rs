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

//! Embedded XMPP Server
//!
//! A small XMPP server meant to run inside another application or a test
//! suite. It speaks the client subset needed for two clients to log in and
//! chat: stream negotiation, SASL PLAIN against a static credential table,
//! resource binding, and one-to-one message routing.
//!
//! # Architecture
//!
//! ```text
//! XmppServer            accept loop, connection cap, start/stop
//!     ↓
//! ConnectionManager     one task per socket, graceful shutdown
//!     ↓
//! ConnectionWorker      state machine driver, sole writer of its socket
//!     ↓            ↘
//! XmppConnection    protocol::{stream, auth, bind, message}
//!                         ↓
//!                     Directory (full/bare JID → Session queue)
//! ```
//!
//! Workers never write to each other's sockets. Routing a message pushes a
//! [`Delivery`] onto the recipient session's queue; the recipient's own
//! worker drains it.
//!
//! # Example
//!
//! ```no_run
//! use jabbernest_server::{ServerConfig, XmppServer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::builder()
//!         .port(5222)
//!         .server_name("localhost")
//!         .add_user("alice", "password123")
//!         .build()?;
//!
//!     let server = XmppServer::new(config);
//!     server.start().await?;
//!     // ... connect clients to localhost:5222 ...
//!     server.stop().await;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs, future_incompatible, rust_2018_idioms)]

mod config;
mod connection;
mod directory;
mod error;
mod jid;
mod manager;
mod message_log;
mod metrics;
pub mod protocol;
mod server;
mod types;
mod worker;

pub use config::{
    DEFAULT_MAX_CONNECTIONS, DEFAULT_SERVER_NAME, DEFAULT_SHUTDOWN_TIMEOUT,
    DEFAULT_SOCKET_TIMEOUT, ServerConfig, ServerConfigBuilder,
};
pub use connection::XmppConnection;
pub use directory::{
    BindConflict, Delivery, DeliveryReceiver, Directory, Session, SessionRegistration,
};
pub use error::{ConfigError, Result, XmppError};
pub use jid::{Jid, JidError, generate_resource, is_valid_local};
pub use manager::{ConnectionManager, SHUTDOWN_POLL_INTERVAL};
pub use message_log::{DEFAULT_MESSAGE_LOG_CAPACITY, LoggedMessage, MessageLog};
pub use metrics::{MetricsSnapshot, ServerMetrics};
pub use server::XmppServer;
pub use types::{ConnectionId, ConnectionInfo, ConnectionState, ServerSnapshot};
pub use worker::{ConnectionWorker, ServerContext};
