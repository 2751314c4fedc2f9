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

//! Run a chat server for two local accounts
//!
//! ```bash
//! cargo run --example embedded_server -- 5222
//! ```
//!
//! Log in as `alice@localhost` / `password123` or `bob@localhost` /
//! `password456` from any XMPP client, then press Ctrl+C. The server drains
//! for up to two seconds before forcing sockets closed.

use jabbernest_server::{ServerConfig, XmppServer};
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,jabbernest_server=debug".into()),
        )
        .init();

    let port = match std::env::args().nth(1) {
        Some(arg) => arg.parse()?,
        None => 5222,
    };

    let server = XmppServer::new(
        ServerConfig::builder()
            .port(port)
            .socket_timeout(Duration::from_secs(1))
            .shutdown_timeout(Duration::from_secs(2))
            .users([("alice", "password123"), ("bob", "password456")])
            .build()?,
    );
    server.start().await?;
    info!(addr = ?server.local_addr(), "Accepting clients");

    tokio::signal::ctrl_c().await?;
    server.stop().await;

    let snapshot = server.metrics().snapshot();
    info!(
        connections = snapshot.total_connections,
        routed = snapshot.messages_routed,
        undeliverable = snapshot.messages_undeliverable,
        "Stopped"
    );
    Ok(())
}
