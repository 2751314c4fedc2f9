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

//! Server configuration

use crate::{ConfigError, is_valid_local};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Default server name (the domain part of every assigned JID)
pub const DEFAULT_SERVER_NAME: &str = "localhost";
/// Default socket read timeout, which doubles as the delivery drain tick
pub const DEFAULT_SOCKET_TIMEOUT: Duration = Duration::from_secs(30);
/// Default grace period for [`XmppServer::stop`](crate::XmppServer::stop)
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
/// Default connection cap
pub const DEFAULT_MAX_CONNECTIONS: usize = 100;

/// Server configuration
///
/// Immutable once built. Every constructor validates, so a `ServerConfig`
/// in hand is always usable.
///
/// # Example
///
/// ```
/// use jabbernest_server::ServerConfig;
/// use std::time::Duration;
///
/// let config = ServerConfig::builder()
///     .port(5222)
///     .server_name("localhost")
///     .socket_timeout(Duration::from_millis(500))
///     .max_connections(10)
///     .add_user("alice", "password123")
///     .add_user("bob", "password456")
///     .build()
///     .unwrap();
///
/// assert_eq!(config.port(), 5222);
/// assert_eq!(config.password("alice"), Some("password123"));
/// ```
#[derive(Debug, Clone)]
pub struct ServerConfig {
    port: u16,
    bind_ip: IpAddr,
    server_name: String,
    socket_timeout: Duration,
    shutdown_timeout: Duration,
    max_connections: usize,
    users: HashMap<String, String>,
}

impl ServerConfig {
    /// Create a configuration for `port` with every other setting at its default
    pub fn new(port: u16) -> Result<Self, ConfigError> {
        Self::builder().port(port).build()
    }

    /// Start building a configuration
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    /// Listen port
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Address the listener binds to
    pub fn bind_ip(&self) -> IpAddr {
        self.bind_ip
    }

    /// Full socket address the listener binds to
    pub fn bind_address(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip, self.port)
    }

    /// Domain used in assigned JIDs and the stream header
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Socket read timeout; zero disables the idle tick
    pub fn socket_timeout(&self) -> Duration {
        self.socket_timeout
    }

    /// Grace period for shutdown before connections are force-closed
    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    /// Maximum concurrent connections
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// The configured credential table
    pub fn users(&self) -> &HashMap<String, String> {
        &self.users
    }

    /// Password configured for `username`
    pub fn password(&self, username: &str) -> Option<&str> {
        self.users.get(username).map(String::as_str)
    }

    /// Whether credentials are checked at all
    ///
    /// With an empty table any well-formed credential pair is accepted.
    pub fn is_permissive(&self) -> bool {
        self.users.is_empty()
    }
}

/// Builder for [`ServerConfig`]
#[derive(Debug, Clone)]
pub struct ServerConfigBuilder {
    port: u16,
    bind_ip: IpAddr,
    server_name: String,
    socket_timeout: Duration,
    shutdown_timeout: Duration,
    max_connections: usize,
    users: HashMap<String, String>,
}

impl Default for ServerConfigBuilder {
    fn default() -> Self {
        Self {
            port: 0,
            bind_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            server_name: DEFAULT_SERVER_NAME.to_string(),
            socket_timeout: DEFAULT_SOCKET_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            users: HashMap::new(),
        }
    }
}

impl ServerConfigBuilder {
    /// Set the listen port
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the address the listener binds to
    pub fn bind_ip(mut self, ip: IpAddr) -> Self {
        self.bind_ip = ip;
        self
    }

    /// Set the server name
    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = name.into();
        self
    }

    /// Set the socket read timeout
    pub fn socket_timeout(mut self, timeout: Duration) -> Self {
        self.socket_timeout = timeout;
        self
    }

    /// Set the shutdown grace period
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Set the connection cap
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Add (or replace) a single credential
    pub fn add_user(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.users.insert(username.into(), password.into());
        self
    }

    /// Add every credential from `users`
    pub fn users<I, U, P>(mut self, users: I) -> Self
    where
        I: IntoIterator<Item = (U, P)>,
        U: Into<String>,
        P: Into<String>,
    {
        self.users
            .extend(users.into_iter().map(|(u, p)| (u.into(), p.into())));
        self
    }

    /// Validate and build the configuration
    pub fn build(self) -> Result<ServerConfig, ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidPort(self.port));
        }

        let server_name = self.server_name.trim().to_string();
        if server_name.is_empty() {
            return Err(ConfigError::EmptyServerName);
        }

        if self.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(self.max_connections));
        }

        if self.users.keys().any(|u| u.trim().is_empty()) {
            return Err(ConfigError::EmptyUsername);
        }
        if let Some(name) = self.users.keys().find(|u| !is_valid_local(u)) {
            return Err(ConfigError::InvalidUsername(name.clone()));
        }

        Ok(ServerConfig {
            port: self.port,
            bind_ip: self.bind_ip,
            server_name,
            socket_timeout: self.socket_timeout,
            shutdown_timeout: self.shutdown_timeout,
            max_connections: self.max_connections,
            users: self.users,
        })
    }
}
