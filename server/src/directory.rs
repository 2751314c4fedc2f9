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

//! Session directory for cross-connection message routing
//!
//! Every bound connection owns one [`Session`]. The directory maps both its
//! full and bare address to that session and records the username as
//! connected. Other connections route by resolving an address here and
//! pushing a [`Delivery`] onto the session's queue; only the owning
//! connection drains the queue and writes to its socket.
//!
//! ```text
//! Worker (alice@localhost/desk)          Directory               Worker (bob@localhost/phone)
//!        |  resolve("bob@localhost")  +--------------+                     |
//!        +--------------------------> | full  -> Arc<Session>              |
//!        |                            | bare  -> Arc<Session>              |
//!        |  session.deliver(..)       | users  {alice, bob}                |
//!        +---------------------------------------------> UnboundedReceiver |
//!                                                          drained by bob  |
//! ```
//!
//! All mutations take the same write lock, so a username is never visible as
//! connected while its address keys are missing, or the other way round.

use crate::{ConnectionId, Jid};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// A message waiting to be written to its recipient's stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Sender address as the recipient will see it
    pub from: String,
    /// Recipient address as written on the stanza
    pub to: String,
    /// Message body, if the sender included one
    pub body: Option<String>,
}

/// Receiving end of a session's delivery queue
pub type DeliveryReceiver = mpsc::UnboundedReceiver<Delivery>;

/// Returned when a username already has a bound session
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("User {username} is already connected")]
pub struct BindConflict {
    /// The username that was refused
    pub username: String,
}

/// One bound connection as seen by other connections
#[derive(Debug)]
pub struct Session {
    connection_id: ConnectionId,
    username: String,
    full_jid: Jid,
    bare_jid: Jid,
    queue: mpsc::UnboundedSender<Delivery>,
}

impl Session {
    /// Connection that owns this session
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Authenticated username
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Bound `user@server/resource` address
    pub fn full_jid(&self) -> &Jid {
        &self.full_jid
    }

    /// `user@server` address
    pub fn bare_jid(&self) -> &Jid {
        &self.bare_jid
    }

    /// Enqueue a delivery for the owning connection
    ///
    /// Fails (handing the delivery back) once the owner has stopped draining.
    pub fn deliver(&self, delivery: Delivery) -> Result<(), Delivery> {
        self.queue.send(delivery).map_err(|e| e.0)
    }
}

#[derive(Default)]
struct DirectoryInner {
    addresses: HashMap<String, Arc<Session>>,
    usernames: HashSet<String>,
}

/// Server-wide map of live sessions
///
/// Cheap to clone; all clones share the same table.
#[derive(Clone, Default)]
pub struct Directory {
    inner: Arc<RwLock<DirectoryInner>>,
}

impl Directory {
    /// Create an empty directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly bound session
    ///
    /// Checks the username and inserts it together with the full and bare
    /// address keys under one lock. On success the caller receives the guard
    /// that keeps the session registered and the receiving end of its queue.
    pub fn register(
        &self,
        connection_id: ConnectionId,
        username: &str,
        full_jid: Jid,
    ) -> Result<(SessionRegistration, DeliveryReceiver), BindConflict> {
        let full_key = full_jid.to_string();
        let bare_jid = full_jid.bare();
        let bare_key = bare_jid.to_string();

        let mut inner = self.inner.write();
        if inner.usernames.contains(username)
            || inner.addresses.contains_key(&full_key)
            || inner.addresses.contains_key(&bare_key)
        {
            return Err(BindConflict {
                username: username.to_string(),
            });
        }

        let (queue, deliveries) = mpsc::unbounded_channel();
        let session = Arc::new(Session {
            connection_id,
            username: username.to_string(),
            full_jid,
            bare_jid,
            queue,
        });

        inner.usernames.insert(username.to_string());
        inner.addresses.insert(full_key.clone(), session.clone());
        inner.addresses.insert(bare_key, session.clone());
        drop(inner);

        info!(connection_id = %connection_id, jid = %full_key, "Session registered");

        let registration = SessionRegistration {
            directory: self.clone(),
            session,
        };
        Ok((registration, deliveries))
    }

    /// Find the session an address should be delivered to
    ///
    /// Tries the exact address, then its bare form, then any full address
    /// under that bare address.
    pub fn resolve(&self, address: &str) -> Option<Arc<Session>> {
        let inner = self.inner.read();
        if let Some(session) = inner.addresses.get(address) {
            return Some(session.clone());
        }

        let bare = address.split_once('/').map_or(address, |(bare, _)| bare);
        if bare != address {
            if let Some(session) = inner.addresses.get(bare) {
                return Some(session.clone());
            }
        }

        let prefix = format!("{}/", bare);
        inner
            .addresses
            .iter()
            .find(|(key, _)| key.starts_with(&prefix))
            .map(|(_, session)| session.clone())
    }

    /// Remove a session
    ///
    /// Only keys that still point at this exact session are removed. Returns
    /// whether the session was registered.
    pub fn remove(&self, session: &Arc<Session>) -> bool {
        let full_key = session.full_jid.to_string();
        let bare_key = session.bare_jid.to_string();

        let mut inner = self.inner.write();
        let owned = inner
            .addresses
            .get(&full_key)
            .is_some_and(|s| Arc::ptr_eq(s, session));
        if !owned {
            return false;
        }

        inner.addresses.remove(&full_key);
        if inner
            .addresses
            .get(&bare_key)
            .is_some_and(|s| Arc::ptr_eq(s, session))
        {
            inner.addresses.remove(&bare_key);
        }
        inner.usernames.remove(&session.username);
        drop(inner);

        debug!(connection_id = %session.connection_id, jid = %full_key, "Session removed");
        true
    }

    /// Whether `username` has a bound session
    pub fn is_connected(&self, username: &str) -> bool {
        self.inner.read().usernames.contains(username)
    }

    /// Usernames with a bound session
    pub fn usernames(&self) -> Vec<String> {
        self.inner.read().usernames.iter().cloned().collect()
    }

    /// Every registered address key, full and bare
    pub fn addresses(&self) -> Vec<String> {
        self.inner.read().addresses.keys().cloned().collect()
    }

    /// Number of bound sessions
    pub fn len(&self) -> usize {
        self.inner.read().usernames.len()
    }

    /// Whether no session is bound
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for Directory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("Directory")
            .field("sessions", &inner.usernames.len())
            .field("addresses", &inner.addresses.len())
            .finish()
    }
}

/// Keeps a session registered for as long as it is alive
///
/// Dropping the guard removes the session from the directory, so a worker
/// that is aborted mid-flight still leaves no stale route behind.
#[derive(Debug)]
pub struct SessionRegistration {
    directory: Directory,
    session: Arc<Session>,
}

impl SessionRegistration {
    /// The registered session
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }
}

impl Drop for SessionRegistration {
    fn drop(&mut self) {
        self.directory.remove(&self.session);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full(user: &str, resource: &str) -> Jid {
        Jid::new_full(user, "localhost", resource)
    }

    #[test]
    fn test_register_and_resolve() {
        let directory = Directory::new();
        let (registration, _rx) = directory
            .register(ConnectionId::new(1), "alice", full("alice", "desk"))
            .unwrap();

        assert!(directory.is_connected("alice"));
        assert_eq!(directory.len(), 1);

        let by_full = directory.resolve("alice@localhost/desk").unwrap();
        let by_bare = directory.resolve("alice@localhost").unwrap();
        assert!(Arc::ptr_eq(&by_full, registration.session()));
        assert!(Arc::ptr_eq(&by_bare, registration.session()));

        // Unknown resource falls back to the bare address
        let by_other = directory.resolve("alice@localhost/phone").unwrap();
        assert!(Arc::ptr_eq(&by_other, registration.session()));

        assert!(directory.resolve("bob@localhost").is_none());
    }

    #[test]
    fn test_resolve_scans_full_addresses_without_bare_key() {
        let directory = Directory::new();
        let (registration, _rx) = directory
            .register(ConnectionId::new(1), "alice", full("alice", "desk"))
            .unwrap();
        directory.inner.write().addresses.remove("alice@localhost");

        let by_bare = directory.resolve("alice@localhost").unwrap();
        assert!(Arc::ptr_eq(&by_bare, registration.session()));
        let by_other = directory.resolve("alice@localhost/phone").unwrap();
        assert!(Arc::ptr_eq(&by_other, registration.session()));

        // The scan matches whole bare addresses, not string prefixes
        assert!(directory.resolve("ali@localhost").is_none());
        assert!(directory.resolve("alice@local").is_none());
    }

    #[test]
    fn test_duplicate_username_is_rejected() {
        let directory = Directory::new();
        let (first, _rx) = directory
            .register(ConnectionId::new(1), "alice", full("alice", "desk"))
            .unwrap();

        let err = directory
            .register(ConnectionId::new(2), "alice", full("alice", "phone"))
            .unwrap_err();
        assert_eq!(err.username, "alice");

        // The original session is untouched
        let resolved = directory.resolve("alice@localhost").unwrap();
        assert!(Arc::ptr_eq(&resolved, first.session()));
        assert_eq!(resolved.connection_id(), ConnectionId::new(1));
    }

    #[test]
    fn test_dropping_registration_removes_all_keys() {
        let directory = Directory::new();
        let (registration, _rx) = directory
            .register(ConnectionId::new(1), "alice", full("alice", "desk"))
            .unwrap();
        assert_eq!(directory.addresses().len(), 2);

        drop(registration);
        assert!(directory.is_empty());
        assert!(directory.addresses().is_empty());
        assert!(!directory.is_connected("alice"));
        assert!(directory.resolve("alice@localhost/desk").is_none());

        // The username is free again
        assert!(
            directory
                .register(ConnectionId::new(2), "alice", full("alice", "phone"))
                .is_ok()
        );
    }

    #[test]
    fn test_remove_is_idempotent() {
        let directory = Directory::new();
        let (registration, _rx) = directory
            .register(ConnectionId::new(1), "alice", full("alice", "desk"))
            .unwrap();
        let session = registration.session().clone();

        assert!(directory.remove(&session));
        assert!(!directory.remove(&session));
        drop(registration);
        assert!(directory.is_empty());
    }

    #[tokio::test]
    async fn test_delivery_reaches_owner() {
        let directory = Directory::new();
        let (_registration, mut rx) = directory
            .register(ConnectionId::new(1), "bob", full("bob", "phone"))
            .unwrap();

        let target = directory.resolve("bob@localhost").unwrap();
        target
            .deliver(Delivery {
                from: "alice@localhost/desk".to_string(),
                to: "bob@localhost".to_string(),
                body: Some("hi".to_string()),
            })
            .unwrap();

        let delivery = rx.recv().await.unwrap();
        assert_eq!(delivery.from, "alice@localhost/desk");
        assert_eq!(delivery.body.as_deref(), Some("hi"));
    }

    #[test]
    fn test_deliver_after_receiver_dropped_fails() {
        let directory = Directory::new();
        let (registration, rx) = directory
            .register(ConnectionId::new(1), "bob", full("bob", "phone"))
            .unwrap();
        drop(rx);

        let delivery = Delivery {
            from: "alice@localhost/desk".to_string(),
            to: "bob@localhost".to_string(),
            body: None,
        };
        assert_eq!(
            registration.session().deliver(delivery.clone()),
            Err(delivery)
        );
    }

    #[test]
    fn test_concurrent_registration_admits_one() {
        let directory = Directory::new();
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let directory = directory.clone();
                std::thread::spawn(move || {
                    directory
                        .register(ConnectionId::new(i), "alice", full("alice", &format!("r{}", i)))
                        .ok()
                })
            })
            .collect();

        let winners: Vec<_> = handles
            .into_iter()
            .filter_map(|h| h.join().unwrap())
            .collect();
        assert_eq!(winners.len(), 1);
        assert_eq!(directory.len(), 1);
        assert_eq!(directory.addresses().len(), 2);
    }
}
