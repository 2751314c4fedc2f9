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

//! In-process counters
//!
//! Workers and the acceptor bump these from any task. The `metrics` facade
//! receives the same events separately at the call sites, so an embedding
//! application can export them without reaching into this struct.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct Counters {
    total_connections: AtomicU64,
    active_connections: AtomicU64,
    rejected_connections: AtomicU64,
    stanzas_received: AtomicU64,
    stanzas_sent: AtomicU64,
    auth_successes: AtomicU64,
    auth_failures: AtomicU64,
    sessions_bound: AtomicU64,
    bind_conflicts: AtomicU64,
    messages_routed: AtomicU64,
    messages_undeliverable: AtomicU64,
    protocol_errors: AtomicU64,
    idle_ticks: AtomicU64,
    forced_closes: AtomicU64,
    closed_duration_ns: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

fn read(counter: &AtomicU64) -> u64 {
    counter.load(Ordering::Relaxed)
}

/// Server-wide counters shared by every task
#[derive(Debug)]
pub struct ServerMetrics {
    counters: Counters,
    started_at: Instant,
}

impl Default for ServerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerMetrics {
    /// All counters at zero, uptime starting now
    pub fn new() -> Self {
        Self {
            counters: Counters::default(),
            started_at: Instant::now(),
        }
    }

    /// A worker was spawned for an accepted socket
    pub fn connection_opened(&self) {
        bump(&self.counters.total_connections);
        bump(&self.counters.active_connections);
    }

    /// A worker finished after `lifetime`
    pub fn connection_closed(&self, lifetime: Duration) {
        let c = &self.counters;
        c.active_connections.fetch_sub(1, Ordering::Relaxed);
        let nanos = u64::try_from(lifetime.as_nanos()).unwrap_or(u64::MAX);
        c.closed_duration_ns.fetch_add(nanos, Ordering::Relaxed);
    }

    /// A socket was dropped at accept time because the cap was reached
    pub fn connection_rejected(&self) {
        bump(&self.counters.rejected_connections);
    }

    /// Workers currently alive
    pub fn active_connections(&self) -> u64 {
        read(&self.counters.active_connections)
    }

    /// Sockets handed to a worker since creation
    pub fn total_connections(&self) -> u64 {
        read(&self.counters.total_connections)
    }

    pub(crate) fn stanza_received(&self) {
        bump(&self.counters.stanzas_received);
    }

    pub(crate) fn stanzas_sent(&self, count: u64) {
        self.counters.stanzas_sent.fetch_add(count, Ordering::Relaxed);
    }

    /// Count one SASL exchange
    pub fn auth_attempt(&self, success: bool) {
        if success {
            bump(&self.counters.auth_successes);
        } else {
            bump(&self.counters.auth_failures);
        }
    }

    pub(crate) fn session_bound(&self) {
        bump(&self.counters.sessions_bound);
    }

    pub(crate) fn bind_conflict(&self) {
        bump(&self.counters.bind_conflicts);
    }

    pub(crate) fn message_routed(&self) {
        bump(&self.counters.messages_routed);
    }

    pub(crate) fn message_undeliverable(&self) {
        bump(&self.counters.messages_undeliverable);
    }

    pub(crate) fn protocol_error(&self) {
        bump(&self.counters.protocol_errors);
    }

    pub(crate) fn idle_tick(&self) {
        bump(&self.counters.idle_ticks);
    }

    pub(crate) fn forced_close(&self) {
        bump(&self.counters.forced_closes);
    }

    /// Copy every counter out
    ///
    /// Each counter is loaded on its own, so under load the values may not
    /// be mutually consistent.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let c = &self.counters;
        let total_connections = read(&c.total_connections);
        let active_connections = read(&c.active_connections);
        let closed = total_connections.saturating_sub(active_connections);
        let avg_connection_duration = match closed {
            0 => Duration::ZERO,
            n => Duration::from_nanos(read(&c.closed_duration_ns) / n),
        };

        MetricsSnapshot {
            total_connections,
            active_connections,
            rejected_connections: read(&c.rejected_connections),
            stanzas_received: read(&c.stanzas_received),
            stanzas_sent: read(&c.stanzas_sent),
            auth_successes: read(&c.auth_successes),
            auth_failures: read(&c.auth_failures),
            sessions_bound: read(&c.sessions_bound),
            bind_conflicts: read(&c.bind_conflicts),
            messages_routed: read(&c.messages_routed),
            messages_undeliverable: read(&c.messages_undeliverable),
            protocol_errors: read(&c.protocol_errors),
            idle_ticks: read(&c.idle_ticks),
            forced_closes: read(&c.forced_closes),
            uptime: self.started_at.elapsed(),
            avg_connection_duration,
        }
    }
}

/// Counter values copied out of [`ServerMetrics`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Sockets handed to a worker
    pub total_connections: u64,
    /// Workers alive at snapshot time
    pub active_connections: u64,
    /// Sockets dropped at accept time by the cap
    pub rejected_connections: u64,
    /// Frames decoded from clients
    pub stanzas_received: u64,
    /// Frames written to clients
    pub stanzas_sent: u64,
    /// Successful SASL exchanges
    pub auth_successes: u64,
    /// Failed SASL exchanges
    pub auth_failures: u64,
    /// Successful resource binds
    pub sessions_bound: u64,
    /// Binds refused for an already connected user
    pub bind_conflicts: u64,
    /// Messages enqueued for a recipient
    pub messages_routed: u64,
    /// Messages answered with a delivery failure notice
    pub messages_undeliverable: u64,
    /// Connections terminated for protocol violations
    pub protocol_errors: u64,
    /// Idle ticks on which workers drained their queues
    pub idle_ticks: u64,
    /// Connections cancelled after the shutdown grace period
    pub forced_closes: u64,
    /// Time since the metrics were created
    pub uptime: Duration,
    /// Mean lifetime of closed connections
    pub avg_connection_duration: Duration,
}

impl MetricsSnapshot {
    /// Sum of failed auths, bind conflicts, undeliverable messages and protocol errors
    pub fn total_errors(&self) -> u64 {
        self.auth_failures + self.bind_conflicts + self.messages_undeliverable + self.protocol_errors
    }
}
