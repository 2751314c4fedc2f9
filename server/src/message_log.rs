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

//! Record of message stanzas seen by the server

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

/// Default number of entries kept before the oldest are dropped
pub const DEFAULT_MESSAGE_LOG_CAPACITY: usize = 1024;

/// A message stanza as the client sent it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedMessage {
    /// `from` attribute as claimed by the client, if any
    pub from: Option<String>,
    /// `to` attribute, if any
    pub to: Option<String>,
    /// Body text (empty when the message had none)
    pub body: String,
}

impl fmt::Display for LoggedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {}: {}",
            self.from.as_deref().unwrap_or("-"),
            self.to.as_deref().unwrap_or("-"),
            self.body
        )
    }
}

/// Bounded FIFO of [`LoggedMessage`]s shared by all connections
///
/// Lets code embedding the server assert on traffic without running a second
/// client. Cheap to clone.
#[derive(Debug, Clone)]
pub struct MessageLog {
    entries: Arc<Mutex<VecDeque<LoggedMessage>>>,
    capacity: usize,
}

impl Default for MessageLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_MESSAGE_LOG_CAPACITY)
    }
}

impl MessageLog {
    /// Create a log with the default capacity
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a log that keeps at most `capacity` entries
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(VecDeque::with_capacity(capacity.min(64)))),
            capacity: capacity.max(1),
        }
    }

    /// Append an entry, dropping the oldest when full
    pub fn record(&self, message: LoggedMessage) {
        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(message);
    }

    /// Take the oldest entry
    pub fn poll(&self) -> Option<LoggedMessage> {
        self.entries.lock().pop_front()
    }

    /// Copy of all entries, oldest first
    pub fn snapshot(&self) -> Vec<LoggedMessage> {
        self.entries.lock().iter().cloned().collect()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the log holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Remove every entry
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(body: &str) -> LoggedMessage {
        LoggedMessage {
            from: None,
            to: Some("bob@localhost".to_string()),
            body: body.to_string(),
        }
    }

    #[test]
    fn test_poll_is_fifo() {
        let log = MessageLog::new();
        log.record(entry("one"));
        log.record(entry("two"));

        assert_eq!(log.len(), 2);
        assert_eq!(log.poll().unwrap().body, "one");
        assert_eq!(log.poll().unwrap().body, "two");
        assert!(log.poll().is_none());
        assert!(log.is_empty());
    }

    #[test]
    fn test_capacity_drops_oldest() {
        let log = MessageLog::with_capacity(2);
        log.record(entry("one"));
        log.record(entry("two"));
        log.record(entry("three"));

        let bodies: Vec<_> = log.snapshot().into_iter().map(|m| m.body).collect();
        assert_eq!(bodies, vec!["two", "three"]);
    }

    #[test]
    fn test_clear_and_display() {
        let log = MessageLog::new();
        log.record(entry("hello"));
        assert_eq!(log.snapshot()[0].to_string(), "- -> bob@localhost: hello");

        log.clear();
        assert!(log.is_empty());
    }
}
