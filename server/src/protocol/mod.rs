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

//! Protocol handlers
//!
//! Each handler is a plain function from the current [`ConnectionContext`]
//! and one [`StreamEvent`] to a [`Step`]: the next context plus the frames to
//! write back. Handlers never touch a socket. The only shared state they
//! reach is the [`Directory`] (bind and routing) and the [`MessageLog`].
//!
//! | State | Event | Handler |
//! |---|---|---|
//! | `AwaitingStreamOpen` | stream open | [`stream::open`] |
//! | `AwaitingAuth` | `<auth>` | [`auth::authenticate`] |
//! | `AuthenticatedAwaitingRestart` | stream open | [`stream::open`] |
//! | `AwaitingAuth`, `Active` | `<iq>` | [`bind::handle_iq`] |
//! | `AwaitingAuth`, `Active` | `<message>` | [`message::route`] |
//! | any | stream close | [`stream::close`] |

pub mod auth;
pub mod bind;
pub mod message;
pub mod stream;

use crate::{
    ConnectionId, ConnectionState, Directory, DeliveryReceiver, Jid, MessageLog, Result,
    ServerConfig, ServerMetrics, Session, SessionRegistration, XmppError,
};
use jabbernest_codec::{Element, StreamHeader, XmppFrame};
use std::sync::Arc;
use tracing::debug;

/// SASL namespace
pub const NS_SASL: &str = "urn:ietf:params:xml:ns:xmpp-sasl";
/// Resource binding namespace
pub const NS_BIND: &str = "urn:ietf:params:xml:ns:xmpp-bind";
/// Session establishment namespace
pub const NS_SESSION: &str = "urn:ietf:params:xml:ns:xmpp-session";
/// Stanza error condition namespace
pub const NS_STANZAS: &str = "urn:ietf:params:xml:ns:xmpp-stanzas";
/// Legacy authentication query namespace
pub const NS_IQ_AUTH: &str = "jabber:iq:auth";
/// Roster query namespace
pub const NS_IQ_ROSTER: &str = "jabber:iq:roster";

/// A decoded frame classified by what the state machine cares about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// `<stream:stream ...>`
    StreamOpen(StreamHeader),
    /// `<auth>` in the SASL namespace
    Auth(Element),
    /// `<iq>`
    Iq(Element),
    /// `<message>`
    Message(Element),
    /// `<presence>`
    Presence(Element),
    /// `</stream:stream>`
    StreamClose,
    /// Any other top-level element
    Other(Element),
}

impl StreamEvent {
    /// Short name used in logs and errors
    pub fn name(&self) -> &str {
        match self {
            StreamEvent::StreamOpen(_) => "stream-open",
            StreamEvent::Auth(_) => "auth",
            StreamEvent::Iq(_) => "iq",
            StreamEvent::Message(_) => "message",
            StreamEvent::Presence(_) => "presence",
            StreamEvent::StreamClose => "stream-close",
            StreamEvent::Other(element) => element.local_name(),
        }
    }
}

impl From<XmppFrame> for StreamEvent {
    fn from(frame: XmppFrame) -> Self {
        match frame {
            XmppFrame::Header(header) => StreamEvent::StreamOpen(header),
            XmppFrame::Footer => StreamEvent::StreamClose,
            XmppFrame::Stanza(element) => match element.local_name() {
                "auth" if element.namespace() == Some(NS_SASL) => StreamEvent::Auth(element),
                "iq" => StreamEvent::Iq(element),
                "message" => StreamEvent::Message(element),
                "presence" => StreamEvent::Presence(element),
                _ => StreamEvent::Other(element),
            },
        }
    }
}

/// Per-connection protocol state
///
/// Owned by one worker. Handlers receive it by reference and hand back an
/// updated copy in their [`Step`].
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    state: ConnectionState,
    username: Option<String>,
    session: Option<Arc<Session>>,
}

impl Default for ConnectionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionContext {
    /// Context of a freshly accepted connection
    pub fn new() -> Self {
        Self {
            state: ConnectionState::AwaitingStreamOpen,
            username: None,
            session: None,
        }
    }

    /// Current handshake state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Username established by SASL
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Session registered at bind time
    pub fn session(&self) -> Option<&Arc<Session>> {
        self.session.as_ref()
    }

    /// Bound full address
    pub fn full_jid(&self) -> Option<&Jid> {
        self.session.as_ref().map(|s| s.full_jid())
    }

    /// Bound bare address
    pub fn bare_jid(&self) -> Option<&Jid> {
        self.session.as_ref().map(|s| s.bare_jid())
    }

    /// Copy with a new state
    pub fn with_state(&self, state: ConnectionState) -> Self {
        Self {
            state,
            ..self.clone()
        }
    }

    /// Copy with a username
    pub fn with_username(&self, username: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            ..self.clone()
        }
    }

    /// Copy with a bound session
    pub fn with_session(&self, session: Arc<Session>) -> Self {
        Self {
            session: Some(session),
            ..self.clone()
        }
    }
}

/// A session registered by a successful bind, handed to the worker
#[derive(Debug)]
pub struct BoundSession {
    /// Guard that keeps the session in the directory
    pub registration: SessionRegistration,
    /// The session's delivery queue, drained only by the owning worker
    pub deliveries: DeliveryReceiver,
}

/// Outcome of handling one event
#[derive(Debug)]
pub struct Step {
    /// Context after the event
    pub context: ConnectionContext,
    /// Frames to write, in order
    pub replies: Vec<XmppFrame>,
    /// Set when the event bound a new session
    pub bound: Option<BoundSession>,
}

impl Step {
    /// A step that writes nothing
    pub fn new(context: ConnectionContext) -> Self {
        Self {
            context,
            replies: Vec::new(),
            bound: None,
        }
    }

    /// Append a frame to write
    pub fn reply(mut self, frame: impl Into<XmppFrame>) -> Self {
        self.replies.push(frame.into());
        self
    }
}

/// Shared services handlers may consult
#[derive(Debug, Clone, Copy)]
pub struct ProtocolEnv<'a> {
    /// Connection the event arrived on
    pub connection_id: ConnectionId,
    /// Server configuration
    pub config: &'a ServerConfig,
    /// Session directory
    pub directory: &'a Directory,
    /// Message record
    pub message_log: &'a MessageLog,
    /// Server metrics
    pub metrics: &'a ServerMetrics,
}

/// Dispatch one event according to the connection state
///
/// Returns [`XmppError::UnexpectedEvent`] when the event is not allowed in the
/// current state; the caller terminates the connection.
pub fn handle_event(
    context: &ConnectionContext,
    event: StreamEvent,
    env: &ProtocolEnv<'_>,
) -> Result<Step> {
    use ConnectionState::*;

    match (context.state(), event) {
        (Closed, event) => Err(unexpected(context, &event)),
        (_, StreamEvent::StreamClose) => Ok(stream::close(context)),
        (AwaitingStreamOpen | AuthenticatedAwaitingRestart, StreamEvent::StreamOpen(header)) => {
            stream::open(context, &header, env.config)
        }
        (AwaitingAuth, StreamEvent::Auth(auth)) => Ok(auth::authenticate(context, &auth, env)),
        (AwaitingAuth | Active, StreamEvent::Iq(iq)) => Ok(bind::handle_iq(context, &iq, env)),
        (AwaitingAuth | Active, StreamEvent::Message(message)) => {
            Ok(message::route(context, &message, env))
        }
        (AwaitingAuth | Active, event @ (StreamEvent::Presence(_) | StreamEvent::Other(_))) => {
            debug!(connection_id = %env.connection_id, event = event.name(), "Ignoring stanza");
            Ok(Step::new(context.clone()))
        }
        (_, event) => Err(unexpected(context, &event)),
    }
}

fn unexpected(context: &ConnectionContext, event: &StreamEvent) -> XmppError {
    XmppError::UnexpectedEvent {
        state: context.state(),
        event: event.name().to_string(),
    }
}
