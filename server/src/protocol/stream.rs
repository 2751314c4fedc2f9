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

//! Stream open and close

use super::{ConnectionContext, NS_BIND, NS_SASL, NS_SESSION, Step};
use crate::{ConnectionState, Result, ServerConfig, XmppError};
use jabbernest_codec::{Element, StreamHeader, XmppFrame};
use tracing::debug;

/// Answer a client stream header
///
/// The first open advertises SASL PLAIN; the restart after authentication
/// advertises resource binding and sessions.
pub fn open(context: &ConnectionContext, header: &StreamHeader, config: &ServerConfig) -> Result<Step> {
    let (features, next) = match context.state() {
        ConnectionState::AwaitingStreamOpen => (sasl_features(), ConnectionState::AwaitingAuth),
        ConnectionState::AuthenticatedAwaitingRestart => (bind_features(), ConnectionState::Active),
        state => {
            return Err(XmppError::UnexpectedEvent {
                state,
                event: "stream-open".to_string(),
            });
        }
    };

    if let Some(to) = header.to() {
        if to != config.server_name() {
            debug!(to, server = config.server_name(), "Stream addressed to another domain");
        }
    }

    Ok(Step::new(context.with_state(next))
        .reply(response_header(config))
        .reply(features))
}

/// Close the stream
pub fn close(context: &ConnectionContext) -> Step {
    Step::new(context.with_state(ConnectionState::Closed)).reply(XmppFrame::Footer)
}

fn response_header(config: &ServerConfig) -> StreamHeader {
    let id = uuid::Uuid::new_v4().simple().to_string();
    StreamHeader::server(config.server_name(), id)
}

fn sasl_features() -> Element {
    Element::new("stream:features").with_child(
        Element::new("mechanisms")
            .with_attr("xmlns", NS_SASL)
            .with_child(Element::new("mechanism").with_text("PLAIN")),
    )
}

fn bind_features() -> Element {
    Element::new("stream:features")
        .with_child(Element::new("bind").with_attr("xmlns", NS_BIND))
        .with_child(Element::new("session").with_attr("xmlns", NS_SESSION))
}
