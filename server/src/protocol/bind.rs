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

//! `<iq>` handling: resource binding plus the stub queries clients expect

use super::{BoundSession, ConnectionContext, NS_BIND, NS_IQ_AUTH, NS_IQ_ROSTER, NS_STANZAS, ProtocolEnv, Step};
use crate::{Jid, generate_resource};
use jabbernest_codec::Element;
use metrics::counter;
use tracing::{debug, info, instrument, warn};

/// Id used when the request carried none
const FALLBACK_ID: &str = "response";

/// Answer an `<iq>`
///
/// A `<bind>` child registers the session. Everything else gets a canned
/// result so ordinary clients can finish logging in.
#[instrument(skip_all, fields(connection_id = %env.connection_id))]
pub fn handle_iq(context: &ConnectionContext, iq: &Element, env: &ProtocolEnv<'_>) -> Step {
    let id = iq.attr("id").filter(|id| !id.is_empty()).unwrap_or(FALLBACK_ID);
    let kind = iq.attr("type").unwrap_or("get");

    if matches!(kind, "result" | "error") {
        debug!(id, kind, "Ignoring iq response");
        return Step::new(context.clone());
    }

    match iq.child_ns("bind", NS_BIND) {
        Some(request) => bind(context, request, id, env),
        None => Step::new(context.clone()).reply(query(iq, id, kind)),
    }
}

fn bind(context: &ConnectionContext, request: &Element, id: &str, env: &ProtocolEnv<'_>) -> Step {
    let Some(username) = context.username() else {
        warn!("Bind attempted before authentication");
        return Step::new(context.clone()).reply(error_reply(id, "auth", "not-authorized"));
    };

    let resource = request
        .child("resource")
        .map(|r| r.text().trim())
        .filter(|r| !r.is_empty())
        .map_or_else(generate_resource, str::to_string);
    let full_jid = Jid::new_full(username, env.config.server_name(), resource);

    match env.directory.register(env.connection_id, username, full_jid) {
        Ok((registration, deliveries)) => {
            let session = registration.session().clone();
            info!(jid = %session.full_jid(), "Resource bound");
            env.metrics.session_bound();
            counter!("jabbernest.sessions.bound").increment(1);

            let reply = result(id).with_child(
                Element::new("bind")
                    .with_attr("xmlns", NS_BIND)
                    .with_child(Element::new("jid").with_text(session.full_jid().to_string())),
            );
            let mut step = Step::new(context.with_session(session)).reply(reply);
            step.bound = Some(BoundSession {
                registration,
                deliveries,
            });
            step
        }
        Err(conflict) => {
            warn!(error = %conflict, "Bind refused");
            env.metrics.bind_conflict();
            counter!("jabbernest.sessions.conflicts").increment(1);
            Step::new(context.clone()).reply(error_reply(id, "cancel", "conflict"))
        }
    }
}

fn query(iq: &Element, id: &str, kind: &str) -> Element {
    let reply = result(id);
    if kind != "get" {
        return reply;
    }

    if iq.child_ns("query", NS_IQ_AUTH).is_some() {
        reply.with_child(
            Element::new("query")
                .with_attr("xmlns", NS_IQ_AUTH)
                .with_child(Element::new("username"))
                .with_child(Element::new("password"))
                .with_child(Element::new("resource")),
        )
    } else if iq.child_ns("query", NS_IQ_ROSTER).is_some() {
        reply.with_child(Element::new("query").with_attr("xmlns", NS_IQ_ROSTER))
    } else {
        reply
    }
}

fn result(id: &str) -> Element {
    Element::new("iq").with_attr("type", "result").with_attr("id", id)
}

fn error_reply(id: &str, error_type: &str, condition: &str) -> Element {
    Element::new("iq")
        .with_attr("type", "error")
        .with_attr("id", id)
        .with_child(
            Element::new("error")
                .with_attr("type", error_type)
                .with_child(Element::new(condition).with_attr("xmlns", NS_STANZAS)),
        )
}
