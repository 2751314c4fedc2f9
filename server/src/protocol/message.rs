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

//! Message routing between bound sessions

use super::{ConnectionContext, ProtocolEnv, Step};
use crate::{Delivery, LoggedMessage};
use jabbernest_codec::Element;
use metrics::counter;
use tracing::{debug, instrument, warn};

/// Body of the notice sent back when a message cannot be delivered
pub const UNDELIVERABLE_NOTICE: &str = "Message delivery failed: recipient-unavailable";

/// Route a `<message>` to its recipient
///
/// The stanza is always recorded in the [`MessageLog`](crate::MessageLog).
/// Delivery goes through the recipient's queue with `from` set to the
/// sender's bound address, whatever the client claimed. When no session
/// matches, a notice is queued for the sender instead. Nothing is written
/// back directly, so the returned step carries no replies.
#[instrument(skip_all, fields(connection_id = %env.connection_id))]
pub fn route(context: &ConnectionContext, message: &Element, env: &ProtocolEnv<'_>) -> Step {
    let to = message.attr("to").map(str::trim).filter(|to| !to.is_empty());
    let body = message.child("body").map(|b| b.text().to_string());

    env.message_log.record(LoggedMessage {
        from: message.attr("from").map(str::to_string),
        to: to.map(str::to_string),
        body: body.clone().unwrap_or_default(),
    });

    let step = Step::new(context.clone());

    let Some(to) = to else {
        warn!("Dropping message without recipient");
        return step;
    };
    let Some(sender) = context.session() else {
        warn!(to, "Dropping message from unbound connection");
        return step;
    };

    let delivered = env.directory.resolve(to).is_some_and(|target| {
        target
            .deliver(Delivery {
                from: sender.full_jid().to_string(),
                to: target.full_jid().to_string(),
                body: body.clone(),
            })
            .is_ok()
    });

    if delivered {
        debug!(from = %sender.full_jid(), to, "Message routed");
        env.metrics.message_routed();
        counter!("jabbernest.messages.routed").increment(1);
        return step;
    }

    warn!(from = %sender.full_jid(), to, "Recipient unavailable");
    env.metrics.message_undeliverable();
    counter!("jabbernest.messages.undeliverable").increment(1);

    let notice = Delivery {
        from: env.config.server_name().to_string(),
        to: sender.full_jid().to_string(),
        body: Some(UNDELIVERABLE_NOTICE.to_string()),
    };
    if sender.deliver(notice).is_err() {
        debug!("Sender queue closed before notice could be queued");
    }
    step
}

/// Render a queued delivery as the stanza written to the recipient
pub fn render(delivery: &Delivery) -> Element {
    let message = Element::new("message")
        .with_attr("from", &delivery.from)
        .with_attr("to", &delivery.to)
        .with_attr("type", "chat");
    match delivery.body.as_deref().filter(|b| !b.is_empty()) {
        Some(body) => message.with_child(Element::new("body").with_text(body)),
        None => message,
    }
}
