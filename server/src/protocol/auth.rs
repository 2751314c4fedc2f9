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

//! SASL PLAIN authentication

use super::{ConnectionContext, NS_SASL, ProtocolEnv, Step};
use crate::{ConnectionState, ServerConfig, is_valid_local};
use base64::{Engine as _, engine::general_purpose};
use jabbernest_codec::{Element, XmppFrame};
use metrics::counter;
use std::fmt;
use thiserror::Error;
use tracing::{info, instrument, warn};

/// The only mechanism offered
pub const MECHANISM_PLAIN: &str = "PLAIN";

/// Why a PLAIN payload could not be read
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlainError {
    /// No payload at all
    #[error("empty payload")]
    Empty,
    /// Not valid base64
    #[error("invalid base64")]
    Base64,
    /// Decoded bytes were not UTF-8
    #[error("payload is not UTF-8")]
    Utf8,
    /// Fewer than two NUL-separated fields
    #[error("missing NUL separator")]
    MissingSeparator,
    /// The username field was empty
    #[error("empty username")]
    EmptyUsername,
    /// The username contained `@`, `/` or whitespace
    #[error("username is not a valid local part")]
    InvalidUsername,
}

/// Credentials carried by a PLAIN payload
#[derive(Clone, PartialEq, Eq)]
pub struct PlainCredentials {
    /// Authorization identity, when one was given
    pub authzid: Option<String>,
    /// Authentication identity
    pub username: String,
    /// Password
    pub password: String,
}

impl fmt::Debug for PlainCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlainCredentials")
            .field("authzid", &self.authzid)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Decode a base64 PLAIN payload
///
/// Accepts `authzid\0username\0password` and `username\0password`. With more
/// than three fields the last two are taken as username and password.
pub fn parse_plain(payload: &str) -> Result<PlainCredentials, PlainError> {
    let payload = payload.trim();
    if payload.is_empty() {
        return Err(PlainError::Empty);
    }

    let decoded = general_purpose::STANDARD
        .decode(payload)
        .map_err(|_| PlainError::Base64)?;
    let text = String::from_utf8(decoded).map_err(|_| PlainError::Utf8)?;

    let parts: Vec<&str> = text.split('\0').collect();
    let (authzid, username, password) = match parts.as_slice() {
        [username, password] => (None, *username, *password),
        [first, .., username, password] => {
            let authzid = Some(first.to_string()).filter(|a| !a.is_empty());
            (authzid, *username, *password)
        }
        _ => return Err(PlainError::MissingSeparator),
    };

    if username.is_empty() {
        return Err(PlainError::EmptyUsername);
    }
    if !is_valid_local(username) {
        return Err(PlainError::InvalidUsername);
    }

    Ok(PlainCredentials {
        authzid,
        username: username.to_string(),
        password: password.to_string(),
    })
}

/// Check credentials against the configured table
///
/// An empty table accepts any well-formed pair.
pub fn verify(config: &ServerConfig, credentials: &PlainCredentials) -> bool {
    if config.is_permissive() {
        return true;
    }
    config.password(&credentials.username) == Some(credentials.password.as_str())
}

/// Handle an `<auth>` request
///
/// Success moves the connection to `AuthenticatedAwaitingRestart`. Any
/// failure answers with a `<failure>` and closes the stream.
#[instrument(skip_all, fields(connection_id = %env.connection_id))]
pub fn authenticate(context: &ConnectionContext, auth: &Element, env: &ProtocolEnv<'_>) -> Step {
    let mechanism = auth.attr("mechanism").unwrap_or_default();
    if mechanism != MECHANISM_PLAIN {
        warn!(mechanism, "Unsupported SASL mechanism");
        return reject(context, env, "invalid-mechanism");
    }

    let credentials = match parse_plain(auth.text()) {
        Ok(credentials) => credentials,
        Err(e) => {
            warn!(error = %e, "Malformed PLAIN payload");
            return reject(context, env, "not-authorized");
        }
    };

    if !verify(env.config, &credentials) {
        warn!(username = %credentials.username, "Authentication failed");
        return reject(context, env, "not-authorized");
    }

    info!(username = %credentials.username, "Authenticated");
    env.metrics.auth_attempt(true);
    counter!("jabbernest.auth.success").increment(1);

    Step::new(
        context
            .with_username(credentials.username)
            .with_state(ConnectionState::AuthenticatedAwaitingRestart),
    )
    .reply(Element::new("success").with_attr("xmlns", NS_SASL))
}

fn reject(context: &ConnectionContext, env: &ProtocolEnv<'_>, condition: &str) -> Step {
    env.metrics.auth_attempt(false);
    counter!("jabbernest.auth.failure").increment(1);

    Step::new(context.with_state(ConnectionState::Closed))
        .reply(
            Element::new("failure")
                .with_attr("xmlns", NS_SASL)
                .with_child(Element::new(condition)),
        )
        .reply(XmppFrame::Footer)
}

#[cfg(test)]
mod tests {
    use super::super::test_support::TestEnv;
    use super::*;
    use proptest::prelude::*;
    use tracing_test::traced_test;

    fn encode(raw: &str) -> String {
        general_purpose::STANDARD.encode(raw)
    }

    fn auth_request(raw: &str) -> Element {
        Element::new("auth")
            .with_attr("xmlns", NS_SASL)
            .with_attr("mechanism", "PLAIN")
            .with_text(encode(raw))
    }

    fn awaiting_auth() -> ConnectionContext {
        ConnectionContext::new().with_state(ConnectionState::AwaitingAuth)
    }

    #[test]
    fn test_parse_with_and_without_authzid() {
        let creds = parse_plain(&encode("\0alice\0secret")).unwrap();
        assert_eq!(creds.authzid, None);
        assert_eq!(creds.username, "alice");
        assert_eq!(creds.password, "secret");

        let creds = parse_plain(&encode("admin\0alice\0secret")).unwrap();
        assert_eq!(creds.authzid.as_deref(), Some("admin"));
        assert_eq!(creds.username, "alice");

        let creds = parse_plain(&encode("alice\0secret")).unwrap();
        assert_eq!(creds.authzid, None);
        assert_eq!(creds.password, "secret");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert_eq!(parse_plain(""), Err(PlainError::Empty));
        assert_eq!(parse_plain("!!not base64!!"), Err(PlainError::Base64));
        assert_eq!(parse_plain(&encode("alicesecret")), Err(PlainError::MissingSeparator));
        assert_eq!(parse_plain(&encode("\0\0secret")), Err(PlainError::EmptyUsername));
        assert_eq!(
            parse_plain(&encode("\0bob@localhost/x\0pw")),
            Err(PlainError::InvalidUsername)
        );
        assert_eq!(parse_plain(&encode("\0bob smith\0pw")), Err(PlainError::InvalidUsername));
        let invalid_utf8 = general_purpose::STANDARD.encode([0xff, 0x00, 0xfe]);
        assert_eq!(parse_plain(&invalid_utf8), Err(PlainError::Utf8));
    }

    #[test]
    fn test_debug_redacts_password() {
        let creds = parse_plain(&encode("\0alice\0hunter2")).unwrap();
        assert!(!format!("{:?}", creds).contains("hunter2"));
    }

    #[test]
    fn test_successful_authentication() {
        let services = TestEnv::new();
        let step = authenticate(
            &awaiting_auth(),
            &auth_request("\0alice\0password123"),
            &services.env(1),
        );

        assert_eq!(step.context.state(), ConnectionState::AuthenticatedAwaitingRestart);
        assert_eq!(step.context.username(), Some("alice"));
        assert_eq!(step.replies.len(), 1);
        assert!(step.replies[0].as_stanza().unwrap().is("success", NS_SASL));
        assert_eq!(services.metrics.snapshot().auth_successes, 1);
    }

    #[test]
    #[traced_test]
    fn test_wrong_password_closes_stream() {
        let services = TestEnv::new();
        let step = authenticate(
            &awaiting_auth(),
            &auth_request("\0alice\0hunter2"),
            &services.env(1),
        );

        assert_eq!(step.context.state(), ConnectionState::Closed);
        assert_eq!(step.context.username(), None);
        let failure = step.replies[0].as_stanza().unwrap();
        assert!(failure.is("failure", NS_SASL));
        assert!(failure.child("not-authorized").is_some());
        assert_eq!(step.replies[1], XmppFrame::Footer);
        assert_eq!(services.metrics.snapshot().auth_failures, 1);
        assert!(logs_contain("Authentication failed"));
        assert!(!logs_contain("hunter2"));
    }

    #[test]
    fn test_unknown_user_fails() {
        let services = TestEnv::new();
        let step = authenticate(
            &awaiting_auth(),
            &auth_request("\0mallory\0password123"),
            &services.env(1),
        );
        assert_eq!(step.context.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_unsupported_mechanism() {
        let services = TestEnv::new();
        let request = Element::new("auth")
            .with_attr("xmlns", NS_SASL)
            .with_attr("mechanism", "DIGEST-MD5");
        let step = authenticate(&awaiting_auth(), &request, &services.env(1));

        assert_eq!(step.context.state(), ConnectionState::Closed);
        let failure = step.replies[0].as_stanza().unwrap();
        assert!(failure.child("invalid-mechanism").is_some());
    }

    #[test]
    fn test_empty_table_is_permissive() {
        let services =
            TestEnv::with_config(ServerConfig::builder().port(5222).build().unwrap());
        let step = authenticate(
            &awaiting_auth(),
            &auth_request("\0anyone\0anything"),
            &services.env(1),
        );
        assert_eq!(step.context.username(), Some("anyone"));

        // Still rejects what does not parse
        let step = authenticate(&awaiting_auth(), &auth_request("garbage"), &services.env(1));
        assert_eq!(step.context.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_address_shaped_username_is_refused_even_when_permissive() {
        let services =
            TestEnv::with_config(ServerConfig::builder().port(5222).build().unwrap());
        let step = authenticate(
            &awaiting_auth(),
            &auth_request("\0bob@localhost/x\0anything"),
            &services.env(1),
        );

        assert_eq!(step.context.state(), ConnectionState::Closed);
        assert_eq!(step.context.username(), None);
        let failure = step.replies[0].as_stanza().unwrap();
        assert!(failure.child("not-authorized").is_some());
        assert_eq!(services.metrics.snapshot().auth_failures, 1);
    }

    proptest! {
        #[test]
        fn plain_payloads_parse_back(
            authzid in "[^\u{0}]{0,12}",
            username in "[^\u{0}@/\\s]{1,24}",
            password in "[^\u{0}]{0,24}",
        ) {
            let creds = parse_plain(&encode(&format!("{}\0{}\0{}", authzid, username, password))).unwrap();
            prop_assert_eq!(creds.username, username);
            prop_assert_eq!(creds.password, password);
            prop_assert_eq!(creds.authzid, Some(authzid).filter(|a| !a.is_empty()));
        }

        #[test]
        fn usernames_with_separators_are_refused(
            head in "[a-z]{0,8}",
            separator in "[@/ ]",
            tail in "[a-z]{0,8}",
        ) {
            let raw = format!("\0{}{}{}\0pw", head, separator, tail);
            prop_assert!(parse_plain(&encode(&raw)).is_err());
        }

        #[test]
        fn arbitrary_payloads_never_panic(payload in ".{0,64}") {
            let _ = parse_plain(&payload);
        }
    }
}
