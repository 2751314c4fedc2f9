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

//! Jabber identifiers
//!
//! Only the split into `local@domain/resource` is modelled; no stringprep or
//! case folding is applied, so addresses compare byte-for-byte.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Reasons a string is not a usable address
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JidError {
    /// Nothing between `@` and `/`, or an empty string
    #[error("JID has an empty domain")]
    EmptyDomain,
    /// `@` present with nothing before it
    #[error("JID has an empty local part")]
    EmptyLocal,
    /// `/` present with nothing after it
    #[error("JID has an empty resource")]
    EmptyResource,
}

/// An address of the form `[local@]domain[/resource]`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Jid {
    local: Option<String>,
    domain: String,
    resource: Option<String>,
}

impl Jid {
    /// Parse an address
    pub fn parse(s: &str) -> Result<Self, JidError> {
        let (bare, resource) = match s.split_once('/') {
            Some((_, "")) => return Err(JidError::EmptyResource),
            Some((bare, resource)) => (bare, Some(resource.to_string())),
            None => (s, None),
        };
        let (local, domain) = match bare.split_once('@') {
            Some(("", _)) => return Err(JidError::EmptyLocal),
            Some((local, domain)) => (Some(local.to_string()), domain),
            None => (None, bare),
        };
        if domain.is_empty() {
            return Err(JidError::EmptyDomain);
        }
        Ok(Self {
            local,
            domain: domain.to_string(),
            resource,
        })
    }

    /// Build a full address from its parts
    pub fn new_full(
        local: impl Into<String>,
        domain: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            local: Some(local.into()),
            domain: domain.into(),
            resource: Some(resource.into()),
        }
    }

    /// Build a bare address from its parts
    pub fn new_bare(local: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            local: Some(local.into()),
            domain: domain.into(),
            resource: None,
        }
    }

    /// The part before `@`
    pub fn local(&self) -> Option<&str> {
        self.local.as_deref()
    }

    /// The part between `@` and `/`
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// The part after `/`
    pub fn resource(&self) -> Option<&str> {
        self.resource.as_deref()
    }

    /// This address without its resource
    pub fn bare(&self) -> Jid {
        Self {
            local: self.local.clone(),
            domain: self.domain.clone(),
            resource: None,
        }
    }

    /// Whether the address carries no resource
    pub fn is_bare(&self) -> bool {
        self.resource.is_none()
    }
}

/// Whether `local` can stand before the `@` of a bound address
///
/// Empty strings, `@`, `/` and whitespace are refused so that every local
/// part maps to exactly one bare address.
pub fn is_valid_local(local: &str) -> bool {
    !local.is_empty() && !local.chars().any(|c| c == '@' || c == '/' || c.is_whitespace())
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(local) = &self.local {
            write!(f, "{}@", local)?;
        }
        f.write_str(&self.domain)?;
        if let Some(resource) = &self.resource {
            write!(f, "/{}", resource)?;
        }
        Ok(())
    }
}

impl FromStr for Jid {
    type Err = JidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Generate a resource of the form `resource-xxxxxxxx`
pub fn generate_resource() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("resource-{}", &id[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_full() {
        let jid = Jid::parse("alice@localhost/desk").unwrap();
        assert_eq!(jid.local(), Some("alice"));
        assert_eq!(jid.domain(), "localhost");
        assert_eq!(jid.resource(), Some("desk"));
        assert!(!jid.is_bare());
        assert_eq!(jid.bare().to_string(), "alice@localhost");
    }

    #[test]
    fn test_parse_bare_and_domain() {
        let jid: Jid = "bob@localhost".parse().unwrap();
        assert!(jid.is_bare());
        assert_eq!(jid.to_string(), "bob@localhost");

        let domain = Jid::parse("localhost").unwrap();
        assert_eq!(domain.local(), None);
        assert_eq!(domain.to_string(), "localhost");
    }

    #[test]
    fn test_resource_may_contain_separators() {
        let jid = Jid::parse("alice@localhost/home/desk@2").unwrap();
        assert_eq!(jid.resource(), Some("home/desk@2"));
    }

    #[test]
    fn test_parse_rejects_empty_parts() {
        assert_eq!(Jid::parse(""), Err(JidError::EmptyDomain));
        assert_eq!(Jid::parse("alice@"), Err(JidError::EmptyDomain));
        assert_eq!(Jid::parse("@localhost"), Err(JidError::EmptyLocal));
        assert_eq!(Jid::parse("alice@localhost/"), Err(JidError::EmptyResource));
    }

    #[test]
    fn test_generated_resources_are_distinct() {
        let a = generate_resource();
        let b = generate_resource();
        assert_ne!(a, b);
        assert_eq!(a.len(), "resource-".len() + 8);
        assert!(a["resource-".len()..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_valid_local_parts() {
        assert!(is_valid_local("alice"));
        assert!(is_valid_local("a.b-c_d"));
        for bad in ["", "bob@localhost", "bob/x", "bob@localhost/x", "bo b", "bob\t", " bob"] {
            assert!(!is_valid_local(bad), "{:?}", bad);
        }
    }

    proptest! {
        #[test]
        fn full_jid_display_parses_back(
            local in "[a-z][a-z0-9._-]{0,15}",
            domain in "[a-z][a-z0-9.-]{0,15}",
            resource in "[A-Za-z0-9/@._-]{1,16}",
        ) {
            let jid = Jid::new_full(local.clone(), domain.clone(), resource.clone());
            let parsed = Jid::parse(&jid.to_string()).unwrap();
            prop_assert_eq!(parsed.local(), Some(local.as_str()));
            prop_assert_eq!(parsed.domain(), domain.as_str());
            prop_assert_eq!(parsed.resource(), Some(resource.as_str()));
            prop_assert_eq!(parsed.bare().to_string(), format!("{}@{}", local, domain));
        }
    }
}
