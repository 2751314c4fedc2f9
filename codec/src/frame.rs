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

use crate::{CodecResult, Element};
use quick_xml::events::BytesStart;

/// Stream namespace used on the `<stream:stream>` wrapper
pub const NS_STREAM: &str = "http://etherx.jabber.org/streams";

/// Default content namespace for client-to-server streams
pub const NS_CLIENT: &str = "jabber:client";

/// Qualified name of the stream wrapper element
pub const STREAM_TAG: &str = "stream:stream";

/// The opening `<stream:stream ...>` tag of an XML stream.
///
/// The wrapper element stays open for the lifetime of the stream, so it is
/// framed on its own rather than as part of a stanza.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamHeader {
    attributes: Vec<(String, String)>,
}

impl StreamHeader {
    /// Create a header with no attributes
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the header a client sends to open a stream towards `domain`
    pub fn client(domain: impl Into<String>) -> Self {
        Self::new()
            .with_attr("to", domain)
            .with_attr("version", "1.0")
            .with_attr("xmlns", NS_CLIENT)
            .with_attr("xmlns:stream", NS_STREAM)
    }

    /// Create the header a server answers with
    pub fn server(from: impl Into<String>, id: impl Into<String>) -> Self {
        Self::new()
            .with_attr("from", from)
            .with_attr("id", id)
            .with_attr("version", "1.0")
            .with_attr("xmlns", NS_CLIENT)
            .with_attr("xmlns:stream", NS_STREAM)
    }

    pub(crate) fn from_start(start: &BytesStart<'_>) -> CodecResult<Self> {
        let element = Element::from_start(start)?;
        Ok(Self {
            attributes: element
                .attributes()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        })
    }

    /// Add an attribute
    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((key.into(), value.into()));
        self
    }

    /// Look up an attribute by name
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// All attributes in document order
    pub fn attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Target domain (`to`)
    pub fn to(&self) -> Option<&str> {
        self.attr("to")
    }

    /// Originating domain (`from`)
    pub fn from(&self) -> Option<&str> {
        self.attr("from")
    }

    /// Stream identifier (`id`)
    pub fn id(&self) -> Option<&str> {
        self.attr("id")
    }

    /// Protocol version (`version`)
    pub fn version(&self) -> Option<&str> {
        self.attr("version")
    }
}

/// A single unit of an XML stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmppFrame {
    /// `<stream:stream ...>` opening tag (optionally preceded by an XML declaration)
    Header(StreamHeader),
    /// A complete top-level element
    Stanza(Element),
    /// `</stream:stream>` closing tag
    Footer,
}

impl XmppFrame {
    /// The stanza element, if this frame carries one
    pub fn as_stanza(&self) -> Option<&Element> {
        match self {
            XmppFrame::Stanza(element) => Some(element),
            _ => None,
        }
    }
}

impl From<Element> for XmppFrame {
    fn from(element: Element) -> Self {
        XmppFrame::Stanza(element)
    }
}

impl From<StreamHeader> for XmppFrame {
    fn from(header: StreamHeader) -> Self {
        XmppFrame::Header(header)
    }
}
