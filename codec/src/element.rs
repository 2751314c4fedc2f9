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

//! Owned XML element tree
//!
//! Stanzas are small, so the codec materializes each one as a complete
//! [`Element`] tree rather than exposing a pull parser to protocol code.

use crate::CodecResult;
use quick_xml::Writer;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use std::fmt;
use std::io::Write;

/// A single XML element with its attributes, child elements and text content.
///
/// The `name` is kept exactly as written on the wire (`stream:features`,
/// `iq`); use [`Element::local_name`] when the prefix is irrelevant.
///
/// # Example
///
/// ```
/// use jabbernest_codec::Element;
///
/// let iq = Element::new("iq")
///     .with_attr("type", "result")
///     .with_attr("id", "bind_1")
///     .with_child(
///         Element::new("bind")
///             .with_attr("xmlns", "urn:ietf:params:xml:ns:xmpp-bind")
///             .with_child(Element::new("jid").with_text("alice@localhost/desk")),
///     );
///
/// assert_eq!(iq.attr("type"), Some("result"));
/// assert_eq!(iq.child("bind").and_then(|b| b.child("jid")).map(|j| j.text()), Some("alice@localhost/desk"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<Element>,
    text: String,
}

impl Element {
    /// Create an empty element with the given (possibly prefixed) name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Build an element from a start tag, unescaping attribute values
    pub(crate) fn from_start(start: &BytesStart<'_>) -> CodecResult<Self> {
        let name = std::str::from_utf8(start.name().as_ref())?.to_string();
        let mut element = Element::new(name);
        for attr in start.attributes() {
            let attr = attr?;
            let key = std::str::from_utf8(attr.key.as_ref())?.to_string();
            let value = attr.unescape_value()?.into_owned();
            element.attributes.push((key, value));
        }
        Ok(element)
    }

    /// The element name as written, including any namespace prefix
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The element name without its namespace prefix
    pub fn local_name(&self) -> &str {
        match self.name.split_once(':') {
            Some((_, local)) => local,
            None => &self.name,
        }
    }

    /// The namespace prefix, if the name carries one
    pub fn prefix(&self) -> Option<&str> {
        self.name.split_once(':').map(|(prefix, _)| prefix)
    }

    /// Look up an attribute by its name as written
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

    /// The default namespace declared on this element (`xmlns`)
    pub fn namespace(&self) -> Option<&str> {
        self.attr("xmlns")
    }

    /// Concatenated character data directly inside this element
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Child elements in document order
    pub fn children(&self) -> &[Element] {
        &self.children
    }

    /// First child with the given local name
    pub fn child(&self, local_name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.local_name() == local_name)
    }

    /// First child with the given local name and declared namespace
    pub fn child_ns(&self, local_name: &str, namespace: &str) -> Option<&Element> {
        self.children
            .iter()
            .find(|c| c.local_name() == local_name && c.namespace() == Some(namespace))
    }

    /// Check whether this element has the given local name and namespace
    pub fn is(&self, local_name: &str, namespace: &str) -> bool {
        self.local_name() == local_name && self.namespace() == Some(namespace)
    }

    /// Set (or replace) an attribute
    pub fn set_attr(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.attributes.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.attributes.push((key, value)),
        }
    }

    /// Append a child element
    pub fn push_child(&mut self, child: Element) {
        self.children.push(child);
    }

    /// Append character data
    pub fn push_text(&mut self, text: &str) {
        self.text.push_str(text);
    }

    /// Builder form of [`Element::set_attr`]
    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attr(key, value);
        self
    }

    /// Builder form of [`Element::push_child`]
    pub fn with_child(mut self, child: Element) -> Self {
        self.push_child(child);
        self
    }

    /// Builder form of [`Element::push_text`]
    pub fn with_text(mut self, text: impl AsRef<str>) -> Self {
        self.push_text(text.as_ref());
        self
    }

    /// Serialize this element (and its subtree) through a quick-xml writer.
    ///
    /// Elements without children or text are written in self-closing form.
    pub fn write_to<W: Write>(&self, writer: &mut Writer<W>) -> CodecResult<()> {
        let mut start = BytesStart::new(self.name.as_str());
        for (key, value) in &self.attributes {
            start.push_attribute((key.as_str(), value.as_str()));
        }

        if self.children.is_empty() && self.text.is_empty() {
            writer.write_event(Event::Empty(start))?;
            return Ok(());
        }

        writer.write_event(Event::Start(start))?;
        if !self.text.is_empty() {
            writer.write_event(Event::Text(BytesText::new(&self.text)))?;
        }
        for child in &self.children {
            child.write_to(writer)?;
        }
        writer.write_event(Event::End(BytesEnd::new(self.name.as_str())))?;
        Ok(())
    }

    /// Serialize this element into a standalone byte vector
    pub fn to_bytes(&self) -> CodecResult<Vec<u8>> {
        let mut writer = Writer::new(Vec::new());
        self.write_to(&mut writer)?;
        Ok(writer.into_inner())
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.to_bytes().map_err(|_| fmt::Error)?;
        let text = std::str::from_utf8(&bytes).map_err(|_| fmt::Error)?;
        f.write_str(text)
    }
}
