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

use crate::{CodecError, CodecResult, Element, STREAM_TAG, StreamHeader, XmppFrame};
use bytes::{Buf, BytesMut};
use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::errors::SyntaxError;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{trace, warn};

/// Default upper bound on a single buffered stanza
pub const DEFAULT_MAX_STANZA_SIZE: usize = 1024 * 1024;

/// XML stream codec
///
/// Splits an inbound byte stream into [`XmppFrame`]s and serializes outbound
/// frames. The codec is symmetric: the same type frames either side of a
/// connection, which keeps test clients honest.
///
/// # Decoding
///
/// Every call to `decode` re-tokenizes the pending buffer from the start of the
/// next top-level item. Nothing is consumed until a complete item (stream
/// header, stanza or stream footer) is available, so partial reads are simply
/// retried when more bytes arrive. Stanzas in this protocol are small, which
/// keeps the rescan cheap.
///
/// # Example
///
/// ```
/// use bytes::BytesMut;
/// use jabbernest_codec::{XmppCodec, XmppFrame};
/// use tokio_util::codec::Decoder;
///
/// let mut codec = XmppCodec::new();
/// let mut buf = BytesMut::from(&b"<presence/><message to='bob@localhost'><body>hi</body></message>"[..]);
///
/// let first = codec.decode(&mut buf).unwrap().unwrap();
/// assert_eq!(first.as_stanza().unwrap().name(), "presence");
///
/// let second = codec.decode(&mut buf).unwrap().unwrap();
/// assert_eq!(second.as_stanza().unwrap().child("body").unwrap().text(), "hi");
/// ```
#[derive(Debug, Clone)]
pub struct XmppCodec {
    max_stanza_size: usize,
}

impl XmppCodec {
    /// Create a codec with the default stanza size limit
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a codec with a custom stanza size limit
    pub fn with_max_stanza_size(max_stanza_size: usize) -> Self {
        Self { max_stanza_size }
    }

    /// The configured stanza size limit in bytes
    pub fn max_stanza_size(&self) -> usize {
        self.max_stanza_size
    }
}

impl Default for XmppCodec {
    fn default() -> Self {
        Self {
            max_stanza_size: DEFAULT_MAX_STANZA_SIZE,
        }
    }
}

/// Outcome of scanning the pending buffer
enum Scan {
    /// A complete frame spanning the first `usize` bytes
    Complete(XmppFrame, usize),
    /// More bytes are needed
    Incomplete,
}

/// Scan for a closing `</name>` tag at the front of `buf`.
///
/// quick-xml rejects an end tag it never saw opened, and the stream wrapper is
/// always opened in an earlier frame, so the footer is matched by hand.
fn scan_end_tag(buf: &[u8]) -> CodecResult<Scan> {
    let Some(close) = buf.iter().position(|&b| b == b'>') else {
        return Ok(Scan::Incomplete);
    };
    let name = std::str::from_utf8(&buf[2..close])?.trim();
    let local = name.rsplit(':').next().unwrap_or(name);
    if local == "stream" {
        Ok(Scan::Complete(XmppFrame::Footer, close + 1))
    } else {
        Err(CodecError::malformed(format!(
            "unexpected closing tag </{}> at stream level",
            name
        )))
    }
}

fn is_stream_tag(start: &BytesStart<'_>) -> bool {
    let name = start.name();
    name.as_ref() == STREAM_TAG.as_bytes() || name.local_name().as_ref() == b"stream"
}

/// Markup cut off by the end of the buffer, as opposed to markup that is
/// wrong no matter what follows.
fn is_truncated(error: SyntaxError, buf: &[u8]) -> bool {
    match error {
        // `<!` with nothing after it yet
        SyntaxError::InvalidBangMarkup => buf.ends_with(b"<!"),
        SyntaxError::UnclosedPIOrXmlDecl
        | SyntaxError::UnclosedComment
        | SyntaxError::UnclosedDoctype
        | SyntaxError::UnclosedCData
        | SyntaxError::UnclosedTag => true,
    }
}

/// Scan `buf` for the next complete top-level item.
fn scan(buf: &[u8]) -> CodecResult<Scan> {
    if buf.starts_with(b"</") {
        return scan_end_tag(buf);
    }

    let mut reader = Reader::from_reader(buf);
    reader.config_mut().trim_text(false);
    reader.config_mut().check_end_names = true;

    let mut stack: Vec<Element> = Vec::new();

    loop {
        let event = match reader.read_event() {
            Ok(event) => event,
            Err(quick_xml::Error::Syntax(error)) if is_truncated(error, buf) => {
                return Ok(Scan::Incomplete);
            }
            Err(e) => return Err(e.into()),
        };
        let position = reader.buffer_position() as usize;

        match event {
            Event::Decl(_) | Event::PI(_) | Event::Comment(_) | Event::DocType(_) => continue,
            Event::Start(start) => {
                if stack.is_empty() && is_stream_tag(&start) {
                    let header = StreamHeader::from_start(&start)?;
                    return Ok(Scan::Complete(XmppFrame::Header(header), position));
                }
                stack.push(Element::from_start(&start)?);
            }
            Event::Empty(start) => {
                if stack.is_empty() && is_stream_tag(&start) {
                    let header = StreamHeader::from_start(&start)?;
                    return Ok(Scan::Complete(XmppFrame::Header(header), position));
                }
                let element = Element::from_start(&start)?;
                match stack.last_mut() {
                    Some(parent) => parent.push_child(element),
                    None => return Ok(Scan::Complete(XmppFrame::Stanza(element), position)),
                }
            }
            Event::Text(text) => {
                // Text running to the end of the buffer may stop inside an entity
                if position >= buf.len() {
                    return Ok(Scan::Incomplete);
                }
                let text = text.unescape()?;
                match stack.last_mut() {
                    Some(current) => current.push_text(&text),
                    None if text.trim().is_empty() => {}
                    None => {
                        return Err(CodecError::malformed("character data outside of a stanza"));
                    }
                }
            }
            Event::CData(data) => {
                let text = std::str::from_utf8(&data)?;
                match stack.last_mut() {
                    Some(current) => current.push_text(text),
                    None => {
                        return Err(CodecError::malformed("CDATA outside of a stanza"));
                    }
                }
            }
            Event::End(_) => {
                // check_end_names guarantees this matches the top of the stack
                let Some(element) = stack.pop() else {
                    return Err(CodecError::malformed("unbalanced closing tag"));
                };
                match stack.last_mut() {
                    Some(parent) => parent.push_child(element),
                    None => return Ok(Scan::Complete(XmppFrame::Stanza(element), position)),
                }
            }
            Event::Eof => return Ok(Scan::Incomplete),
        }
    }
}

impl Decoder for XmppCodec {
    type Item = XmppFrame;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<XmppFrame>, Self::Error> {
        // Whitespace keep-alives between top-level items carry no meaning
        let leading = src
            .iter()
            .take_while(|b| b.is_ascii_whitespace())
            .count();
        src.advance(leading);

        if src.is_empty() {
            return Ok(None);
        }

        match scan(&src[..])? {
            Scan::Complete(frame, consumed) => {
                src.advance(consumed);
                trace!(consumed, "Decoded frame");
                Ok(Some(frame))
            }
            Scan::Incomplete if src.len() > self.max_stanza_size => {
                warn!(
                    pending = src.len(),
                    limit = self.max_stanza_size,
                    "Pending stanza exceeds size limit"
                );
                Err(CodecError::StanzaTooLarge {
                    limit: self.max_stanza_size,
                })
            }
            Scan::Incomplete => Ok(None),
        }
    }
}

impl Encoder<XmppFrame> for XmppCodec {
    type Error = CodecError;

    fn encode(&mut self, item: XmppFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let mut writer = Writer::new(Vec::new());
        match item {
            XmppFrame::Header(header) => {
                writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
                let mut start = BytesStart::new(STREAM_TAG);
                for (key, value) in header.attributes() {
                    start.push_attribute((key, value));
                }
                writer.write_event(Event::Start(start))?;
            }
            XmppFrame::Stanza(element) => element.write_to(&mut writer)?,
            XmppFrame::Footer => {
                writer.write_event(Event::End(BytesEnd::new(STREAM_TAG)))?;
            }
        }
        dst.extend_from_slice(&writer.into_inner());
        Ok(())
    }
}

impl Encoder<Element> for XmppCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Element, dst: &mut BytesMut) -> Result<(), Self::Error> {
        Encoder::<XmppFrame>::encode(self, XmppFrame::Stanza(item), dst)
    }
}
