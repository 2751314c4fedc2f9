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

//! # Jabbernest XML Stream Codec
//!
//! This crate frames an XMPP client connection into discrete units for use with
//! `tokio_util::codec`. An XMPP session is a single long-lived XML document: the
//! `<stream:stream>` wrapper opens once, stanzas follow as its children, and
//! the closing tag ends the session. A general XML parser would wait for the
//! whole document, so this codec splits it at the top level instead.
//!
//! ## Core Components
//!
//! ### [`XmppCodec`]
//!
//! Implements both [`Decoder`](tokio_util::codec::Decoder) and
//! [`Encoder`](tokio_util::codec::Encoder). Decoding is incremental and
//! never consumes a partial stanza, and a configurable limit guards against
//! unbounded buffering.
//!
//! ### [`XmppFrame`]
//!
//! One of:
//! - [`XmppFrame::Header`]: the opening `<stream:stream ...>` tag
//! - [`XmppFrame::Stanza`]: a complete top-level [`Element`]
//! - [`XmppFrame::Footer`]: the closing `</stream:stream>` tag
//!
//! ### [`Element`]
//!
//! An owned element tree with attribute, child and text accessors plus builder
//! methods for constructing replies.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use futures::{SinkExt, StreamExt};
//! use jabbernest_codec::{StreamHeader, XmppCodec, XmppFrame};
//! use tokio::net::TcpStream;
//! use tokio_util::codec::Framed;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let socket = TcpStream::connect("127.0.0.1:5222").await?;
//! let mut framed = Framed::new(socket, XmppCodec::new());
//!
//! framed.send(XmppFrame::Header(StreamHeader::client("localhost"))).await?;
//! while let Some(frame) = framed.next().await {
//!     match frame? {
//!         XmppFrame::Header(header) => println!("stream id {:?}", header.id()),
//!         XmppFrame::Stanza(stanza) => println!("received {}", stanza),
//!         XmppFrame::Footer => break,
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs, future_incompatible, rust_2018_idioms)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]

mod codec;
mod element;
mod frame;
mod result;

pub use self::codec::{DEFAULT_MAX_STANZA_SIZE, XmppCodec};
pub use self::element::Element;
pub use self::frame::{NS_CLIENT, NS_STREAM, STREAM_TAG, StreamHeader, XmppFrame};
pub use self::result::{CodecError, CodecResult};
