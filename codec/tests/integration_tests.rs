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

//! Integration tests for the XML stream codec
//!
//! These tests drive the codec through `FramedRead`/`FramedWrite` over an
//! in-memory duplex pipe, the way the server uses it.

use bytes::BytesMut;
use futures::{SinkExt, StreamExt};
use jabbernest_codec::{CodecError, Element, StreamHeader, XmppCodec, XmppFrame};
use tokio::io::AsyncWriteExt;
use tokio_util::codec::{Decoder, Encoder, FramedRead, FramedWrite};

// ============================================================================
// Helper Functions
// ============================================================================

fn encode_frames(codec: &mut XmppCodec, frames: Vec<XmppFrame>) -> BytesMut {
    let mut buffer = BytesMut::new();
    for frame in frames {
        codec.encode(frame, &mut buffer).unwrap();
    }
    buffer
}

fn decode_all(codec: &mut XmppCodec, buffer: &mut BytesMut) -> Vec<XmppFrame> {
    let mut frames = Vec::new();
    while let Some(frame) = codec.decode(buffer).unwrap() {
        frames.push(frame);
    }
    frames
}

fn chat(to: &str, body: &str) -> Element {
    Element::new("message")
        .with_attr("to", to)
        .with_attr("type", "chat")
        .with_child(Element::new("body").with_text(body))
}

// ============================================================================
// Session Transcript Tests
// ============================================================================

#[test]
fn full_client_transcript_decodes_in_order() {
    let mut client = XmppCodec::new();
    let mut server = XmppCodec::new();

    let mut wire = encode_frames(
        &mut client,
        vec![
            StreamHeader::client("localhost").into(),
            Element::new("auth")
                .with_attr("xmlns", "urn:ietf:params:xml:ns:xmpp-sasl")
                .with_attr("mechanism", "PLAIN")
                .with_text("AGFsaWNlAHBhc3N3b3JkMTIz")
                .into(),
            chat("bob@localhost", "Hello Bob").into(),
            XmppFrame::Footer,
        ],
    );

    let frames = decode_all(&mut server, &mut wire);
    assert_eq!(frames.len(), 4);
    assert!(matches!(frames[0], XmppFrame::Header(_)));
    assert_eq!(frames[1].as_stanza().unwrap().local_name(), "auth");
    assert_eq!(frames[2].as_stanza().unwrap(), &chat("bob@localhost", "Hello Bob"));
    assert_eq!(frames[3], XmppFrame::Footer);
    assert!(wire.is_empty());
}

#[test]
fn byte_at_a_time_delivery() {
    let mut client = XmppCodec::new();
    let mut server = XmppCodec::new();
    let wire = encode_frames(
        &mut client,
        vec![
            StreamHeader::client("localhost").into(),
            chat("bob@localhost", "fragmented & escaped").into(),
        ],
    );

    let mut pending = BytesMut::new();
    let mut frames = Vec::new();
    for byte in wire.iter() {
        pending.extend_from_slice(&[*byte]);
        while let Some(frame) = server.decode(&mut pending).unwrap() {
            frames.push(frame);
        }
    }

    assert_eq!(frames.len(), 2);
    assert_eq!(
        frames[1].as_stanza().unwrap().child("body").unwrap().text(),
        "fragmented & escaped"
    );
}

#[test]
fn whitespace_keepalives_are_ignored() {
    let mut codec = XmppCodec::new();
    let mut buffer = BytesMut::from(&b" \n<presence/>\n \n<presence type='unavailable'/>\n"[..]);
    let frames = decode_all(&mut codec, &mut buffer);
    assert_eq!(frames.len(), 2);
    assert_eq!(
        frames[1].as_stanza().unwrap().attr("type"),
        Some("unavailable")
    );
}

#[test]
fn prefixed_stream_features_survive() {
    let mut codec = XmppCodec::new();
    let mut buffer = BytesMut::from(
        &b"<stream:features><mechanisms xmlns='urn:ietf:params:xml:ns:xmpp-sasl'>\
           <mechanism>PLAIN</mechanism></mechanisms></stream:features>"[..],
    );
    let frames = decode_all(&mut codec, &mut buffer);
    let features = frames[0].as_stanza().unwrap();
    assert_eq!(features.name(), "stream:features");
    assert_eq!(features.local_name(), "features");
    let mechanisms = features
        .child_ns("mechanisms", "urn:ietf:params:xml:ns:xmpp-sasl")
        .unwrap();
    assert_eq!(mechanisms.child("mechanism").unwrap().text(), "PLAIN");
}

// ============================================================================
// Framed I/O Tests
// ============================================================================

#[tokio::test]
async fn framed_split_pipe() {
    let (client_io, server_io) = tokio::io::duplex(64);
    let mut writer = FramedWrite::new(client_io, XmppCodec::new());
    let mut reader = FramedRead::new(server_io, XmppCodec::new());

    let send = tokio::spawn(async move {
        writer
            .send(XmppFrame::Header(StreamHeader::client("localhost")))
            .await
            .unwrap();
        writer
            .send(chat("bob@localhost", &"x".repeat(500)))
            .await
            .unwrap();
        writer.send(XmppFrame::Footer).await.unwrap();
    });

    let mut frames = Vec::new();
    while let Some(frame) = reader.next().await {
        frames.push(frame.unwrap());
    }
    send.await.unwrap();

    assert_eq!(frames.len(), 3);
    assert_eq!(
        frames[1].as_stanza().unwrap().child("body").unwrap().text().len(),
        500
    );
}

#[tokio::test]
async fn framed_reports_malformed_input() {
    let (mut client_io, server_io) = tokio::io::duplex(64);
    let mut reader = FramedRead::new(server_io, XmppCodec::new());

    client_io.write_all(b"<message><body></message>").await.unwrap();
    drop(client_io);

    let result = reader.next().await.unwrap();
    assert!(matches!(result, Err(CodecError::Xml(_))));
}

#[tokio::test]
async fn framed_enforces_size_limit() {
    let (mut client_io, server_io) = tokio::io::duplex(4096);
    let mut reader = FramedRead::new(server_io, XmppCodec::with_max_stanza_size(128));

    client_io.write_all(b"<message><body>").await.unwrap();
    client_io.write_all(&[b'a'; 256]).await.unwrap();

    let result = reader.next().await.unwrap();
    assert!(matches!(
        result,
        Err(CodecError::StanzaTooLarge { limit: 128 })
    ));
}
