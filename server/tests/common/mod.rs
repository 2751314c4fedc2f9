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

//! Raw-protocol test client shared by the integration tests

#![allow(dead_code)]

use base64::{Engine as _, engine::general_purpose};
use futures::{SinkExt, StreamExt};
use jabbernest_codec::{Element, StreamHeader, XmppCodec, XmppFrame};
use jabbernest_server::protocol::{NS_BIND, NS_SASL};
use jabbernest_server::{ServerConfig, ServerConfigBuilder, XmppServer};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

/// How long a test waits for any single frame
pub const RECV_TIMEOUT: Duration = Duration::from_secs(3);

/// Pick a port that is free right now
pub fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Config with alice and bob, a short idle tick and a short grace period
pub fn test_config() -> ServerConfigBuilder {
    ServerConfig::builder()
        .port(free_port())
        .socket_timeout(Duration::from_millis(100))
        .shutdown_timeout(Duration::from_millis(500))
        .add_user("alice", "password123")
        .add_user("bob", "password456")
}

/// Build and start a server
pub async fn start_server(config: ServerConfig) -> XmppServer {
    let server = XmppServer::new(config);
    server.start().await.unwrap();
    server
}

/// Wait until `condition` holds or fail after two seconds
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}

/// A client that speaks frames instead of bytes
pub struct TestClient {
    framed: Framed<TcpStream, XmppCodec>,
}

impl TestClient {
    /// Connect without sending anything
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        Self {
            framed: Framed::new(stream, XmppCodec::new()),
        }
    }

    /// Connect, authenticate, restart the stream and bind
    ///
    /// Returns the client and the bound full address.
    pub async fn login(
        addr: SocketAddr,
        username: &str,
        password: &str,
        resource: Option<&str>,
    ) -> (Self, String) {
        let mut client = Self::connect(addr).await;
        client.open_stream().await;
        let reply = client.authenticate(username, password).await;
        assert_eq!(reply.local_name(), "success", "login failed: {}", reply);
        client.open_stream().await;
        let reply = client.bind(resource).await;
        let jid = reply
            .child_ns("bind", NS_BIND)
            .and_then(|b| b.child("jid"))
            .map(|j| j.text().to_string())
            .unwrap_or_else(|| panic!("bind failed: {}", reply));
        (client, jid)
    }

    /// Write a raw byte string
    pub async fn send_raw(&mut self, bytes: &[u8]) {
        use tokio::io::AsyncWriteExt;
        self.framed.get_mut().write_all(bytes).await.unwrap();
    }

    /// Write one frame
    pub async fn send(&mut self, frame: impl Into<XmppFrame>) {
        let frame: XmppFrame = frame.into();
        self.framed.send(frame).await.unwrap();
    }

    /// Next frame, or `None` once the server has closed the socket
    pub async fn recv(&mut self) -> Option<XmppFrame> {
        match tokio::time::timeout(RECV_TIMEOUT, self.framed.next()).await {
            Ok(Some(Ok(frame))) => Some(frame),
            Ok(Some(Err(_))) | Ok(None) => None,
            Err(_) => panic!("timed out waiting for a frame"),
        }
    }

    /// Next frame, which must be a stanza
    pub async fn recv_stanza(&mut self) -> Element {
        match self.recv().await {
            Some(XmppFrame::Stanza(element)) => element,
            other => panic!("expected a stanza, got {:?}", other),
        }
    }

    /// Send a stream header and return the advertised features
    pub async fn open_stream(&mut self) -> Element {
        self.send(StreamHeader::client("localhost")).await;
        match self.recv().await {
            Some(XmppFrame::Header(_)) => {}
            other => panic!("expected a stream header, got {:?}", other),
        }
        let features = self.recv_stanza().await;
        assert_eq!(features.name(), "stream:features");
        features
    }

    /// SASL PLAIN; returns `<success/>` or `<failure/>`
    pub async fn authenticate(&mut self, username: &str, password: &str) -> Element {
        let payload = general_purpose::STANDARD.encode(format!("\0{}\0{}", username, password));
        self.send(
            Element::new("auth")
                .with_attr("xmlns", NS_SASL)
                .with_attr("mechanism", "PLAIN")
                .with_text(payload),
        )
        .await;
        self.recv_stanza().await
    }

    /// Bind a resource; returns the `<iq>` reply
    pub async fn bind(&mut self, resource: Option<&str>) -> Element {
        let mut bind = Element::new("bind").with_attr("xmlns", NS_BIND);
        if let Some(resource) = resource {
            bind.push_child(Element::new("resource").with_text(resource));
        }
        self.send(
            Element::new("iq")
                .with_attr("type", "set")
                .with_attr("id", "bind_1")
                .with_child(bind),
        )
        .await;
        self.recv_stanza().await
    }

    /// Send a chat message
    pub async fn send_message(&mut self, to: &str, body: &str) {
        self.send(
            Element::new("message")
                .with_attr("to", to)
                .with_attr("type", "chat")
                .with_child(Element::new("body").with_text(body)),
        )
        .await;
    }

    /// Send `</stream:stream>`
    pub async fn close_stream(&mut self) {
        self.send(XmppFrame::Footer).await;
    }

    /// Read until the server closes the socket; returns what arrived first
    pub async fn drain_until_closed(&mut self) -> Vec<XmppFrame> {
        let mut frames = Vec::new();
        while let Some(frame) = self.recv().await {
            frames.push(frame);
        }
        frames
    }
}
