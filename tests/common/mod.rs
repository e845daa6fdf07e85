//! In-memory STOMP client used by the integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use iridium_stomp_server::codec::{StompCodec, StompItem};
use iridium_stomp_server::{Command, Frame, ServerHandler, ServerOptions, serve};
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TestClient {
    framed: Framed<DuplexStream, StompCodec>,
}

/// Start a session for `handler` over a duplex pipe.
pub fn start(handler: &Arc<ServerHandler>) -> (TestClient, JoinHandle<iridium_stomp_server::Result<()>>) {
    let (client, server) = tokio::io::duplex(256 * 1024);
    let task = tokio::spawn(serve(server, handler.clone(), None));
    (
        TestClient {
            framed: Framed::new(client, StompCodec::new()),
        },
        task,
    )
}

pub fn handler(options: ServerOptions) -> Arc<ServerHandler> {
    Arc::new(ServerHandler::new(options))
}

pub fn connect_frame() -> Frame {
    Frame::new(Command::Connect)
        .header("accept-version", "1.2")
        .header("host", "/")
        .header("heart-beat", "0,0")
}

pub fn subscribe_frame(destination: &str, id: &str, ack: &str) -> Frame {
    Frame::new(Command::Subscribe)
        .header("destination", destination)
        .header("id", id)
        .header("ack", ack)
        .header("receipt", format!("sub-{}", id))
}

pub fn send_frame(destination: &str, body: &str) -> Frame {
    Frame::new(Command::Send)
        .header("destination", destination)
        .set_body(body.as_bytes().to_vec())
}

impl TestClient {
    pub async fn send(&mut self, frame: Frame) {
        self.framed
            .send(StompItem::Frame(frame))
            .await
            .expect("client send failed");
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        let io = self.framed.get_mut();
        io.write_all(bytes).await.expect("client write failed");
        io.flush().await.expect("client flush failed");
    }

    /// Next item, or `None` once the server closed the pipe.
    pub async fn recv_item(&mut self) -> Option<StompItem> {
        match tokio::time::timeout(RECV_TIMEOUT, self.framed.next()).await {
            Ok(Some(Ok(item))) => Some(item),
            Ok(Some(Err(e))) => panic!("client decode error: {}", e),
            Ok(None) => None,
            Err(_) => panic!("timed out waiting for the server"),
        }
    }

    /// Next frame, skipping heartbeats.
    pub async fn recv(&mut self) -> Option<Frame> {
        loop {
            match self.recv_item().await? {
                StompItem::Frame(frame) => return Some(frame),
                StompItem::Heartbeat => continue,
            }
        }
    }

    pub async fn expect(&mut self, command: Command) -> Frame {
        match self.recv().await {
            Some(frame) if frame.command == command => frame,
            other => panic!("expected {}, got {:?}", command, other),
        }
    }

    pub async fn expect_receipt(&mut self, id: &str) {
        let frame = self.expect(Command::Receipt).await;
        assert_eq!(frame.get_header("receipt-id"), Some(id));
    }

    /// Read until the server closes, failing on any further frame.
    pub async fn expect_closed(&mut self) {
        while let Some(item) = self.recv_item().await {
            if let StompItem::Frame(frame) = item {
                panic!("expected close, got {:?}", frame);
            }
        }
    }

    /// CONNECT with heartbeats disabled and return the CONNECTED frame.
    pub async fn connect(&mut self) -> Frame {
        self.send(connect_frame()).await;
        self.expect(Command::Connected).await
    }

    pub async fn subscribe(&mut self, destination: &str, id: &str, ack: &str) {
        self.send(subscribe_frame(destination, id, ack)).await;
        self.expect_receipt(&format!("sub-{}", id)).await;
    }
}
