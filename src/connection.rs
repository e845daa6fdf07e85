use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::codec::StompItem;
use crate::error::StompError;
use crate::frame::{Command, Frame, headers};
use crate::handler::ServerHandler;
use crate::heartbeat::NegotiatedHeartbeat;
use crate::subscription::Subscriptions;
use crate::transaction::Transactions;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Items consumed by a connection's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Encode and write this item.
    Item(StompItem),
    /// Flush, close the transport and stop.
    Close,
}

/// Cloneable sender side of a connection's outbound channel.
///
/// Subscriptions keep one of these rather than the connection itself, so a
/// destination never keeps a dead connection alive.
#[derive(Debug, Clone)]
pub struct FrameWriter {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl FrameWriter {
    pub fn new(tx: mpsc::UnboundedSender<Outbound>) -> Self {
        Self { tx }
    }

    /// Queue `item` for writing. Returns `false` once the writer has gone
    /// away.
    pub fn write(&self, item: StompItem) -> bool {
        self.tx.send(Outbound::Item(item)).is_ok()
    }

    pub(crate) fn close(&self) {
        let _ = self.tx.send(Outbound::Close);
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Protocol state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    AwaitingConnect,
    Connected,
    Closed,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ConnectionState::AwaitingConnect,
            1 => ConnectionState::Connected,
            _ => ConnectionState::Closed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            ConnectionState::AwaitingConnect => 0,
            ConnectionState::Connected => 1,
            ConnectionState::Closed => 2,
        }
    }
}

/// Why a connection was closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The client sent DISCONNECT.
    Disconnect,
    /// A fatal protocol error; the ERROR frame has already been queued.
    Protocol(String),
    /// No inbound activity within the tolerated window.
    HeartbeatTimeout(Duration),
    /// The transport reached EOF or failed.
    Transport,
    /// The server is shutting down.
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Disconnect => f.write_str("disconnect"),
            CloseReason::Protocol(reason) => write!(f, "protocol error: {}", reason),
            CloseReason::HeartbeatTimeout(idle) => write!(f, "heartbeat timeout after {:?}", idle),
            CloseReason::Transport => f.write_str("transport closed"),
            CloseReason::Shutdown => f.write_str("server shutdown"),
        }
    }
}

/// Last inbound and outbound activity, as millisecond offsets from the
/// connection's creation. Uses the tokio clock so paused-time tests see
/// consistent values.
#[derive(Debug)]
struct ActivityClock {
    origin: Instant,
    inbound: AtomicU64,
    outbound: AtomicU64,
}

impl ActivityClock {
    fn new() -> Self {
        Self {
            origin: Instant::now(),
            inbound: AtomicU64::new(0),
            outbound: AtomicU64::new(0),
        }
    }

    fn now(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    fn touch_inbound(&self) {
        self.inbound.store(self.now(), Ordering::SeqCst);
    }

    fn touch_outbound(&self) {
        self.outbound.store(self.now(), Ordering::SeqCst);
    }

    fn inbound_idle(&self) -> Duration {
        Duration::from_millis(self.now().saturating_sub(self.inbound.load(Ordering::SeqCst)))
    }

    fn outbound_idle(&self) -> Duration {
        Duration::from_millis(self.now().saturating_sub(self.outbound.load(Ordering::SeqCst)))
    }
}

struct Inner {
    id: u64,
    peer: Option<SocketAddr>,
    handler: Arc<ServerHandler>,
    writer: FrameWriter,
    state: AtomicU8,
    connect_seen: AtomicBool,
    closed: AtomicBool,
    session: OnceLock<String>,
    version: OnceLock<String>,
    login: OnceLock<String>,
    heartbeat: Mutex<NegotiatedHeartbeat>,
    activity: ActivityClock,
    timers: Mutex<Vec<JoinHandle<()>>>,
    subscriptions: Subscriptions,
    transactions: Transactions,
    cancel: CancellationToken,
}

/// Server-side handle to one client connection.
///
/// Cloning is cheap; every clone refers to the same session. All writes go
/// through a single outbound channel drained by the connection's writer task
/// (see [`crate::session`]), so frames reach the wire in the order they were
/// written.
#[derive(Clone)]
pub struct ServerConnection {
    inner: Arc<Inner>,
}

impl fmt::Debug for ServerConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConnection")
            .field("id", &self.inner.id)
            .field("peer", &self.inner.peer)
            .field("session", &self.session())
            .field("state", &self.state())
            .finish()
    }
}

impl ServerConnection {
    /// Create a connection whose outbound items are delivered to the returned
    /// receiver. The caller owns the transport side.
    pub fn channel(
        handler: Arc<ServerHandler>,
        peer: Option<SocketAddr>,
    ) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        Self::channel_with_token(handler, peer, CancellationToken::new())
    }

    /// Like [`ServerConnection::channel`], cancelling `cancel` when the
    /// connection closes. Pass a child token to tie the connection to a
    /// wider shutdown.
    pub fn channel_with_token(
        handler: Arc<ServerHandler>,
        peer: Option<SocketAddr>,
        cancel: CancellationToken,
    ) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let inner = Inner {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            peer,
            handler,
            writer: FrameWriter::new(tx),
            state: AtomicU8::new(ConnectionState::AwaitingConnect.as_u8()),
            connect_seen: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            session: OnceLock::new(),
            version: OnceLock::new(),
            login: OnceLock::new(),
            heartbeat: Mutex::new(NegotiatedHeartbeat::default()),
            activity: ActivityClock::new(),
            timers: Mutex::new(Vec::new()),
            subscriptions: Subscriptions::new(),
            transactions: Transactions::new(),
            cancel,
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            rx,
        )
    }

    /// Process-unique id assigned at accept.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.inner.peer
    }

    /// Session id sent in the CONNECTED frame, once connected.
    pub fn session(&self) -> Option<&str> {
        self.inner.session.get().map(String::as_str)
    }

    /// Negotiated protocol version, once connected.
    pub fn version(&self) -> Option<&str> {
        self.inner.version.get().map(String::as_str)
    }

    /// Login of the authenticated user, if any.
    pub fn login(&self) -> Option<&str> {
        self.inner.login.get().map(String::as_str)
    }

    pub(crate) fn set_login(&self, login: &str) {
        let _ = self.inner.login.set(login.to_string());
    }

    pub fn handler(&self) -> &Arc<ServerHandler> {
        &self.inner.handler
    }

    pub fn writer(&self) -> &FrameWriter {
        &self.inner.writer
    }

    pub fn subscriptions(&self) -> &Subscriptions {
        &self.inner.subscriptions
    }

    pub fn transactions(&self) -> &Transactions {
        &self.inner.transactions
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Record a CONNECT/STOMP frame. Returns `true` if one was already seen.
    pub(crate) fn mark_connect_seen(&self) -> bool {
        self.inner.connect_seen.swap(true, Ordering::AcqRel)
    }

    /// Token cancelled when the connection closes.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// Negotiated heartbeat intervals (both disabled before CONNECT).
    pub fn heartbeat(&self) -> NegotiatedHeartbeat {
        *self.inner.heartbeat.lock()
    }

    /// Queue `frame` for writing.
    ///
    /// Writing a CONNECTED frame moves the connection to
    /// [`ConnectionState::Connected`] and records its `session` and
    /// `version` headers. Returns `false` if the connection is closed.
    pub fn write(&self, frame: Frame) -> bool {
        if self.is_closed() {
            return false;
        }
        if frame.command == Command::Connected {
            if let Some(session) = frame.get_header(headers::SESSION) {
                let _ = self.inner.session.set(session.to_string());
            }
            if let Some(version) = frame.get_header(headers::VERSION) {
                let _ = self.inner.version.set(version.to_string());
            }
            let _ = self.inner.state.compare_exchange(
                ConnectionState::AwaitingConnect.as_u8(),
                ConnectionState::Connected.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }
        self.inner.writer.write(StompItem::Frame(frame))
    }

    /// Queue a single heartbeat EOL.
    pub fn ping(&self) -> bool {
        if self.is_closed() {
            return false;
        }
        self.inner.writer.write(StompItem::Heartbeat)
    }

    /// Record inbound activity (any frame or heartbeat byte).
    pub fn touch_inbound(&self) {
        self.inner.activity.touch_inbound();
    }

    /// Record outbound activity; called by the writer after each write.
    pub fn touch_outbound(&self) {
        self.inner.activity.touch_outbound();
    }

    pub fn inbound_idle(&self) -> Duration {
        self.inner.activity.inbound_idle()
    }

    pub fn outbound_idle(&self) -> Duration {
        self.inner.activity.outbound_idle()
    }

    /// Arm the heartbeat timers for `negotiated`.
    ///
    /// The ping timer asks the handler to ping whenever nothing was written
    /// for a full `ping` interval. The watchdog checks every `pong / 2` and
    /// closes the connection once inbound idle time exceeds
    /// `pong * heartbeat_tolerance`. Previously armed timers are replaced.
    pub fn configure_heartbeat(&self, negotiated: NegotiatedHeartbeat) {
        *self.inner.heartbeat.lock() = negotiated;
        let mut timers = self.inner.timers.lock();
        for timer in timers.drain(..) {
            timer.abort();
        }
        if self.is_closed() {
            return;
        }
        self.touch_inbound();

        if let Some(ping) = negotiated.ping {
            let weak = Arc::downgrade(&self.inner);
            timers.push(tokio::spawn(ping_loop(weak, ping)));
        }
        if let Some(pong) = negotiated.pong {
            let tolerance = self.inner.handler.options().heartbeat_tolerance.max(1);
            let weak = Arc::downgrade(&self.inner);
            timers.push(tokio::spawn(watchdog_loop(weak, pong, pong * tolerance)));
        }
    }

    /// Close the connection.
    ///
    /// The first call runs the close cascade: heartbeat timers are disarmed,
    /// the handler drops the connection's subscriptions and transactions and
    /// runs its close hook, then the writer is told to flush and close the
    /// transport. Later calls do nothing.
    pub fn close(&self, reason: CloseReason) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner
            .state
            .store(ConnectionState::Closed.as_u8(), Ordering::Release);
        match &reason {
            CloseReason::Disconnect | CloseReason::Transport | CloseReason::Shutdown => {
                tracing::debug!(connection = self.id(), session = ?self.session(), %reason, "closing connection");
            }
            CloseReason::Protocol(_) | CloseReason::HeartbeatTimeout(_) => {
                tracing::warn!(connection = self.id(), session = ?self.session(), %reason, "closing connection");
            }
        }

        for timer in self.inner.timers.lock().drain(..) {
            timer.abort();
        }
        self.inner.handler.on_close(self);
        self.inner.writer.close();
        self.inner.cancel.cancel();
    }
}

async fn ping_loop(weak: Weak<Inner>, ping: Duration) {
    let mut wait = ping;
    loop {
        tokio::time::sleep(wait.max(Duration::from_millis(1))).await;
        let Some(inner) = weak.upgrade() else { return };
        let conn = ServerConnection { inner };
        if conn.is_closed() {
            return;
        }
        // re-arm from the last write so the wire is never silent longer
        // than one interval
        let idle = conn.outbound_idle();
        if idle >= ping {
            conn.handler().ping(&conn);
            wait = ping;
        } else {
            wait = ping - idle;
        }
    }
}

async fn watchdog_loop(weak: Weak<Inner>, pong: Duration, limit: Duration) {
    let check = (pong / 2).max(Duration::from_millis(1));
    loop {
        tokio::time::sleep(check).await;
        let Some(inner) = weak.upgrade() else { return };
        let conn = ServerConnection { inner };
        if conn.is_closed() {
            return;
        }
        let idle = conn.inbound_idle();
        if idle > limit {
            tracing::warn!(
                connection = conn.id(),
                session = ?conn.session(),
                idle_ms = idle.as_millis() as u64,
                "no heartbeat from client"
            );
            let err = StompError::HeartbeatTimeout(idle);
            conn.write(Frame::error("Heartbeat timeout", err.to_string()));
            conn.close(CloseReason::HeartbeatTimeout(idle));
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerOptions;
    use crate::heartbeat::Heartbeat;
    use std::sync::atomic::AtomicUsize;

    fn handler() -> Arc<ServerHandler> {
        Arc::new(ServerHandler::new(ServerOptions::default()))
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<Outbound> {
        let mut out = Vec::new();
        while let Ok(item) = rx.try_recv() {
            out.push(item);
        }
        out
    }

    #[test]
    fn connected_frame_moves_state() {
        let (conn, mut rx) = ServerConnection::channel(handler(), None);
        assert_eq!(conn.state(), ConnectionState::AwaitingConnect);
        assert!(conn.write(
            Frame::new(Command::Connected)
                .header("version", "1.2")
                .header("session", "abc")
        ));
        assert_eq!(conn.state(), ConnectionState::Connected);
        assert_eq!(conn.session(), Some("abc"));
        assert_eq!(conn.version(), Some("1.2"));
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[test]
    fn close_is_idempotent() {
        let closes = Arc::new(AtomicUsize::new(0));
        let counter = closes.clone();
        let handler = Arc::new(
            ServerHandler::new(ServerOptions::default()).with_close_hook(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let (conn, mut rx) = ServerConnection::channel(handler, None);
        let token = conn.cancellation_token();
        conn.close(CloseReason::Disconnect);
        conn.close(CloseReason::Transport);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(token.is_cancelled());
        assert_eq!(drain(&mut rx), vec![Outbound::Close]);
        assert!(!conn.write(Frame::ping()));
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_closes_silent_connection() {
        let (conn, _rx) = ServerConnection::channel(handler(), None);
        conn.configure_heartbeat(NegotiatedHeartbeat::negotiate(
            Heartbeat::new(1000, 0),
            Heartbeat::new(0, 1000),
        ));
        tokio::time::sleep(Duration::from_millis(1900)).await;
        assert!(!conn.is_closed());
        tokio::time::sleep(Duration::from_millis(700)).await;
        assert!(conn.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn inbound_activity_keeps_connection_alive() {
        let (conn, _rx) = ServerConnection::channel(handler(), None);
        conn.configure_heartbeat(NegotiatedHeartbeat::negotiate(
            Heartbeat::new(1000, 0),
            Heartbeat::new(0, 1000),
        ));
        for _ in 0..10 {
            tokio::time::sleep(Duration::from_millis(900)).await;
            conn.touch_inbound();
        }
        assert!(!conn.is_closed());
        conn.close(CloseReason::Disconnect);
    }

    #[tokio::test(start_paused = true)]
    async fn ping_loop_writes_heartbeats_when_idle() {
        let (conn, mut rx) = ServerConnection::channel(handler(), None);
        conn.configure_heartbeat(NegotiatedHeartbeat::negotiate(
            Heartbeat::new(0, 500),
            Heartbeat::new(500, 0),
        ));
        tokio::time::sleep(Duration::from_millis(1600)).await;
        let pings = drain(&mut rx)
            .into_iter()
            .filter(|o| *o == Outbound::Item(StompItem::Heartbeat))
            .count();
        assert!(pings >= 2, "expected pings, got {}", pings);
        conn.close(CloseReason::Disconnect);
    }

    #[tokio::test(start_paused = true)]
    async fn ping_hook_replaces_default_ping() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let handler = Arc::new(
            ServerHandler::new(ServerOptions::default()).with_ping_hook(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let (conn, mut rx) = ServerConnection::channel(handler, None);
        conn.configure_heartbeat(NegotiatedHeartbeat::negotiate(
            Heartbeat::new(0, 500),
            Heartbeat::new(500, 0),
        ));
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(calls.load(Ordering::SeqCst) >= 2);
        assert!(drain(&mut rx).is_empty());
        conn.close(CloseReason::Disconnect);
    }

    #[tokio::test(start_paused = true)]
    async fn ping_follows_last_write() {
        let (conn, mut rx) = ServerConnection::channel(handler(), None);
        conn.configure_heartbeat(NegotiatedHeartbeat::negotiate(
            Heartbeat::new(0, 1000),
            Heartbeat::new(1000, 0),
        ));
        tokio::time::sleep(Duration::from_millis(500)).await;
        conn.touch_outbound();
        let written = Instant::now();
        loop {
            match rx.recv().await {
                Some(Outbound::Item(StompItem::Heartbeat)) => break,
                Some(_) => continue,
                None => panic!("writer channel closed"),
            }
        }
        let gap = written.elapsed();
        assert!(gap <= Duration::from_millis(1000), "silent for {:?}", gap);
        assert!(gap >= Duration::from_millis(900), "pinged too early: {:?}", gap);
        conn.close(CloseReason::Disconnect);
    }
}
