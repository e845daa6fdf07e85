use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

use crate::auth::AuthenticationProvider;
use crate::config::ServerOptions;
use crate::connection::{CloseReason, ServerConnection};
use crate::destination::DestinationFactory;
use crate::error::{Result, StompError};
use crate::frame::{Command, Frame, headers};
use crate::heartbeat::{Heartbeat, NegotiatedHeartbeat};
use crate::registry::DestinationRegistry;
use crate::subscription::{AckMode, Acknowledgement, Subscription};

/// Hook invoked with an inbound frame and its connection.
pub type FrameHook = Arc<dyn Fn(&Frame, &ServerConnection) + Send + Sync>;
/// Hook invoked with a connection (close, ping).
pub type ConnectionHook = Arc<dyn Fn(&ServerConnection) + Send + Sync>;
/// Callback receiving the outcome of an ACK or NACK.
pub type AckHook = Arc<dyn Fn(&Acknowledgement) + Send + Sync>;

/// Commands a hook may replace.
const HOOKABLE: &[Command] = &[
    Command::Connect,
    Command::Stomp,
    Command::Send,
    Command::Subscribe,
    Command::Unsubscribe,
    Command::Begin,
    Command::Commit,
    Command::Abort,
    Command::Ack,
    Command::Nack,
    Command::Disconnect,
];

/// Frame dispatcher and broker state shared by every connection of a server.
///
/// Built once with the `with_*` methods and then shared behind an `Arc`.
/// [`ServerHandler::handle`] runs the hook registered for a command instead
/// of the built-in behavior when there is one.
pub struct ServerHandler {
    options: ServerOptions,
    registry: DestinationRegistry,
    hooks: HashMap<Command, FrameHook>,
    received_frame_hook: Option<FrameHook>,
    close_hook: Option<ConnectionHook>,
    ping_hook: Option<ConnectionHook>,
    on_ack: AckHook,
    on_nack: AckHook,
    auth: Option<Arc<dyn AuthenticationProvider>>,
}

impl fmt::Debug for ServerHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerHandler")
            .field("options", &self.options)
            .field("registry", &self.registry)
            .field("hooks", &self.hooks.keys().collect::<Vec<_>>())
            .field("secured", &self.auth.is_some())
            .finish()
    }
}

impl Default for ServerHandler {
    fn default() -> Self {
        Self::new(ServerOptions::default())
    }
}

fn default_on_ack(ack: &Acknowledgement) {
    tracing::info!(
        subscription = ack.subscription.id(),
        destination = ack.subscription.destination(),
        messages = ack.frames.len(),
        "messages acknowledged"
    );
}

fn default_on_nack(ack: &Acknowledgement) {
    tracing::warn!(
        subscription = ack.subscription.id(),
        destination = ack.subscription.destination(),
        messages = ack.frames.len(),
        "messages not acknowledged"
    );
}

fn require<'a>(frame: &'a Frame, name: &str) -> Result<&'a str> {
    frame.get_header(name).ok_or_else(|| {
        StompError::Protocol(format!("{} frame without '{}' header", frame.command, name))
    })
}

/// ERROR frame reporting `err` for the offending frame `cause`.
fn error_frame(cause: &Frame, err: &StompError) -> Frame {
    match err {
        StompError::AuthenticationRejected(_) => Frame::error_for(
            cause,
            "Authentication failed",
            "The CONNECT frame does not contain valid credentials",
        ),
        StompError::Protocol(message) => {
            Frame::error_for(cause, message.as_str(), format!("Offending frame: {}", cause))
        }
        other => Frame::error_for(cause, other.to_string(), format!("Offending frame: {}", cause)),
    }
}

impl ServerHandler {
    pub fn new(options: ServerOptions) -> Self {
        Self {
            options,
            registry: DestinationRegistry::default(),
            hooks: HashMap::new(),
            received_frame_hook: None,
            close_hook: None,
            ping_hook: None,
            on_ack: Arc::new(default_on_ack),
            on_nack: Arc::new(default_on_nack),
            auth: None,
        }
    }

    /// Replace the built-in behavior for `command`.
    ///
    /// Only client commands can be hooked; a hook registered for any other
    /// command is ignored. A CONNECT/STOMP hook completes the handshake by
    /// writing a CONNECTED frame itself.
    pub fn with_hook<F>(mut self, command: Command, hook: F) -> Self
    where
        F: Fn(&Frame, &ServerConnection) + Send + Sync + 'static,
    {
        if HOOKABLE.contains(&command) {
            self.hooks.insert(command, Arc::new(hook));
        } else {
            tracing::warn!(%command, "ignoring hook for a command clients never send");
        }
        self
    }

    /// Observe every inbound frame before it is dispatched.
    pub fn with_received_frame_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Frame, &ServerConnection) + Send + Sync + 'static,
    {
        self.received_frame_hook = Some(Arc::new(hook));
        self
    }

    pub fn with_close_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ServerConnection) + Send + Sync + 'static,
    {
        self.close_hook = Some(Arc::new(hook));
        self
    }

    /// Replace the default ping (a single EOL).
    pub fn with_ping_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ServerConnection) + Send + Sync + 'static,
    {
        self.ping_hook = Some(Arc::new(hook));
        self
    }

    pub fn with_on_ack<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Acknowledgement) + Send + Sync + 'static,
    {
        self.on_ack = Arc::new(hook);
        self
    }

    pub fn with_on_nack<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Acknowledgement) + Send + Sync + 'static,
    {
        self.on_nack = Arc::new(hook);
        self
    }

    pub fn with_auth_provider(mut self, provider: Arc<dyn AuthenticationProvider>) -> Self {
        self.auth = Some(provider);
        self
    }

    /// Use `factory` for destinations created from now on. Destinations
    /// created earlier are dropped.
    pub fn with_destination_factory(mut self, factory: Arc<dyn DestinationFactory>) -> Self {
        self.registry = DestinationRegistry::new(factory);
        self
    }

    pub fn options(&self) -> &ServerOptions {
        &self.options
    }

    pub fn registry(&self) -> &DestinationRegistry {
        &self.registry
    }

    /// Dispatch one inbound frame.
    ///
    /// Frames are handled one at a time per connection: the session driver
    /// awaits this before reading the next frame.
    pub async fn handle(&self, frame: Frame, conn: &ServerConnection) {
        if conn.is_closed() {
            return;
        }
        tracing::trace!(connection = conn.id(), command = %frame.command, "frame received");
        if let Some(hook) = &self.received_frame_hook {
            hook(&frame, conn);
        }

        if matches!(frame.command, Command::Connect | Command::Stomp) {
            if conn.mark_connect_seen() {
                self.fail(conn, Frame::error_for(&frame, "Already connected", "A session can only send one CONNECT frame"));
                return;
            }
            match self.hooks.get(&frame.command) {
                Some(hook) => hook(&frame, conn),
                None => {
                    if let Err(e) = self.on_connect(&frame, conn).await {
                        self.reject(&frame, conn, e);
                    }
                }
            }
            return;
        }

        if !conn.is_connected() {
            self.fail(
                conn,
                Frame::error_for(&frame, "Not connected", "The first frame must be CONNECT or STOMP"),
            );
            return;
        }

        if let Some(hook) = self.hooks.get(&frame.command) {
            hook(&frame, conn);
            return;
        }

        let result = match frame.command {
            Command::Send => self.on_send(&frame, conn),
            Command::Subscribe => self.on_subscribe(&frame, conn),
            Command::Unsubscribe => self.on_unsubscribe(&frame, conn),
            Command::Begin => self.on_begin(&frame, conn),
            Command::Commit => self.on_commit(&frame, conn).await,
            Command::Abort => self.on_abort(&frame, conn),
            Command::Ack => self.on_ack(&frame, conn, false),
            Command::Nack => self.on_ack(&frame, conn, true),
            Command::Disconnect => {
                self.on_disconnect(&frame, conn);
                return;
            }
            other => Err(StompError::Protocol(format!("unexpected {} frame from client", other))),
        };

        match result {
            Ok(()) => self.send_receipt(&frame, conn),
            Err(e) => self.reject(&frame, conn, e),
        }
    }

    fn send_receipt(&self, frame: &Frame, conn: &ServerConnection) {
        if let Some(receipt) = frame.receipt_header() {
            conn.write(Frame::receipt(receipt));
        }
    }

    /// Report `err` with an ERROR frame, closing the connection when the
    /// error is fatal.
    fn reject(&self, frame: &Frame, conn: &ServerConnection, err: StompError) {
        let error = error_frame(frame, &err);
        if err.is_fatal() {
            self.fail(conn, error);
        } else {
            tracing::debug!(connection = conn.id(), command = %frame.command, error = %err, "frame rejected");
            conn.write(error);
        }
    }

    fn fail(&self, conn: &ServerConnection, error: Frame) {
        let reason = error
            .get_header(headers::MESSAGE)
            .unwrap_or("protocol error")
            .to_string();
        conn.write(error);
        conn.close(CloseReason::Protocol(reason));
    }

    /// First entry of the supported list accepted by the client. A missing
    /// `accept-version` header means STOMP 1.0.
    fn negotiate_version(&self, frame: &Frame) -> Option<&str> {
        let accepted: Vec<&str> = match frame.get_header(headers::ACCEPT_VERSION) {
            Some(list) => list.split(',').map(str::trim).collect(),
            None => vec!["1.0"],
        };
        self.options
            .supported_versions
            .iter()
            .map(String::as_str)
            .find(|v| accepted.contains(v))
    }

    async fn on_connect(&self, frame: &Frame, conn: &ServerConnection) -> Result<()> {
        let version = self.negotiate_version(frame).ok_or_else(|| {
            StompError::Protocol(format!(
                "Incompatible versions: supported protocol versions are {}",
                self.options.supported_versions.join(",")
            ))
        })?;

        let login = frame.get_header(headers::LOGIN);
        if self.options.secured {
            let passcode = frame.get_header(headers::PASSCODE);
            let accepted = match &self.auth {
                Some(provider) => provider.authenticate(login, passcode).await,
                None => false,
            };
            if !accepted {
                return Err(StompError::AuthenticationRejected(
                    login.unwrap_or("anonymous").to_string(),
                ));
            }
        }
        if let Some(login) = login {
            conn.set_login(login);
        }

        let client = Heartbeat::from_header(frame.get_header(headers::HEART_BEAT));
        let negotiated = NegotiatedHeartbeat::negotiate(client, self.options.heartbeat);
        let session = Uuid::new_v4().to_string();
        tracing::info!(
            connection = conn.id(),
            session = session.as_str(),
            version,
            login = ?login,
            heart_beat = %negotiated.header_value(),
            "client connected"
        );
        conn.write(
            Frame::new(Command::Connected)
                .header(headers::VERSION, version)
                .header(headers::SESSION, session.as_str())
                .header(headers::SERVER, self.options.server_name.as_str())
                .header(headers::HEART_BEAT, negotiated.header_value()),
        );
        conn.configure_heartbeat(negotiated);
        Ok(())
    }

    fn on_send(&self, frame: &Frame, conn: &ServerConnection) -> Result<()> {
        let destination = require(frame, headers::DESTINATION)?;
        if let Some(tx) = frame.transaction() {
            return self.add_to_transaction(conn, tx, frame.clone());
        }
        let delivered = self.dispatch(conn, frame)?;
        if delivered == 0 && self.options.send_error_on_no_subscriptions {
            return Err(StompError::NotFound {
                kind: "subscriber for destination",
                id: destination.to_string(),
            });
        }
        Ok(())
    }

    fn on_subscribe(&self, frame: &Frame, conn: &ServerConnection) -> Result<()> {
        let destination = require(frame, headers::DESTINATION)?;
        let id = frame.get_header(headers::ID).unwrap_or(destination);
        let ack_mode = match frame.get_header(headers::ACK) {
            Some(mode) => mode.parse::<AckMode>()?,
            None => AckMode::Auto,
        };
        self.subscribe(conn, destination, ack_mode, id)?;
        Ok(())
    }

    fn on_unsubscribe(&self, frame: &Frame, conn: &ServerConnection) -> Result<()> {
        let id = require(frame, headers::ID)?;
        self.unsubscribe(conn, id)
    }

    fn on_begin(&self, frame: &Frame, conn: &ServerConnection) -> Result<()> {
        let tx = require(frame, headers::TRANSACTION)?;
        self.begin(conn, tx)
    }

    async fn on_commit(&self, frame: &Frame, conn: &ServerConnection) -> Result<()> {
        let tx = require(frame, headers::TRANSACTION)?;
        self.commit(conn, tx).await
    }

    fn on_abort(&self, frame: &Frame, conn: &ServerConnection) -> Result<()> {
        let tx = require(frame, headers::TRANSACTION)?;
        self.abort(conn, tx)
    }

    fn on_ack(&self, frame: &Frame, conn: &ServerConnection, nack: bool) -> Result<()> {
        let id = frame
            .get_header(headers::ID)
            .or_else(|| frame.get_header(headers::MESSAGE_ID))
            .ok_or_else(|| {
                StompError::Protocol(format!("{} frame without 'id' header", frame.command))
            })?;
        if let Some(tx) = frame.transaction() {
            return self.add_to_transaction(conn, tx, frame.clone());
        }
        let outcome = if nack {
            self.nack(conn, id, None)
        } else {
            self.ack(conn, id, None)
        };
        match outcome {
            Ok(_) => Ok(()),
            Err(StompError::NotFound { .. }) => {
                tracing::debug!(connection = conn.id(), ack = id, "ignoring unknown ack id");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn on_disconnect(&self, frame: &Frame, conn: &ServerConnection) {
        self.send_receipt(frame, conn);
        conn.close(CloseReason::Disconnect);
    }

    /// Subscribe `conn` to `destination`.
    ///
    /// Fails with a conflict when `id` is already used on the connection,
    /// with `CapacityExceeded` over the per-connection limit, and with
    /// `DestinationRejected` when the factory refuses the name.
    pub fn subscribe(
        &self,
        conn: &ServerConnection,
        destination: &str,
        ack_mode: AckMode,
        id: &str,
    ) -> Result<Arc<Subscription>> {
        let target = self.registry.get_or_create(destination)?;
        let subscription = Arc::new(Subscription::new(
            conn.id(),
            conn.writer().clone(),
            id,
            destination,
            ack_mode,
        ));
        conn.subscriptions()
            .register(subscription.clone(), self.options.max_subscriptions_by_client)?;
        target.subscribe(subscription.clone());
        if conn.is_closed() {
            // lost a race with the close cascade
            target.unsubscribe(conn.id(), id);
            conn.subscriptions().remove(id);
            subscription.deactivate();
        }
        tracing::debug!(
            connection = conn.id(),
            subscription = id,
            destination,
            ack = ack_mode.as_str(),
            "subscribed"
        );
        Ok(subscription)
    }

    /// Remove subscription `id` from `conn` and from its destination. Pending
    /// messages are dropped without being acknowledged or redelivered.
    pub fn unsubscribe(&self, conn: &ServerConnection, id: &str) -> Result<()> {
        let subscription = conn
            .subscriptions()
            .remove(id)
            .ok_or_else(|| StompError::NotFound {
                kind: "subscription",
                id: id.to_string(),
            })?;
        if let Some(destination) = self.registry.get(subscription.destination()) {
            destination.unsubscribe(conn.id(), id);
        }
        let dropped = subscription.deactivate();
        tracing::debug!(
            connection = conn.id(),
            subscription = id,
            destination = subscription.destination(),
            dropped,
            "unsubscribed"
        );
        Ok(())
    }

    /// Route a SEND frame to its destination, creating the destination on
    /// first use. Returns the number of subscribers reached.
    pub fn dispatch(&self, conn: &ServerConnection, frame: &Frame) -> Result<usize> {
        let name = require(frame, headers::DESTINATION)?;
        let destination = self.registry.get_or_create(name)?;
        let delivered = destination.dispatch(frame);
        tracing::trace!(connection = conn.id(), destination = name, delivered, "message routed");
        Ok(delivered)
    }

    /// Acknowledge `ack_id`, or buffer the ACK into `transaction`.
    ///
    /// Returns `Ok(None)` when buffered. An unknown id is `NotFound` and
    /// leaves every pending queue untouched.
    pub fn ack(
        &self,
        conn: &ServerConnection,
        ack_id: &str,
        transaction: Option<&str>,
    ) -> Result<Option<Acknowledgement>> {
        self.acknowledge(conn, ack_id, transaction, false)
    }

    /// Negative counterpart of [`ServerHandler::ack`].
    pub fn nack(
        &self,
        conn: &ServerConnection,
        ack_id: &str,
        transaction: Option<&str>,
    ) -> Result<Option<Acknowledgement>> {
        self.acknowledge(conn, ack_id, transaction, true)
    }

    fn acknowledge(
        &self,
        conn: &ServerConnection,
        ack_id: &str,
        transaction: Option<&str>,
        nack: bool,
    ) -> Result<Option<Acknowledgement>> {
        let command = if nack { Command::Nack } else { Command::Ack };
        if let Some(tx) = transaction {
            let frame = Frame::new(command)
                .header(headers::ID, ack_id)
                .header(headers::TRANSACTION, tx);
            self.add_to_transaction(conn, tx, frame)?;
            return Ok(None);
        }

        let not_found = || StompError::NotFound {
            kind: "message",
            id: ack_id.to_string(),
        };
        let subscription = conn
            .subscriptions()
            .find_by_ack_id(ack_id)
            .ok_or_else(not_found)?;
        let frames = subscription.acknowledge(ack_id).ok_or_else(not_found)?;
        let outcome = Acknowledgement {
            subscription,
            frames,
        };
        if nack {
            (self.on_nack)(&outcome)
        } else {
            (self.on_ack)(&outcome)
        }
        Ok(Some(outcome))
    }

    pub fn begin(&self, conn: &ServerConnection, id: &str) -> Result<()> {
        conn.transactions().begin(id)?;
        tracing::debug!(connection = conn.id(), transaction = id, "transaction started");
        Ok(())
    }

    pub fn add_to_transaction(&self, conn: &ServerConnection, id: &str, frame: Frame) -> Result<()> {
        conn.transactions()
            .add(id, frame, self.options.max_frames_in_transaction)
    }

    /// Replay the frames of transaction `id` in order, then unregister it.
    ///
    /// Frames are replayed in chunks of `transaction_chunk_size`, yielding to
    /// the runtime between chunks.
    pub async fn commit(&self, conn: &ServerConnection, id: &str) -> Result<()> {
        let frames = conn.transactions().snapshot(id)?;
        let chunk_size = self.options.transaction_chunk_size.max(1);
        for chunk in frames.chunks(chunk_size) {
            for frame in chunk {
                self.replay(conn, frame);
            }
            tokio::task::yield_now().await;
        }
        // already gone if the connection closed during replay
        let _ = conn.transactions().remove(id);
        tracing::debug!(connection = conn.id(), transaction = id, frames = frames.len(), "transaction committed");
        Ok(())
    }

    fn replay(&self, conn: &ServerConnection, frame: &Frame) {
        let result = match frame.command {
            Command::Send => self.dispatch(conn, frame).map(|_| ()),
            Command::Ack | Command::Nack => {
                let id = frame
                    .get_header(headers::ID)
                    .or_else(|| frame.get_header(headers::MESSAGE_ID))
                    .unwrap_or_default();
                self.acknowledge(conn, id, None, frame.command == Command::Nack)
                    .map(|_| ())
            }
            _ => Ok(()),
        };
        if let Err(e) = result {
            tracing::debug!(connection = conn.id(), command = %frame.command, error = %e, "transaction frame failed");
        }
    }

    /// Discard transaction `id`.
    pub fn abort(&self, conn: &ServerConnection, id: &str) -> Result<()> {
        let tx = conn.transactions().remove(id)?;
        tracing::debug!(connection = conn.id(), transaction = id, frames = tx.len(), "transaction aborted");
        Ok(())
    }

    /// Emit a heartbeat on `conn`, through the ping hook when one is set.
    pub fn ping(&self, conn: &ServerConnection) {
        match &self.ping_hook {
            Some(hook) => hook(conn),
            None => {
                conn.ping();
            }
        }
    }

    /// Release everything `conn` holds: its subscriptions leave their
    /// destinations, open transactions are discarded, then the close hook
    /// runs. Called once by [`ServerConnection::close`].
    pub fn on_close(&self, conn: &ServerConnection) {
        let subscriptions = conn.subscriptions().drain();
        let mut destinations: Vec<&str> = subscriptions.iter().map(|s| s.destination()).collect();
        destinations.sort_unstable();
        destinations.dedup();
        for name in destinations {
            if let Some(destination) = self.registry.get(name) {
                destination.unsubscribe_connection(conn.id());
            }
        }
        for subscription in &subscriptions {
            subscription.deactivate();
        }
        let transactions = conn.transactions().clear();
        tracing::debug!(
            connection = conn.id(),
            session = ?conn.session(),
            subscriptions = subscriptions.len(),
            transactions,
            "connection released"
        );
        if let Some(hook) = &self.close_hook {
            hook(conn);
        }
    }
}
