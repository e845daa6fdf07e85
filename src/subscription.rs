use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::codec::StompItem;
use crate::connection::FrameWriter;
use crate::error::{Result, StompError};
use crate::frame::{Command, Frame, headers};

/// Subscription acknowledgement modes as defined by STOMP 1.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AckMode {
    #[default]
    Auto,
    Client,
    ClientIndividual,
}

impl AckMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AckMode::Auto => "auto",
            AckMode::Client => "client",
            AckMode::ClientIndividual => "client-individual",
        }
    }
}

impl FromStr for AckMode {
    type Err = StompError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "auto" => Ok(AckMode::Auto),
            "client" => Ok(AckMode::Client),
            "client-individual" => Ok(AckMode::ClientIndividual),
            other => Err(StompError::Protocol(format!("invalid ack mode '{}'", other))),
        }
    }
}

/// Pending queue: (message-id, MESSAGE frame) in delivery order.
pub(crate) type PendingQueue = VecDeque<(String, Frame)>;

/// Per-connection map from pending ack id to the id of the subscription
/// holding it.
pub(crate) type AckIndex = Arc<DashMap<String, String>>;

/// SEND headers that never travel on to the MESSAGE frame.
const STRIPPED_HEADERS: &[&str] = &[
    headers::DESTINATION,
    headers::RECEIPT,
    headers::TRANSACTION,
    headers::CONTENT_LENGTH,
    headers::MESSAGE_ID,
    headers::SUBSCRIPTION,
    headers::ACK,
];

/// A live subscription owned by one connection.
///
/// For `client` and `client-individual` modes every delivered MESSAGE is
/// recorded in the pending queue until the client acknowledges it. The
/// message id doubles as the ack id.
#[derive(Debug)]
pub struct Subscription {
    id: String,
    destination: String,
    ack_mode: AckMode,
    connection_id: u64,
    writer: FrameWriter,
    pending: Mutex<PendingQueue>,
    active: AtomicBool,
    index: OnceLock<AckIndex>,
}

impl Subscription {
    pub fn new(
        connection_id: u64,
        writer: FrameWriter,
        id: impl Into<String>,
        destination: impl Into<String>,
        ack_mode: AckMode,
    ) -> Self {
        Self {
            id: id.into(),
            destination: destination.into(),
            ack_mode,
            connection_id,
            writer,
            pending: Mutex::new(VecDeque::new()),
            active: AtomicBool::new(true),
            index: OnceLock::new(),
        }
    }

    fn index_insert(&self, ack_id: &str) {
        if let Some(index) = self.index.get() {
            index.insert(ack_id.to_string(), self.id.clone());
        }
    }

    fn index_remove(&self, ack_id: &str) {
        if let Some(index) = self.index.get() {
            index.remove(ack_id);
        }
    }

    /// Subscription id, unique within its connection.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn ack_mode(&self) -> AckMode {
        self.ack_mode
    }

    /// Id of the owning connection.
    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Stop deliveries and drop every pending entry. Returns how many pending
    /// messages were discarded; they are neither acknowledged nor
    /// redelivered.
    pub(crate) fn deactivate(&self) -> usize {
        let mut pending = self.pending.lock();
        self.active.store(false, Ordering::Release);
        let dropped = pending.len();
        for (ack_id, _) in pending.drain(..) {
            self.index_remove(&ack_id);
        }
        dropped
    }

    /// Deliver `frame` (a SEND) to this subscriber as a MESSAGE.
    ///
    /// In non-auto modes the pending entry is recorded before the MESSAGE is
    /// handed to the connection writer, and both happen under the pending
    /// lock so concurrent deliveries keep queue order equal to wire order.
    /// Returns `false` if the subscription is inactive or its connection is
    /// gone.
    pub fn deliver(&self, frame: &Frame) -> bool {
        if !self.is_active() {
            return false;
        }
        let message_id = Uuid::new_v4().to_string();
        let message = self.message_for(frame, &message_id);

        if self.ack_mode == AckMode::Auto {
            return self.writer.write(StompItem::Frame(message));
        }

        let mut pending = self.pending.lock();
        if !self.is_active() {
            return false;
        }
        self.index_insert(&message_id);
        pending.push_back((message_id, message.clone()));
        if !self.writer.write(StompItem::Frame(message)) {
            if let Some((ack_id, _)) = pending.pop_back() {
                self.index_remove(&ack_id);
            }
            return false;
        }
        true
    }

    fn message_for(&self, frame: &Frame, message_id: &str) -> Frame {
        let mut message = Frame::new(Command::Message)
            .header(headers::DESTINATION, self.destination.as_str())
            .header(headers::MESSAGE_ID, message_id)
            .header(headers::SUBSCRIPTION, self.id.as_str());
        if self.ack_mode != AckMode::Auto {
            message = message.header(headers::ACK, message_id);
        }
        for (k, v) in &frame.headers {
            if !STRIPPED_HEADERS.contains(&k.as_str()) {
                message.headers.push((k.clone(), v.clone()));
            }
        }
        message.set_body(frame.body.clone())
    }

    /// Whether `ack_id` is awaiting acknowledgement on this subscription.
    pub fn contains(&self, ack_id: &str) -> bool {
        self.pending.lock().iter().any(|(id, _)| id == ack_id)
    }

    /// Ids awaiting acknowledgement, oldest first.
    pub fn pending_ids(&self) -> Vec<String> {
        self.pending.lock().iter().map(|(id, _)| id.clone()).collect()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Remove the messages affected by an ACK/NACK of `ack_id`.
    ///
    /// - `client`: cumulative, every pending message up to and including
    ///   `ack_id`.
    /// - `client-individual`: only `ack_id`.
    /// - `auto`: nothing is tracked, always `None`.
    ///
    /// Returns `None` when `ack_id` is not pending; the queue is left
    /// untouched in that case.
    pub fn acknowledge(&self, ack_id: &str) -> Option<Vec<Frame>> {
        if self.ack_mode == AckMode::Auto {
            return None;
        }
        let mut pending = self.pending.lock();
        let pos = pending.iter().position(|(id, _)| id == ack_id)?;
        let removed: Vec<(String, Frame)> = match self.ack_mode {
            AckMode::Client => pending.drain(..=pos).collect(),
            _ => pending.remove(pos).into_iter().collect(),
        };
        Some(
            removed
                .into_iter()
                .map(|(ack_id, frame)| {
                    self.index_remove(&ack_id);
                    frame
                })
                .collect(),
        )
    }
}

/// Outcome of an ACK or NACK handed to the on-ack / on-nack callbacks.
#[derive(Debug, Clone)]
pub struct Acknowledgement {
    /// Subscription the acknowledged messages were delivered on.
    pub subscription: Arc<Subscription>,
    /// Affected MESSAGE frames, oldest first.
    pub frames: Vec<Frame>,
}

/// Per-connection set of active subscriptions.
#[derive(Debug, Default)]
pub struct Subscriptions {
    entries: Mutex<Vec<Arc<Subscription>>>,
    acks: AckIndex,
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `subscription`, failing on a duplicate id or when `limit`
    /// subscriptions are already live.
    pub fn register(&self, subscription: Arc<Subscription>, limit: usize) -> Result<()> {
        let mut entries = self.entries.lock();
        if entries.iter().any(|s| s.id() == subscription.id()) {
            return Err(StompError::Conflict {
                kind: "subscription",
                id: subscription.id().to_string(),
            });
        }
        if entries.len() >= limit {
            return Err(StompError::CapacityExceeded(format!(
                "a connection may hold at most {} subscriptions",
                limit
            )));
        }
        let _ = subscription.index.set(self.acks.clone());
        entries.push(subscription);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<Subscription>> {
        self.entries.lock().iter().find(|s| s.id() == id).cloned()
    }

    pub fn remove(&self, id: &str) -> Option<Arc<Subscription>> {
        let mut entries = self.entries.lock();
        let pos = entries.iter().position(|s| s.id() == id)?;
        Some(entries.remove(pos))
    }

    /// Subscription holding `ack_id` in its pending queue.
    pub fn find_by_ack_id(&self, ack_id: &str) -> Option<Arc<Subscription>> {
        let id = self.acks.get(ack_id).map(|entry| entry.value().clone())?;
        self.get(&id).filter(|s| s.contains(ack_id))
    }

    /// Number of ack ids awaiting acknowledgement across every subscription.
    pub fn pending_acks(&self) -> usize {
        self.acks.len()
    }

    pub fn ids(&self) -> Vec<String> {
        self.entries.lock().iter().map(|s| s.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Remove and return every subscription.
    pub fn drain(&self) -> Vec<Arc<Subscription>> {
        std::mem::take(&mut *self.entries.lock())
    }
}
