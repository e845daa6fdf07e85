use std::collections::HashMap;

use parking_lot::Mutex;

use crate::error::{Result, StompError};
use crate::frame::Frame;

/// An open transaction: frames buffered between BEGIN and COMMIT/ABORT.
#[derive(Debug, Clone)]
pub struct Transaction {
    id: String,
    frames: Vec<Frame>,
}

impl Transaction {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            frames: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Buffered frames in arrival order.
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// Transactions opened by one connection.
#[derive(Debug, Default)]
pub struct Transactions {
    open: Mutex<HashMap<String, Transaction>>,
}

impl Transactions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open transaction `id`.
    pub fn begin(&self, id: &str) -> Result<()> {
        let mut open = self.open.lock();
        if open.contains_key(id) {
            return Err(StompError::Conflict {
                kind: "transaction",
                id: id.to_string(),
            });
        }
        open.insert(id.to_string(), Transaction::new(id));
        Ok(())
    }

    /// Buffer `frame` into transaction `id`.
    ///
    /// Only SEND, ACK and NACK frames are accepted. Once the transaction holds
    /// `max_frames` frames further additions fail and the buffer is left as
    /// it was.
    pub fn add(&self, id: &str, frame: Frame, max_frames: usize) -> Result<()> {
        let mut open = self.open.lock();
        let tx = open.get_mut(id).ok_or_else(|| StompError::NotFound {
            kind: "transaction",
            id: id.to_string(),
        })?;
        if !frame.command.is_transactional() {
            return Err(StompError::Protocol(format!(
                "{} frames cannot be part of a transaction",
                frame.command
            )));
        }
        if tx.frames.len() >= max_frames {
            return Err(StompError::CapacityExceeded(format!(
                "transaction '{}' already holds {} frames",
                id, max_frames
            )));
        }
        tx.frames.push(frame);
        Ok(())
    }

    /// Copy of the frames buffered in `id`, leaving the transaction open.
    pub fn snapshot(&self, id: &str) -> Result<Vec<Frame>> {
        self.open
            .lock()
            .get(id)
            .map(|tx| tx.frames.clone())
            .ok_or_else(|| StompError::NotFound {
                kind: "transaction",
                id: id.to_string(),
            })
    }

    /// Unregister `id`, returning it with its buffered frames.
    pub fn remove(&self, id: &str) -> Result<Transaction> {
        self.open
            .lock()
            .remove(id)
            .ok_or_else(|| StompError::NotFound {
                kind: "transaction",
                id: id.to_string(),
            })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.open.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.open.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.open.lock().is_empty()
    }

    /// Discard every open transaction, returning how many were dropped.
    pub fn clear(&self) -> usize {
        let mut open = self.open.lock();
        let n = open.len();
        open.clear();
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Command;

    fn send(body: &str) -> Frame {
        Frame::new(Command::Send)
            .header("destination", "/queue/tx")
            .set_body(body.as_bytes().to_vec())
    }

    #[test]
    fn begin_twice_conflicts() {
        let txs = Transactions::new();
        txs.begin("t1").unwrap();
        assert!(matches!(
            txs.begin("t1"),
            Err(StompError::Conflict { kind: "transaction", .. })
        ));
        assert_eq!(txs.len(), 1);
    }

    #[test]
    fn add_to_unknown_transaction() {
        let txs = Transactions::new();
        assert!(matches!(
            txs.add("nope", send("x"), 10),
            Err(StompError::NotFound { .. })
        ));
    }

    #[test]
    fn only_send_ack_nack_are_buffered() {
        let txs = Transactions::new();
        txs.begin("t1").unwrap();
        let subscribe = Frame::new(Command::Subscribe).header("destination", "/a");
        assert!(matches!(
            txs.add("t1", subscribe, 10),
            Err(StompError::Protocol(_))
        ));
        txs.add("t1", Frame::new(Command::Ack).header("id", "m1"), 10)
            .unwrap();
        txs.add("t1", Frame::new(Command::Nack).header("id", "m2"), 10)
            .unwrap();
        assert_eq!(txs.snapshot("t1").unwrap().len(), 2);
    }

    #[test]
    fn capacity_is_enforced_without_partial_add() {
        let txs = Transactions::new();
        txs.begin("t1").unwrap();
        txs.add("t1", send("1"), 2).unwrap();
        txs.add("t1", send("2"), 2).unwrap();
        assert!(matches!(
            txs.add("t1", send("3"), 2),
            Err(StompError::CapacityExceeded(_))
        ));
        let frames = txs.snapshot("t1").unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].body, b"2");
    }

    #[test]
    fn remove_returns_frames_in_order() {
        let txs = Transactions::new();
        txs.begin("t1").unwrap();
        for body in ["a", "b", "c"] {
            txs.add("t1", send(body), 10).unwrap();
        }
        let tx = txs.remove("t1").unwrap();
        let bodies: Vec<&[u8]> = tx.frames().iter().map(|f| f.body.as_slice()).collect();
        assert_eq!(bodies, vec![b"a".as_slice(), b"b", b"c"]);
        assert!(!txs.contains("t1"));
        assert!(txs.remove("t1").is_err());
    }

    #[test]
    fn clear_discards_everything() {
        let txs = Transactions::new();
        txs.begin("a").unwrap();
        txs.begin("b").unwrap();
        assert_eq!(txs.clear(), 2);
        assert!(txs.is_empty());
    }
}
