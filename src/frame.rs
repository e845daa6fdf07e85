use std::fmt;
use std::str::FromStr;

use crate::error::StompError;

/// STOMP commands understood by the server, in both directions.
///
/// `Ping` is the heartbeat pseudo-command: it has no command token on the
/// wire and is encoded as a single EOL byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Connect,
    Connected,
    Send,
    Subscribe,
    Unsubscribe,
    Begin,
    Commit,
    Abort,
    Ack,
    Nack,
    Disconnect,
    Message,
    Receipt,
    Error,
    Stomp,
    Ping,
}

impl Command {
    /// Wire token for this command (empty for `Ping`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Connected => "CONNECTED",
            Command::Send => "SEND",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Begin => "BEGIN",
            Command::Commit => "COMMIT",
            Command::Abort => "ABORT",
            Command::Ack => "ACK",
            Command::Nack => "NACK",
            Command::Disconnect => "DISCONNECT",
            Command::Message => "MESSAGE",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
            Command::Stomp => "STOMP",
            Command::Ping => "",
        }
    }

    /// Frames that may be buffered inside a transaction.
    pub fn is_transactional(&self) -> bool {
        matches!(self, Command::Send | Command::Ack | Command::Nack)
    }

    /// CONNECT and CONNECTED headers are exempt from STOMP 1.2 escaping.
    pub fn escapes_headers(&self) -> bool {
        !matches!(self, Command::Connect | Command::Connected)
    }
}

impl FromStr for Command {
    type Err = StompError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let command = match s {
            "CONNECT" => Command::Connect,
            "CONNECTED" => Command::Connected,
            "SEND" => Command::Send,
            "SUBSCRIBE" => Command::Subscribe,
            "UNSUBSCRIBE" => Command::Unsubscribe,
            "BEGIN" => Command::Begin,
            "COMMIT" => Command::Commit,
            "ABORT" => Command::Abort,
            "ACK" => Command::Ack,
            "NACK" => Command::Nack,
            "DISCONNECT" => Command::Disconnect,
            "MESSAGE" => Command::Message,
            "RECEIPT" => Command::Receipt,
            "ERROR" => Command::Error,
            "STOMP" => Command::Stomp,
            other => {
                return Err(StompError::Protocol(format!("unknown command '{}'", other)));
            }
        };
        Ok(command)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Ping => f.write_str("PING"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Well-known header names.
pub mod headers {
    pub const ACCEPT_VERSION: &str = "accept-version";
    pub const ACK: &str = "ack";
    pub const CONTENT_LENGTH: &str = "content-length";
    pub const CONTENT_TYPE: &str = "content-type";
    pub const DESTINATION: &str = "destination";
    pub const HEART_BEAT: &str = "heart-beat";
    pub const HOST: &str = "host";
    pub const ID: &str = "id";
    pub const LOGIN: &str = "login";
    pub const MESSAGE: &str = "message";
    pub const MESSAGE_ID: &str = "message-id";
    pub const PASSCODE: &str = "passcode";
    pub const RECEIPT: &str = "receipt";
    pub const RECEIPT_ID: &str = "receipt-id";
    pub const SERVER: &str = "server";
    pub const SESSION: &str = "session";
    pub const SUBSCRIPTION: &str = "subscription";
    pub const TRANSACTION: &str = "transaction";
    pub const VERSION: &str = "version";
}

/// A STOMP frame.
///
/// `Frame` contains the command, an ordered list of headers (key/value
/// pairs, repeated keys allowed) and the raw body bytes. Header lookup
/// returns the first occurrence, which is the STOMP precedence rule for
/// repeated headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// STOMP command
    pub command: Command,
    /// Ordered headers as (key, value) pairs
    pub headers: Vec<(String, String)>,
    /// Raw body bytes
    pub body: Vec<u8>,
}

impl Frame {
    /// Create a new frame with the given command and empty headers/body.
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Add a header (builder style).
    ///
    /// Parameters
    /// - `key`: header name (converted to `String`).
    /// - `value`: header value (converted to `String`).
    ///
    /// Returns the mutated `Frame` allowing builder-style chaining.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// Set the frame body (builder style).
    pub fn set_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Get the value of a header by name.
    ///
    /// Returns the first header value matching the given key (case-sensitive),
    /// or `None` if no such header exists.
    pub fn get_header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Value of the `receipt` header, if the client asked for one.
    pub fn receipt_header(&self) -> Option<&str> {
        self.get_header(headers::RECEIPT)
    }

    /// Value of the `transaction` header.
    pub fn transaction(&self) -> Option<&str> {
        self.get_header(headers::TRANSACTION)
    }

    /// Value of the `destination` header.
    pub fn destination(&self) -> Option<&str> {
        self.get_header(headers::DESTINATION)
    }

    /// The heartbeat pseudo-frame.
    pub fn ping() -> Self {
        Self::new(Command::Ping)
    }

    /// Build a RECEIPT frame answering `receipt_id`.
    pub fn receipt(receipt_id: impl Into<String>) -> Self {
        Self::new(Command::Receipt).header(headers::RECEIPT_ID, receipt_id)
    }

    /// Build an ERROR frame with a short `message` header and a plain-text
    /// `detail` body.
    pub fn error(message: impl Into<String>, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        Self::new(Command::Error)
            .header(headers::MESSAGE, message)
            .header(headers::CONTENT_TYPE, "text/plain")
            .header(headers::CONTENT_LENGTH, detail.len().to_string())
            .set_body(detail.into_bytes())
    }

    /// Build an ERROR frame answering `cause`, carrying its `receipt` as
    /// `receipt-id` so the client can correlate the failure.
    pub fn error_for(cause: &Frame, message: impl Into<String>, detail: impl Into<String>) -> Self {
        let error = Self::error(message, detail);
        match cause.receipt_header() {
            Some(receipt) => error.header(headers::RECEIPT_ID, receipt),
            None => error,
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Command: {}", self.command)?;
        for (k, v) in &self.headers {
            writeln!(f, "{}: {}", k, v)?;
        }
        writeln!(f, "Body ({} bytes)", self.body.len())
    }
}
