use crate::heartbeat::Heartbeat;
use crate::parser::FrameLimits;

pub const DEFAULT_STOMP_PORT: u16 = 61613;
pub const DEFAULT_STOMP_HOST: &str = "0.0.0.0";
pub const DEFAULT_MAX_FRAMES_IN_TRANSACTION: usize = 1000;
pub const DEFAULT_TRANSACTION_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_MAX_SUBSCRIPTIONS_BY_CLIENT: usize = 1000;
pub const DEFAULT_HEARTBEAT_TOLERANCE: u32 = 2;

/// Server configuration.
///
/// Every field has a default; the `with_*` setters allow builder-style
/// construction:
///
/// ```
/// use iridium_stomp_server::{Heartbeat, ServerOptions};
///
/// let options = ServerOptions::default()
///     .with_port(0)
///     .with_heartbeat(Heartbeat::new(5000, 5000))
///     .with_secured(true);
/// assert_eq!(options.port, 0);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "cli", derive(serde::Deserialize), serde(default))]
pub struct ServerOptions {
    pub host: String,
    pub port: u16,
    /// Maximum length of a header name or value.
    pub max_header_length: usize,
    /// Maximum number of headers per frame.
    pub max_headers: usize,
    /// Maximum body length in bytes.
    pub max_body_length: usize,
    /// Frames a single transaction may buffer.
    pub max_frames_in_transaction: usize,
    /// Frames replayed per batch when a transaction commits.
    pub transaction_chunk_size: usize,
    /// Live subscriptions a single connection may hold.
    pub max_subscriptions_by_client: usize,
    /// Protocol versions, most preferred first.
    pub supported_versions: Vec<String>,
    /// Server side of the heartbeat negotiation.
    pub heartbeat: Heartbeat,
    /// Multiplier applied to the negotiated pong interval before a silent
    /// client is disconnected.
    pub heartbeat_tolerance: u32,
    /// Require authentication on CONNECT.
    pub secured: bool,
    /// Answer a SEND with an ERROR frame when its destination has no
    /// subscriber.
    pub send_error_on_no_subscriptions: bool,
    /// Emit an EOL after the NUL of every outbound frame.
    pub trailing_line: bool,
    /// Value of the `server` header in CONNECTED frames.
    pub server_name: String,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: DEFAULT_STOMP_HOST.to_string(),
            port: DEFAULT_STOMP_PORT,
            max_header_length: FrameLimits::DEFAULT_MAX_HEADER_LENGTH,
            max_headers: FrameLimits::DEFAULT_MAX_HEADERS,
            max_body_length: FrameLimits::DEFAULT_MAX_BODY_LENGTH,
            max_frames_in_transaction: DEFAULT_MAX_FRAMES_IN_TRANSACTION,
            transaction_chunk_size: DEFAULT_TRANSACTION_CHUNK_SIZE,
            max_subscriptions_by_client: DEFAULT_MAX_SUBSCRIPTIONS_BY_CLIENT,
            supported_versions: vec!["1.2".to_string(), "1.1".to_string(), "1.0".to_string()],
            heartbeat: Heartbeat::new(1000, 1000),
            heartbeat_tolerance: DEFAULT_HEARTBEAT_TOLERANCE,
            secured: false,
            send_error_on_no_subscriptions: false,
            trailing_line: false,
            server_name: format!("iridium-stomp-server/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl ServerOptions {
    /// Decode limits derived from this configuration.
    pub fn frame_limits(&self) -> FrameLimits {
        FrameLimits {
            max_headers: self.max_headers,
            max_header_length: self.max_header_length,
            max_body_length: self.max_body_length,
        }
    }

    /// `host:port` listen address.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_frame_limits(mut self, limits: FrameLimits) -> Self {
        self.max_headers = limits.max_headers;
        self.max_header_length = limits.max_header_length;
        self.max_body_length = limits.max_body_length;
        self
    }

    pub fn with_max_frames_in_transaction(mut self, max: usize) -> Self {
        self.max_frames_in_transaction = max;
        self
    }

    /// Chunk size is clamped to at least one frame.
    pub fn with_transaction_chunk_size(mut self, size: usize) -> Self {
        self.transaction_chunk_size = size.max(1);
        self
    }

    pub fn with_max_subscriptions_by_client(mut self, max: usize) -> Self {
        self.max_subscriptions_by_client = max;
        self
    }

    pub fn with_supported_versions<I, S>(mut self, versions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.supported_versions = versions.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_heartbeat(mut self, heartbeat: Heartbeat) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    /// Tolerance is clamped to at least one negotiated interval.
    pub fn with_heartbeat_tolerance(mut self, tolerance: u32) -> Self {
        self.heartbeat_tolerance = tolerance.max(1);
        self
    }

    pub fn with_secured(mut self, secured: bool) -> Self {
        self.secured = secured;
        self
    }

    pub fn with_send_error_on_no_subscriptions(mut self, enabled: bool) -> Self {
        self.send_error_on_no_subscriptions = enabled;
        self
    }

    pub fn with_trailing_line(mut self, enabled: bool) -> Self {
        self.trailing_line = enabled;
        self
    }

    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = name.into();
        self
    }
}
