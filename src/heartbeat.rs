use std::fmt;
use std::time::Duration;

/// A `heart-beat` pair in milliseconds.
///
/// From the point of view of the party advertising it, `x` is the smallest
/// interval at which it can send heartbeats and `y` the interval at which it
/// wants to receive them. `0` means "cannot" / "does not want".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "cli", derive(serde::Deserialize))]
pub struct Heartbeat {
    pub x: u64,
    pub y: u64,
}

impl Heartbeat {
    pub fn new(x: u64, y: u64) -> Self {
        Self { x, y }
    }

    /// Parse a `heart-beat` header; a missing header means `0,0`.
    pub fn from_header(header: Option<&str>) -> Self {
        let (x, y) = header.map(parse_heartbeat_header).unwrap_or((0, 0));
        Self { x, y }
    }
}

impl fmt::Display for Heartbeat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.x, self.y)
    }
}

/// Parse the STOMP `heart-beat` header value (format: "cx,cy").
///
/// Parameters
/// - `header`: header string from the client (for example "10000,10000").
///   The values represent milliseconds.
///
/// Returns a tuple `(cx, cy)` where each value is the heartbeat interval in
/// milliseconds. Missing or invalid fields default to `0`.
pub fn parse_heartbeat_header(header: &str) -> (u64, u64) {
    let mut parts = header.split(',');
    let cx = parts
        .next()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(0);
    let cy = parts
        .next()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(0);
    (cx, cy)
}

/// Negotiate heartbeat intervals between a client and this server.
///
/// Parameters
/// - `client_out`: how often the client can send heartbeats (client `cx`).
/// - `client_in`: how often the client wants to receive them (client `cy`).
/// - `server_out`: how often the server can send heartbeats (server `x`).
/// - `server_in`: how often the server wants to receive them (server `y`).
///
/// Returns `(ping, pong)` from the server's point of view: `ping` is the
/// interval at which the server emits heartbeats, `pong` the interval at
/// which it expects client activity. A direction is enabled only when both
/// sides advertise a non-zero value; the interval is then the larger of the
/// two.
pub fn negotiate_heartbeats(
    client_out: u64,
    client_in: u64,
    server_out: u64,
    server_in: u64,
) -> (Option<Duration>, Option<Duration>) {
    let direction = |sender: u64, receiver: u64| {
        if sender == 0 || receiver == 0 {
            None
        } else {
            Some(Duration::from_millis(sender.max(receiver)))
        }
    };
    (
        direction(server_out, client_in),
        direction(client_out, server_in),
    )
}

/// Result of heartbeat negotiation for one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NegotiatedHeartbeat {
    /// Interval for server → client pings.
    pub ping: Option<Duration>,
    /// Interval for expected client → server activity.
    pub pong: Option<Duration>,
}

impl NegotiatedHeartbeat {
    pub fn negotiate(client: Heartbeat, server: Heartbeat) -> Self {
        let (ping, pong) = negotiate_heartbeats(client.x, client.y, server.x, server.y);
        Self { ping, pong }
    }

    /// Value for the `heart-beat` header of the CONNECTED frame.
    pub fn header_value(&self) -> String {
        let millis = |d: Option<Duration>| d.map(|d| d.as_millis() as u64).unwrap_or(0);
        format!("{},{}", millis(self.ping), millis(self.pong))
    }
}
