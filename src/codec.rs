use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::StompError;
use crate::frame::{Command, Frame};
use crate::parser::{FrameLimits, escape_header_value, parse_frame_slice, unescape_header_value};

/// Items produced or consumed by the codec.
///
/// A `StompItem` is either a decoded `Frame` or a `Heartbeat` marker
/// representing a single EOL received on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StompItem {
    /// A decoded STOMP frame (command + headers + body)
    Frame(Frame),
    /// A single heartbeat pulse (LF or CRLF)
    Heartbeat,
}

/// `StompCodec` implements `tokio_util::codec::{Decoder, Encoder}` for the
/// server side of the STOMP wire protocol.
///
/// Responsibilities:
/// - Decode incoming bytes into `StompItem::Frame` or `StompItem::Heartbeat`,
///   enforcing the configured [`FrameLimits`].
/// - Support both NUL-terminated frames and frames using the `content-length`
///   header for binary bodies containing NUL bytes.
/// - Encode `StompItem` back into bytes, emitting `content-length` when the
///   body needs it and applying header escaping to every frame except
///   CONNECT/CONNECTED.
#[derive(Debug, Clone, Default)]
pub struct StompCodec {
    limits: FrameLimits,
    trailing_line: bool,
}

impl StompCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Codec enforcing the given decode limits.
    pub fn with_limits(limits: FrameLimits) -> Self {
        Self {
            limits,
            trailing_line: false,
        }
    }

    /// Append an EOL after the NUL terminator of every encoded frame.
    pub fn trailing_line(mut self, enabled: bool) -> Self {
        self.trailing_line = enabled;
        self
    }

    pub fn limits(&self) -> &FrameLimits {
        &self.limits
    }
}

fn invalid(what: &str, detail: impl std::fmt::Display) -> StompError {
    StompError::Protocol(format!("{}: {}", what, detail))
}

impl Decoder for StompCodec {
    type Item = StompItem;
    type Error = StompError;

    /// Decode bytes from `src` into a `StompItem`.
    ///
    /// Returns `Ok(None)` and leaves `src` untouched when more bytes are
    /// required. Returns `Err(StompError::Protocol)` for malformed frames,
    /// unknown commands, bad escapes and limit violations.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // heartbeat: single LF or CRLF
        match src.chunk() {
            [b'\n', ..] => {
                src.advance(1);
                return Ok(Some(StompItem::Heartbeat));
            }
            [b'\r'] => return Ok(None),
            [b'\r', b'\n', ..] => {
                src.advance(2);
                return Ok(Some(StompItem::Heartbeat));
            }
            _ => {}
        }

        let (cmd_bytes, headers, body, consumed) =
            match parse_frame_slice(src.chunk(), &self.limits) {
                Ok(Some(parsed)) => parsed,
                Ok(None) => return Ok(None),
                Err(e) => return Err(invalid("parse error", e)),
            };
        src.advance(consumed);
        if self.trailing_line && src.chunk().first() == Some(&b'\n') {
            src.advance(1);
        }

        let command = String::from_utf8(cmd_bytes)
            .map_err(|e| invalid("invalid utf8 in command", e))?
            .parse::<Command>()?;

        // convert headers Vec<(Vec<u8>,Vec<u8>)> -> Vec<(String,String)>
        let escaped = command.escapes_headers();
        let mut hdrs: Vec<(String, String)> = Vec::with_capacity(headers.len());
        for (k, v) in headers {
            let (k, v) = if escaped {
                (
                    unescape_header_value(&k).map_err(|e| invalid("invalid escape in header key", e))?,
                    unescape_header_value(&v)
                        .map_err(|e| invalid("invalid escape in header value", e))?,
                )
            } else {
                (k, v)
            };
            let ks = String::from_utf8(k).map_err(|e| invalid("invalid utf8 in header key", e))?;
            let vs =
                String::from_utf8(v).map_err(|e| invalid("invalid utf8 in header value", e))?;
            hdrs.push((ks, vs));
        }

        Ok(Some(StompItem::Frame(Frame {
            command,
            headers: hdrs,
            body,
        })))
    }
}

impl Encoder<StompItem> for StompCodec {
    type Error = StompError;

    /// Encode a `StompItem` into the provided destination buffer.
    ///
    /// A `Heartbeat`, or a frame whose command is `Ping`, becomes a single LF.
    fn encode(&mut self, item: StompItem, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let frame = match item {
            StompItem::Heartbeat => {
                dst.put_u8(b'\n');
                return Ok(());
            }
            StompItem::Frame(frame) if frame.command == Command::Ping => {
                dst.put_u8(b'\n');
                return Ok(());
            }
            StompItem::Frame(frame) => frame,
        };

        dst.extend_from_slice(frame.command.as_str().as_bytes());
        dst.put_u8(b'\n');

        let mut headers = frame.headers;
        let has_cl = headers
            .iter()
            .any(|(k, _)| k.eq_ignore_ascii_case("content-length"));
        if !has_cl {
            let include_cl = frame.body.contains(&0) || std::str::from_utf8(&frame.body).is_err();
            if include_cl {
                headers.push(("content-length".to_string(), frame.body.len().to_string()));
            }
        }

        let escaped = frame.command.escapes_headers();
        for (k, v) in headers {
            if escaped {
                dst.extend_from_slice(escape_header_value(&k).as_bytes());
                dst.put_u8(b':');
                dst.extend_from_slice(escape_header_value(&v).as_bytes());
            } else {
                dst.extend_from_slice(k.as_bytes());
                dst.put_u8(b':');
                dst.extend_from_slice(v.as_bytes());
            }
            dst.put_u8(b'\n');
        }

        dst.put_u8(b'\n');
        dst.extend_from_slice(&frame.body);
        dst.put_u8(0);
        if self.trailing_line {
            dst.put_u8(b'\n');
        }

        Ok(())
    }
}
