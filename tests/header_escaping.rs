//! STOMP 1.2 header escaping.
//!
//! Escape sequences in header names and values:
//! - `\r` → carriage return (0x0d)
//! - `\n` → line feed (0x0a)
//! - `\c` → colon (0x3a)
//! - `\\` → backslash (0x5c)
//!
//! CONNECT and CONNECTED frames are exempt.

use bytes::BytesMut;
use iridium_stomp_server::codec::{StompCodec, StompItem};
use iridium_stomp_server::{Command, Frame};
use tokio_util::codec::{Decoder, Encoder};

fn decode(raw: &[u8]) -> Frame {
    let mut codec = StompCodec::new();
    let mut buf = BytesMut::from(raw);
    match codec.decode(&mut buf).unwrap().unwrap() {
        StompItem::Frame(frame) => frame,
        other => panic!("expected frame, got {:?}", other),
    }
}

fn encode(frame: Frame) -> String {
    let mut codec = StompCodec::new();
    let mut buf = BytesMut::new();
    codec.encode(StompItem::Frame(frame), &mut buf).unwrap();
    String::from_utf8_lossy(&buf).into_owned()
}

fn message_with(key: &str, value: &str) -> Frame {
    Frame::new(Command::Message)
        .header("destination", "/queue/test")
        .header(key, value)
}

// ============================================================================
// Unescape (inbound frames)
// ============================================================================

#[test]
fn unescape_backslash() {
    let frame = decode(b"SEND\nheader:value\\\\with\\\\backslashes\n\n\0");
    assert_eq!(frame.get_header("header"), Some("value\\with\\backslashes"));
}

#[test]
fn unescape_newline_and_carriage_return() {
    let frame = decode(b"SEND\nheader:line1\\nline2\\rend\n\n\0");
    assert_eq!(frame.get_header("header"), Some("line1\nline2\rend"));
}

#[test]
fn unescape_colon() {
    let frame = decode(b"SEND\nheader:key\\cvalue\n\n\0");
    assert_eq!(frame.get_header("header"), Some("key:value"));
}

#[test]
fn unescape_header_name() {
    let frame = decode(b"SEND\nkey\\nname:value\n\n\0");
    assert_eq!(frame.get_header("key\nname"), Some("value"));
}

#[test]
fn value_keeps_later_colons() {
    let frame = decode(b"SEND\nurl:http://example.com:8080\n\n\0");
    assert_eq!(frame.get_header("url"), Some("http://example.com:8080"));
}

#[test]
fn unescape_invalid_sequence() {
    let mut codec = StompCodec::new();
    let mut buf = BytesMut::from(&b"SEND\nheader:bad\\xescape\n\n\0"[..]);
    let err = codec.decode(&mut buf).unwrap_err();
    assert!(err.to_string().contains("invalid escape"), "{}", err);
}

#[test]
fn unescape_dangling_backslash() {
    let mut codec = StompCodec::new();
    let mut buf = BytesMut::from(&b"SEND\nheader:trailing\\\n\n\0"[..]);
    let err = codec.decode(&mut buf).unwrap_err();
    assert!(err.to_string().contains("dangling"), "{}", err);
}

#[test]
fn connect_headers_are_not_unescaped() {
    let frame = decode(b"CONNECT\nlogin:dom\\user\npasscode:a\\cb\n\n\0");
    assert_eq!(frame.get_header("login"), Some("dom\\user"));
    assert_eq!(frame.get_header("passcode"), Some("a\\cb"));
}

// ============================================================================
// Escape (outbound frames)
// ============================================================================

#[test]
fn escape_special_characters() {
    let encoded = encode(message_with("custom", "a\nb\rc\\d:e"));
    assert!(encoded.contains("custom:a\\nb\\rc\\\\d\\ce"), "{}", encoded);
}

#[test]
fn escape_header_name() {
    let encoded = encode(message_with("x:y", "v"));
    assert!(encoded.contains("x\\cy:v"), "{}", encoded);
}

#[test]
fn connected_headers_are_not_escaped() {
    let frame = Frame::new(Command::Connected)
        .header("version", "1.2")
        .header("server", "broker:1");
    let encoded = encode(frame);
    assert!(encoded.contains("server:broker:1\n"), "{}", encoded);
}

#[test]
fn error_message_with_newline_is_escaped() {
    let encoded = encode(Frame::error("bad\nthing", "detail"));
    assert!(encoded.contains("message:bad\\nthing\n"), "{}", encoded);
}

// ============================================================================
// Round trips
// ============================================================================

#[test]
fn roundtrip_all_special_chars() {
    let value = "path\\to\\file\nkey:value\r\nend";
    let mut codec = StompCodec::new();
    let mut buf = BytesMut::new();
    codec
        .encode(StompItem::Frame(message_with("complex", value)), &mut buf)
        .unwrap();
    match codec.decode(&mut buf).unwrap().unwrap() {
        StompItem::Frame(frame) => assert_eq!(frame.get_header("complex"), Some(value)),
        other => panic!("expected frame, got {:?}", other),
    }
}

#[test]
fn roundtrip_empty_value() {
    let mut codec = StompCodec::new();
    let mut buf = BytesMut::new();
    codec
        .encode(StompItem::Frame(message_with("empty", "")), &mut buf)
        .unwrap();
    match codec.decode(&mut buf).unwrap().unwrap() {
        StompItem::Frame(frame) => assert_eq!(frame.get_header("empty"), Some("")),
        other => panic!("expected frame, got {:?}", other),
    }
}

#[test]
fn no_escaping_needed() {
    let encoded = encode(message_with("normal", "just-a-normal-value"));
    assert!(encoded.contains("normal:just-a-normal-value"));
    assert!(!encoded.contains("\\\\"));
    assert!(!encoded.contains("\\n"));
    assert!(!encoded.contains("\\r"));
    assert!(!encoded.contains("\\c"));
}
