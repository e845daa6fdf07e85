use bytes::BytesMut;
use iridium_stomp_server::codec::{StompCodec, StompItem};
use tokio_util::codec::Decoder;

// Feed bytes one at a time and assert the decoder only yields a frame once
// the whole frame, including the NUL terminator, has arrived.
#[test]
fn byte_by_byte_content_length() {
    let mut codec = StompCodec::new();
    let raw = b"SEND\ndestination:/queue/a\ncontent-length:5\n\nhello\0";

    let mut buf = BytesMut::new();
    for i in 0..raw.len() {
        buf.extend_from_slice(&raw[i..i + 1]);
        let res = codec.decode(&mut buf).expect("decode failed");
        if i < raw.len() - 1 {
            assert!(res.is_none(), "decoder produced item too early at byte {}", i);
        } else {
            match res.expect("expected item after final byte") {
                StompItem::Frame(f) => assert_eq!(f.body, b"hello".to_vec()),
                other => panic!("expected frame, got {:?}", other),
            }
        }
    }
    assert!(buf.is_empty());
}

#[test]
fn small_chunk_null_terminated() {
    let mut codec = StompCodec::new();
    let raw = b"SEND\ndestination:/topic/t\n\nchunked body\0";
    let mut buf = BytesMut::new();

    let mut offset = 0usize;
    while offset < raw.len() {
        let end = (offset + 3).min(raw.len());
        buf.extend_from_slice(&raw[offset..end]);
        let res = codec.decode(&mut buf).expect("decode failed");
        if end < raw.len() {
            assert!(res.is_none(), "decoder produced item too early at offset {}", end);
        } else {
            match res.expect("expected item after final chunk") {
                StompItem::Frame(f) => assert_eq!(f.body, b"chunked body".to_vec()),
                other => panic!("expected frame, got {:?}", other),
            }
        }
        offset = end;
    }
}

#[test]
fn split_crlf_heartbeat() {
    let mut codec = StompCodec::new();
    let mut buf = BytesMut::from(&b"\r"[..]);
    assert!(codec.decode(&mut buf).expect("decode failed").is_none());
    assert_eq!(buf.len(), 1, "a lone CR must stay buffered");
    buf.extend_from_slice(b"\nCONNECT\n\n\0");
    assert_eq!(
        codec.decode(&mut buf).expect("decode failed"),
        Some(StompItem::Heartbeat)
    );
    assert!(matches!(
        codec.decode(&mut buf).expect("decode failed"),
        Some(StompItem::Frame(_))
    ));
}
