// tests/unit_resp_test.rs

use bytes::{Bytes, BytesMut};
use citrinedb::core::protocol::{RespFrame, RespFrameCodec};
use tokio_util::codec::Decoder;

fn decode_all(input: &[u8]) -> Vec<RespFrame> {
    let mut codec = RespFrameCodec;
    let mut buf = BytesMut::from(input);
    let mut frames = Vec::new();
    while let Some(frame) = codec.decode(&mut buf).expect("valid input") {
        frames.push(frame);
    }
    frames
}

#[test]
fn test_simple_string_round_trip() {
    let frames = decode_all(b"+FULLRESYNC abc123 42\r\n");
    assert_eq!(
        frames,
        vec![RespFrame::SimpleString("FULLRESYNC abc123 42".into())]
    );
}

#[test]
fn test_error_frame() {
    let frames = decode_all(b"-ERR unknown command 'PSYNC'\r\n");
    assert_eq!(
        frames,
        vec![RespFrame::Error("ERR unknown command 'PSYNC'".into())]
    );
}

#[test]
fn test_command_array_round_trip() {
    let frame = RespFrame::Array(vec![
        RespFrame::BulkString(Bytes::from_static(b"SET")),
        RespFrame::BulkString(Bytes::from_static(b"key")),
        RespFrame::BulkString(Bytes::from_static(b"value")),
    ]);
    let encoded = frame.encode_to_vec().unwrap();
    assert_eq!(
        &encoded[..],
        b"*3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$5\r\nvalue\r\n"
    );
    assert_eq!(decode_all(&encoded), vec![frame]);
}

#[test]
fn test_incomplete_frame_waits_for_more_data() {
    let mut codec = RespFrameCodec;
    let mut buf = BytesMut::from(&b"*2\r\n$3\r\nfoo\r\n$3\r\nba"[..]);
    assert!(codec.decode(&mut buf).unwrap().is_none());

    buf.extend_from_slice(b"r\r\n");
    let frame = codec.decode(&mut buf).unwrap().unwrap();
    assert_eq!(
        frame,
        RespFrame::Array(vec![
            RespFrame::BulkString(Bytes::from_static(b"foo")),
            RespFrame::BulkString(Bytes::from_static(b"bar")),
        ])
    );
}

#[test]
fn test_null_and_null_array() {
    assert_eq!(decode_all(b"$-1\r\n"), vec![RespFrame::Null]);
    assert_eq!(decode_all(b"*-1\r\n"), vec![RespFrame::NullArray]);
}

#[test]
fn test_pipelined_frames_decode_in_order() {
    let frames = decode_all(b":1\r\n:2\r\n+OK\r\n");
    assert_eq!(
        frames,
        vec![
            RespFrame::Integer(1),
            RespFrame::Integer(2),
            RespFrame::SimpleString("OK".into()),
        ]
    );
}

#[test]
fn test_garbage_prefix_is_rejected() {
    let mut codec = RespFrameCodec;
    let mut buf = BytesMut::from(&b"hello\r\n"[..]);
    assert!(codec.decode(&mut buf).is_err());
}

/// Offset accounting on replicas depends on re-encoded length equalling wire
/// length for every stream frame shape.
#[test]
fn test_encoded_len_matches_encoding() {
    let samples = vec![
        RespFrame::SimpleString("CONTINUE".into()),
        RespFrame::Error("ERR boom".into()),
        RespFrame::Integer(-1234),
        RespFrame::BulkString(Bytes::from_static(b"payload")),
        RespFrame::Null,
        RespFrame::NullArray,
        RespFrame::Array(vec![
            RespFrame::BulkString(Bytes::from_static(b"REPLCONF")),
            RespFrame::BulkString(Bytes::from_static(b"ACK")),
            RespFrame::BulkString(Bytes::from_static(b"10456")),
        ]),
    ];
    for frame in samples {
        let encoded = frame.encode_to_vec().unwrap();
        assert_eq!(frame.encoded_len(), encoded.len(), "frame: {frame:?}");
    }
}
