use std::collections::VecDeque;
use std::pin::Pin;
use std::task::Context;
use std::task::Poll;

use serde_json::json;
use tokio::io::AsyncRead;
use tokio::io::AsyncWriteExt;
use tokio::io::ReadBuf;

use crate::framer::Scanner;
use crate::message::METHOD_NOT_FOUND;
use crate::*;

// ============================================================================
//  HELPERS
// ============================================================================

/// Reader that hands out one predefined chunk per poll.
struct Chunked {
    chunks: VecDeque<Vec<u8>>,
}

impl Chunked {
    fn new(chunks: &[&[u8]]) -> Self {
        Self { chunks: chunks.iter().map(|c| c.to_vec()).collect() }
    }
}

impl AsyncRead for Chunked {
    fn poll_read(mut self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        if let Some(mut chunk) = self.chunks.pop_front() {
            let n = chunk.len().min(buf.remaining());
            buf.put_slice(&chunk[..n]);
            if n < chunk.len() {
                self.chunks.push_front(chunk.split_off(n));
            }
        }
        Poll::Ready(Ok(()))
    }
}

fn parse(value: serde_json::Value) -> Result<Message> {
    Message::from_slice(&serde_json::to_vec(&value).unwrap())
}

// ============================================================================
//  1. CLASSIFICATION
// ============================================================================

#[test]
fn test_classify_call() {
    let msg = parse(json!({"jsonrpc": "2.0", "id": 7, "method": "echo", "params": {"x": 1}})).unwrap();
    assert_eq!(msg, Message::call(7, "echo", Some(json!({"x": 1}))));
}

#[test]
fn test_classify_call_with_string_id_and_no_params() {
    let msg = parse(json!({"jsonrpc": "2.0", "id": "abc", "method": "ping"})).unwrap();
    assert_eq!(msg, Message::call("abc", "ping", None));
}

#[test]
fn test_classify_notification() {
    let msg = parse(json!({"jsonrpc": "2.0", "method": "progress", "params": [1, 2]})).unwrap();
    assert_eq!(msg, Message::notification("progress", Some(json!([1, 2]))));
    assert!(msg.id().is_none());
}

#[test]
fn test_classify_null_result_is_a_reply() {
    let msg = parse(json!({"jsonrpc": "2.0", "id": 3, "result": null})).unwrap();
    assert_eq!(msg, Message::reply_ok(3, serde_json::Value::Null));
}

#[test]
fn test_classify_error_reply() {
    let msg = parse(json!({
        "jsonrpc": "2.0",
        "id": 4,
        "error": {"code": -32601, "message": "nope", "data": {"method": "missing"}}
    }))
    .unwrap();

    match msg {
        Message::Reply { id, result: Err(err) } => {
            assert_eq!(id, Id::Number(4));
            assert_eq!(err.code, METHOD_NOT_FOUND);
            assert_eq!(err.data, Some(json!({"method": "missing"})));
        }
        other => panic!("Expected error reply, got {:?}", other),
    }
}

#[test]
fn test_unknown_fields_are_ignored() {
    let msg = parse(json!({"jsonrpc": "2.0", "id": 1, "result": 5, "extra": true})).unwrap();
    assert_eq!(msg, Message::reply_ok(1, json!(5)));
}

#[test]
fn test_reject_missing_or_wrong_version() {
    assert!(matches!(parse(json!({"id": 1, "method": "m"})), Err(Error::Malformed(_))));
    assert!(matches!(parse(json!({"jsonrpc": "1.0", "id": 1, "method": "m"})), Err(Error::Malformed(_))));
}

#[test]
fn test_reject_bad_shapes() {
    let cases = [
        json!({"jsonrpc": "2.0"}),
        json!({"jsonrpc": "2.0", "id": 1}),
        json!({"jsonrpc": "2.0", "id": null, "method": "m"}),
        json!({"jsonrpc": "2.0", "id": 1.5, "method": "m"}),
        json!({"jsonrpc": "2.0", "id": {"nested": 1}, "result": 1}),
        json!({"jsonrpc": "2.0", "id": 1, "result": 1, "error": {"code": 1, "message": "x"}}),
        json!({"jsonrpc": "2.0", "id": null, "error": {"code": -32700, "message": "parse"}}),
        json!({"jsonrpc": "2.0", "method": ""}),
        json!({"jsonrpc": "2.0", "method": 12}),
        json!([{"jsonrpc": "2.0", "method": "m"}]),
        json!("just a string"),
    ];

    for case in cases {
        match parse(case.clone()) {
            Err(Error::Malformed(_)) => {}
            other => panic!("Expected Malformed for {}, got {:?}", case, other),
        }
    }
}

#[test]
fn test_integer_and_string_ids_differ() {
    assert_ne!(Id::from(1), Id::from("1"));
}

#[test]
fn test_encoded_envelope_shape() {
    let value = Message::call(1, "echo", None).to_value().unwrap();
    assert_eq!(value, json!({"jsonrpc": "2.0", "id": 1, "method": "echo"}));

    let value = Message::reply_err("a", ErrorObject::method_not_found()).to_value().unwrap();
    assert_eq!(value["error"]["code"], json!(-32601));
    assert!(value.get("result").is_none());

    let value = Message::reply_ok(2, serde_json::Value::Null).to_value().unwrap();
    assert_eq!(value, json!({"jsonrpc": "2.0", "id": 2, "result": null}));
}

// ============================================================================
//  2. SCANNER
// ============================================================================

#[test]
fn test_scanner_ignores_braces_inside_strings() {
    let frame = br#"{"a":"}{][","b":"\"}"} tail"#;
    let mut scanner = Scanner::default();
    let end = scanner.scan(frame).unwrap().unwrap();
    assert_eq!(&frame[end..], b" tail");
}

#[test]
fn test_scanner_handles_escaped_backslash_before_quote() {
    let frame = br#"{"path":"C:\\"}"#;
    let mut scanner = Scanner::default();
    assert_eq!(scanner.scan(frame).unwrap(), Some(frame.len()));
}

#[test]
fn test_scanner_resumes_across_chunks() {
    let whole = br#"{"k":[1,{"n":"x}"}]}"#;
    let mut buf = Vec::new();
    let mut scanner = Scanner::default();

    for (i, byte) in whole.iter().enumerate() {
        buf.push(*byte);
        let found = scanner.scan(&buf).unwrap();
        if i + 1 < whole.len() {
            assert_eq!(found, None, "premature end at byte {}", i);
        } else {
            assert_eq!(found, Some(whole.len()));
        }
    }
}

#[test]
fn test_scanner_rejects_garbage_before_value() {
    let mut scanner = Scanner::default();
    assert!(matches!(scanner.scan(b"  hello"), Err(Error::Malformed(_))));
}

// ============================================================================
//  3. FRAME READER
// ============================================================================

#[tokio::test]
async fn test_reader_splits_back_to_back_values() {
    let bytes = br#"{"jsonrpc":"2.0","method":"a"}{"jsonrpc":"2.0","method":"b"}
{"jsonrpc":"2.0","id":1,"result":true}"#;
    let mut reader = FrameReader::new(Chunked::new(&[bytes]));

    assert_eq!(reader.read_message().await.unwrap().method(), Some("a"));
    assert_eq!(reader.read_message().await.unwrap().method(), Some("b"));
    assert_eq!(reader.read_message().await.unwrap(), Message::reply_ok(1, json!(true)));
    assert_eq!(reader.read_message().await, Err(Error::Eof));
}

#[tokio::test]
async fn test_reader_reassembles_split_value() {
    let chunks: [&[u8]; 4] = [br#"{"jsonrpc":"2"#, br#".0","id":9,"#, br#""method":"sp\"lit""#, b"}\n"];
    let mut reader = FrameReader::new(Chunked::new(&chunks));

    let msg = reader.read_message().await.unwrap();
    assert_eq!(msg, Message::call(9, "sp\"lit", None));
    assert_eq!(reader.read_message().await, Err(Error::Eof));
}

#[tokio::test]
async fn test_reader_eof_with_only_whitespace_is_clean() {
    let mut reader = FrameReader::new(Chunked::new(&[b"  \n\t "]));
    assert_eq!(reader.read_message().await, Err(Error::Eof));
}

#[tokio::test]
async fn test_reader_eof_inside_value_is_malformed() {
    let mut reader = FrameReader::new(Chunked::new(&[br#"{"jsonrpc":"2.0","id":"#]));
    assert!(matches!(reader.read_message().await, Err(Error::Malformed(_))));
}

#[tokio::test]
async fn test_reader_reports_invalid_json() {
    let mut reader = FrameReader::new(Chunked::new(&[b"{not json}"]));
    assert!(matches!(reader.read_message().await, Err(Error::Malformed(_))));
}

#[tokio::test]
async fn test_reader_enforces_frame_limit() {
    let config = FramerConfig { max_frame_len: 64, ..FramerConfig::default() };
    let big = format!(r#"{{"jsonrpc":"2.0","method":"m","params":"{}"}}"#, "x".repeat(200));
    let mut reader = FrameReader::with_config(Chunked::new(&[&big.as_bytes()[..100], &big.as_bytes()[100..]]), &config);

    assert_eq!(reader.read_message().await, Err(Error::Oversized { limit: 64 }));
}

// ============================================================================
//  4. FRAME WRITER
// ============================================================================

#[tokio::test]
async fn test_writer_output_is_readable_over_a_pipe() {
    let (a, b) = tokio::io::duplex(64);
    let mut writer = FrameWriter::new(a);
    let mut reader = FrameReader::new(b);

    let sent = vec![
        Message::call(1, "echo", Some(json!({"x": 1}))),
        Message::notification("tick", None),
        Message::reply_err(1, ErrorObject::handler_failed("boom").with_data(json!("ctx"))),
    ];

    let expected = sent.clone();
    let write_task = tokio::spawn(async move {
        for msg in &sent {
            writer.write_message(msg).await.unwrap();
        }
        writer.shutdown().await.unwrap();
    });

    for msg in expected {
        assert_eq!(reader.read_message().await.unwrap(), msg);
    }
    assert_eq!(reader.read_message().await, Err(Error::Eof));
    write_task.await.unwrap();
}

#[tokio::test]
async fn test_writer_without_newline() {
    let config = FramerConfig { trailing_newline: false, ..FramerConfig::default() };
    let mut writer = FrameWriter::with_config(Vec::new(), &config);
    writer.write_message(&Message::notification("n", None)).await.unwrap();

    let bytes = writer.into_inner();
    assert_eq!(bytes.last(), Some(&b'}'));
}

#[tokio::test]
async fn test_free_functions_round_trip_one_message() {
    let (mut a, b) = tokio::io::duplex(256);
    let msg = Message::call("id-1", "one/shot", Some(json!([1, 2, 3])));

    write_message(&mut a, &msg).await.unwrap();
    a.shutdown().await.unwrap();

    assert_eq!(read_message(b).await.unwrap(), msg);
}
