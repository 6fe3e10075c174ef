//! Long-running sequential call scenario between one client and one server.

use serde_json::json;
use serde_json::Value;

use jsonpeer::CloseReason;
use jsonpeer::Error;
use jsonpeer::Event;
use jsonpeer::Peer;
use jsonpeer::Server;
use jsonpeer::Transport;

const OPERATIONS: i64 = 1000;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn operation_server() -> Server {
    Server::builder()
        .name("stress-server")
        .handler_fn("some/operation", |cx, params| async move {
            let ops_left = params.as_ref().and_then(|p| p["ops-left"].as_i64()).unwrap_or(0);
            if ops_left == 1 {
                cx.close_after_reply();
            }

            let id = cx.id().map(|id| serde_json::to_value(id).unwrap_or(Value::Null));
            Ok(json!({
                "method": cx.method(),
                "id": id,
                "params": params,
            }))
        })
        .build()
}

#[tokio::test]
async fn test_thousand_sequential_calls_then_server_closes() -> anyhow::Result<()> {
    init_tracing();

    let (client_side, server_side) = Transport::memory_pair();
    let server = operation_server();
    server.accept(server_side);

    let (client, mut events) = Peer::builder().name("stress-client").connect(client_side);

    for (n, ops_left) in (1..=OPERATIONS).rev().enumerate() {
        let params = json!({"ops-left": ops_left});
        let reply = client.call("some/operation", Some(params.clone())).await?;

        assert_eq!(reply["method"], json!("some/operation"));
        assert_eq!(reply["id"], json!(n as i64 + 1));
        assert_eq!(reply["params"], params);
    }

    // Server hangs up once the last reply has been written.
    match events.recv().await {
        Some(Event::Closed(reason)) => assert_eq!(reason, CloseReason::Eof),
        other => panic!("Expected Closed, got {:?}", other),
    }
    assert!(events.recv().await.is_none());

    assert_eq!(client.call("some/operation", Some(json!({"ops-left": 0}))).await, Err(Error::ConnectionClosed));
    assert_eq!(client.pending_count(), 0);

    Ok(())
}

#[tokio::test]
async fn test_call_right_after_closing_reply_fails_with_connection_closed() -> anyhow::Result<()> {
    init_tracing();

    let server = Server::builder()
        .handler_fn("last", |cx, _params| async move {
            cx.close_after_reply();
            Ok(json!("bye"))
        })
        .build();

    for _ in 0..200 {
        let (client_side, server_side) = Transport::memory_pair();
        server.accept(server_side);
        let (client, _events) = Peer::connect(client_side);

        assert_eq!(client.call("last", None).await?, json!("bye"));
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }

        // Whether the server's hang-up or this write lands first, the outcome is the same.
        assert_eq!(client.call("last", None).await, Err(Error::ConnectionClosed));
        assert_eq!(client.pending_count(), 0);
    }

    Ok(())
}

#[tokio::test]
async fn test_concurrent_calls_over_one_connection() -> anyhow::Result<()> {
    init_tracing();

    let (client_side, server_side) = Transport::memory_pair();
    let server = Server::builder()
        .handler_fn("square", |_cx, params| async move {
            let n = params.and_then(|p| p.as_i64()).unwrap_or(0);
            tokio::task::yield_now().await;
            Ok(json!(n * n))
        })
        .build();
    server.accept(server_side);

    let (client, _events) = Peer::connect(client_side);

    let mut tasks = Vec::new();
    for n in 0..200i64 {
        let client = client.clone();
        tasks.push(tokio::spawn(async move { (n, client.call("square", Some(json!(n))).await) }));
    }

    for task in tasks {
        let (n, result) = task.await?;
        assert_eq!(result?, json!(n * n));
    }
    assert_eq!(client.pending_count(), 0);

    Ok(())
}
