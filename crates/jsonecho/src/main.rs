//! Serves a small echo registry over stdin/stdout.
//!
//! Environment:
//! - `JSONECHO_NAME`: name used in logs (default `jsonecho`).
//! - `JSONECHO_MAX_FRAME_LEN`: largest accepted message in bytes (default 16 MiB).
//! - `RUST_LOG`: log filter. Logs go to stderr, stdout carries the protocol.

use anyhow::Context;
use serde_json::json;
use serde_json::Value;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use jsonpeer::ErrorObject;
use jsonpeer::Server;
use jsonpeer::Transport;

const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

fn max_frame_len() -> anyhow::Result<usize> {
    match std::env::var("JSONECHO_MAX_FRAME_LEN") {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("JSONECHO_MAX_FRAME_LEN is not a byte count: {:?}", raw)),
        Err(_) => Ok(DEFAULT_MAX_FRAME_LEN),
    }
}

fn build_server(name: String, max_frame_len: usize) -> Server {
    Server::builder()
        .name(name)
        .max_frame_len(max_frame_len)
        .handler_fn("echo", |_cx, params| async move { Ok(params.unwrap_or(Value::Null)) })
        .handler_fn("ping", |_cx, _params| async move { Ok(json!("pong")) })
        .handler_fn("add", |_cx, params| async move {
            let Some(Value::Array(items)) = params else {
                return Err(ErrorObject::invalid_params("expected an array of numbers"));
            };
            let mut sum = 0.0;
            for item in items {
                match item.as_f64() {
                    Some(n) => sum += n,
                    None => return Err(ErrorObject::invalid_params(format!("not a number: {}", item))),
                }
            }
            Ok(json!(sum))
        })
        .handler_fn("exit", |cx, _params| async move {
            cx.close_after_reply();
            Ok(Value::Null)
        })
        .build()
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start runtime")?;

    let result = runtime.block_on(serve());

    // A blocked stdin read would otherwise hold up runtime shutdown.
    runtime.shutdown_background();
    result
}

async fn serve() -> anyhow::Result<()> {
    let name = std::env::var("JSONECHO_NAME").unwrap_or_else(|_| "jsonecho".to_string());
    let server = build_server(name, max_frame_len()?);
    tracing::info!(methods = ?server.registry().methods(), "serving on stdio");

    let id = server.accept(Transport::stdio());
    if let Some(conn) = server.connection(id) {
        conn.closed().await;
        if let Some(reason) = conn.close_reason() {
            tracing::info!(%reason, "stdio connection ended");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use jsonpeer::ErrorKind;
    use jsonpeer::Peer;

    use super::*;

    fn connect() -> (Server, Peer) {
        let server = build_server("test".to_string(), DEFAULT_MAX_FRAME_LEN);
        let (client_side, server_side) = Transport::memory_pair();
        server.accept(server_side);
        let (peer, _events) = Peer::connect(client_side);
        (server, peer)
    }

    #[tokio::test]
    async fn test_echo_and_ping() {
        let (_server, peer) = connect();

        assert_eq!(peer.call("echo", Some(json!({"k": [1, 2]}))).await, Ok(json!({"k": [1, 2]})));
        assert_eq!(peer.call("ping", None).await, Ok(json!("pong")));
    }

    #[tokio::test]
    async fn test_add_validates_params() {
        let (_server, peer) = connect();

        assert_eq!(peer.call("add", Some(json!([1, 2.5]))).await, Ok(json!(3.5)));

        let err = peer.call("add", Some(json!([1, "two"]))).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::HandlerFailed);
    }

    #[tokio::test]
    async fn test_exit_closes_after_replying() {
        let (_server, peer) = connect();

        assert_eq!(peer.call("exit", None).await, Ok(Value::Null));
        peer.closed().await;
    }
}
