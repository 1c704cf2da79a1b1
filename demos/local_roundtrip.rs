//! Local round trip - client and a toy JSON-RPC server in one process.
//!
//! This example demonstrates:
//! - Concurrent calls multiplexed over one WebSocket
//! - Replies arriving out of order and packed into a single message
//! - Push events delivered through `subscribe()`
//!
//! # Running
//!
//! ```text
//! RUST_LOG=rpcstream_client=debug cargo run --example local_roundtrip
//! ```

use futures::{SinkExt, StreamExt};
use rpcstream_client::{RpcRequest, StreamingClient};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

/// Answer requests in pairs, newest first, both in one frame, followed by a
/// subscription notification.
async fn serve(listener: TcpListener) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (stream, peer) = listener.accept().await?;
    let mut ws = tokio_tungstenite::accept_async(stream).await?;
    tracing::info!(%peer, "server: client connected");

    let mut held: Option<RpcRequest> = None;
    while let Some(message) = ws.next().await {
        let text = match message? {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let request: RpcRequest = serde_json::from_str(text.as_str())?;

        match held.take() {
            None => held = Some(request),
            Some(older) => {
                let batch = format!(
                    "{}{}{}",
                    json!({"jsonrpc": "2.0", "id": request.id, "result": request.method}),
                    json!({"jsonrpc": "2.0", "id": older.id, "result": older.method}),
                    json!({
                        "jsonrpc": "2.0",
                        "method": "demo_subscription",
                        "params": {"subscription": "0x1", "result": {"answered": [older.id, request.id]}},
                    }),
                );
                ws.send(Message::text(batch)).await?;
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let endpoint = format!("ws://{}", listener.local_addr()?);
    tokio::spawn(async move {
        if let Err(e) = serve(listener).await {
            tracing::error!("server error: {}", e);
        }
    });

    let client = StreamingClient::builder(&endpoint)
        .on_event(|event| tracing::info!(params = ?event.params, "push event"))
        .build()?;
    let mut events = client.subscribe();

    let mut calls = Vec::new();
    for (id, method) in ["eth_chainId", "eth_blockNumber", "net_version", "web3_clientVersion"]
        .into_iter()
        .enumerate()
    {
        let client = client.clone();
        calls.push(tokio::spawn(async move {
            client
                .send(RpcRequest::without_params(id as i64, method))
                .await
        }));
    }

    for call in calls {
        let reply = call.await??;
        let id = reply.id.clone();
        println!("reply {} -> {}", id, reply.into_result()?);
    }

    for _ in 0..2 {
        if let Some(event) = events.recv().await {
            println!("event on {:?}: {:?}", event.subscription(), event.result());
        }
    }

    client.close().await;
    Ok(())
}
