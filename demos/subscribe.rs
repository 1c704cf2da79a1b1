//! Subscribe - print new block headers from an Ethereum-style node.
//!
//! The endpoint is read from the environment (see `ClientConfig::from_env`).
//!
//! # Running
//!
//! ```text
//! RPCSTREAM_ENDPOINT=ws://127.0.0.1:8546 \
//! RPCSTREAM_READ_TIMEOUT_MS=60000 \
//!     cargo run --example subscribe
//! ```
//!
//! The read timeout must exceed the block interval, otherwise the quiet
//! connection is dropped between blocks.

use rpcstream_client::{ClientBuilder, ClientConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = ClientConfig::from_env()?;
    let client = ClientBuilder::from_config(config)
        .on_diagnostic(|d| tracing::debug!("{}", d))
        .build()?;
    let mut events = client.subscribe();

    let subscription: String = client
        .request(1i64, "eth_subscribe", ["newHeads"])
        .await?;
    println!("subscribed: {}", subscription);

    while let Some(event) = events.recv().await {
        if event.subscription() != Some(subscription.as_str()) {
            continue;
        }
        let number = event
            .result()
            .and_then(|header| header.get("number"))
            .and_then(|n| n.as_str())
            .unwrap_or("?");
        println!("block {}", number);
    }

    Ok(())
}
