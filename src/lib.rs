//! # rpcstream-client
//!
//! JSON-RPC 2.0 client over one persistent WebSocket connection.
//!
//! Many concurrent callers share a single connection. Each call is matched
//! to its reply by the caller-assigned `id`; messages without an `id` are
//! server-pushed events (subscription notifications) and go to event
//! callbacks and subscribers instead.
//!
//! ## Architecture
//!
//! - **Send gate** ([`StreamingClient`]): async mutex serializing connect and
//!   write; registers each call before its request hits the wire
//! - **Listener** (background task, one per connection): reads text, splits
//!   it into messages with the [`FrameAssembler`](protocol::FrameAssembler)
//!   and routes replies to the correlation table and events to the hub
//! - **Transport** ([`transport`]): WebSocket via `tokio-tungstenite`, or an
//!   in-memory transport for tests
//!
//! ## Example
//!
//! ```ignore
//! use rpcstream_client::{RpcRequest, StreamingClient};
//!
//! #[tokio::main]
//! async fn main() -> rpcstream_client::Result<()> {
//!     let client = StreamingClient::new("ws://127.0.0.1:8546")?;
//!     let mut events = client.subscribe();
//!
//!     let reply = client
//!         .send(RpcRequest::new(1i64, "eth_subscribe", serde_json::json!(["newHeads"])))
//!         .await?;
//!     println!("subscription id: {:?}", reply.result);
//!
//!     while let Some(event) = events.recv().await {
//!         println!("{:?}", event.result());
//!     }
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod config;
pub mod correlator;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod listener;
pub mod protocol;
pub mod transport;

mod client;

pub use client::{ClientBuilder, StreamingClient};
pub use config::ClientConfig;
pub use error::{ClientError, Result};
pub use events::{Diagnostic, EventSubscription};
pub use protocol::{RequestId, RpcError, RpcRequest, RpcResponse, StreamingMessage};
pub use transport::ConnectionState;
