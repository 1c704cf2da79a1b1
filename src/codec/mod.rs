//! Codec module - serialization of request envelopes and decoding of
//! incoming text.
//!
//! The client is generic over a [`Codec`] so callers can change how requests
//! are rendered (e.g. pretty-printed for debugging proxies) without touching
//! the transport. [`JsonCodec`] is the default.
//!
//! # Example
//!
//! ```
//! use rpcstream_client::codec::{Codec, JsonCodec};
//! use rpcstream_client::protocol::RpcRequest;
//!
//! let codec = JsonCodec::default();
//! let request = RpcRequest::without_params(1i64, "eth_chainId");
//! let text = codec.encode_request(&request).unwrap();
//! assert_eq!(text, r#"{"jsonrpc":"2.0","id":1,"method":"eth_chainId"}"#);
//! ```

mod json;

pub use json::JsonCodec;

use serde_json::Value;

use crate::error::Result;
use crate::protocol::RpcRequest;

/// Serializer/deserializer for the wire envelopes.
pub trait Codec: Send + Sync + 'static {
    /// Render one request as a single text frame.
    fn encode_request(&self, request: &RpcRequest) -> Result<String>;

    /// Render a batch of requests as a single text frame.
    fn encode_batch(&self, requests: &[RpcRequest]) -> Result<String>;

    /// Decode one frame candidate into a JSON value.
    ///
    /// An error means the candidate is malformed or incomplete.
    fn decode(&self, text: &str) -> Result<Value>;
}
