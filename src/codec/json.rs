//! JSON codec using `serde_json`.

use serde::Serialize;
use serde_json::Value;

use super::Codec;
use crate::error::Result;
use crate::protocol::RpcRequest;

/// JSON codec for request and reply envelopes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JsonCodec {
    pretty: bool,
}

impl JsonCodec {
    /// Compact output (the default).
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretty-printed output.
    ///
    /// Multi-line frames are still a single WebSocket message; only peers
    /// that split on newlines would be confused by this.
    pub fn pretty() -> Self {
        Self { pretty: true }
    }

    /// Whether this codec pretty-prints.
    pub fn is_pretty(&self) -> bool {
        self.pretty
    }

    fn render<T: Serialize + ?Sized>(&self, value: &T) -> Result<String> {
        let text = if self.pretty {
            serde_json::to_string_pretty(value)?
        } else {
            serde_json::to_string(value)?
        };
        Ok(text)
    }
}

impl Codec for JsonCodec {
    #[inline]
    fn encode_request(&self, request: &RpcRequest) -> Result<String> {
        self.render(request)
    }

    #[inline]
    fn encode_batch(&self, requests: &[RpcRequest]) -> Result<String> {
        self.render(requests)
    }

    #[inline]
    fn decode(&self, text: &str) -> Result<Value> {
        Ok(serde_json::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encode_request_compact() {
        let codec = JsonCodec::new();
        let request = RpcRequest::new("7", "eth_getBalance", json!(["0xabc", "latest"]));
        let text = codec.encode_request(&request).unwrap();
        assert_eq!(
            text,
            r#"{"jsonrpc":"2.0","id":"7","method":"eth_getBalance","params":["0xabc","latest"]}"#
        );
        assert!(!codec.is_pretty());
    }

    #[test]
    fn test_encode_request_pretty() {
        let codec = JsonCodec::pretty();
        let request = RpcRequest::without_params(1i64, "net_version");
        let text = codec.encode_request(&request).unwrap();
        assert!(text.contains('\n'));
        let back: RpcRequest = serde_json::from_str(&text).unwrap();
        assert_eq!(back, request);
    }

    #[test]
    fn test_encode_batch_is_array() {
        let codec = JsonCodec::new();
        let requests = vec![
            RpcRequest::without_params(1i64, "a"),
            RpcRequest::without_params(2i64, "b"),
        ];
        let text = codec.encode_batch(&requests).unwrap();
        assert!(text.starts_with("[{"));
        assert!(text.ends_with("}]"));
    }

    #[test]
    fn test_decode_incomplete_fails() {
        let codec = JsonCodec::new();
        assert!(codec.decode(r#"{"id":"1","result":"0x"#).is_err());
        assert_eq!(codec.decode(r#"{"id":"1"}"#).unwrap(), json!({"id": "1"}));
    }
}
