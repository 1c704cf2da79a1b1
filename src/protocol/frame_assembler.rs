//! Frame assembler for de-chunking a JSON text stream.
//!
//! JSON-RPC over WebSocket has no length prefix. A single read may hold
//! several complete messages back to back, or only part of one. The assembler
//! infers boundaries from JSON punctuation:
//!
//! - `}` `{`   object followed by object
//! - `}]` `[{` array followed by array
//! - `}` `[{`  object followed by array
//! - `}]` `{`  array followed by object
//!
//! (whitespace between the two values is allowed). A boundary marker is
//! inserted at each match, the text is split on it, and every candidate is
//! decoded on its own. A candidate that fails to decode is treated as
//! incomplete: it becomes the carried fragment and is prepended to whatever
//! follows, in this read or the next.
//!
//! This is a heuristic. A string value containing one of the patterns above
//! is split too, and only heals if the first half fails to decode.
//!
//! # Example
//!
//! ```
//! use rpcstream_client::protocol::{FrameAssembler, Message};
//!
//! let mut assembler = FrameAssembler::new();
//!
//! // Reply split across two reads
//! assert!(assembler.feed(r#"{"id":"1","result":"0x"#).is_empty());
//! let messages = assembler.feed(r#"1"}"#);
//!
//! assert!(matches!(&messages[0], Message::Reply(r) if r.id.correlation_key() == "1"));
//! assert!(assembler.is_empty());
//! ```

use std::sync::{Arc, LazyLock};

use regex::Regex;

use super::envelope::{classify, preview, Message};
use crate::codec::{Codec, JsonCodec};

/// Boundary marker inserted between adjacent values.
///
/// A raw control character cannot appear in valid JSON text, so the marker
/// never collides with message content.
pub const BOUNDARY: char = '\u{1e}';

/// Default upper bound on the carried fragment: 16 MiB.
pub const DEFAULT_MAX_FRAGMENT_LEN: usize = 16 * 1024 * 1024;

/// Boundary insertion rules, applied in order. Captured whitespace is kept so
/// joining two halves back together reproduces the original text.
static BOUNDARY_RULES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"\}(\s*)\{", "}${1}\u{1e}{"),
        (r"\}\](\s*)\[\{", "}]${1}\u{1e}[{"),
        (r"\}(\s*)\[\{", "}${1}\u{1e}[{"),
        (r"\}\](\s*)\{", "}]${1}\u{1e}{"),
    ]
    .into_iter()
    .filter_map(|(pattern, replacement)| match Regex::new(pattern) {
        Ok(re) => Some((re, replacement)),
        Err(e) => {
            tracing::error!("invalid boundary rule {}: {}", pattern, e);
            None
        }
    })
    .collect()
});

/// Insert a [`BOUNDARY`] marker at every detected message boundary.
pub fn insert_boundaries(text: &str) -> String {
    let mut out = text.to_string();
    for (rule, replacement) in BOUNDARY_RULES.iter() {
        out = rule.replace_all(&out, *replacement).into_owned();
    }
    out
}

/// Stateful splitter turning a text stream into decoded [`Message`]s.
///
/// One assembler belongs to one listener; its carried fragment is never
/// shared between connections.
pub struct FrameAssembler {
    /// Tail of earlier input that did not decode yet.
    fragment: String,
    /// Decoder for candidates.
    codec: Arc<dyn Codec>,
    /// Fragments longer than this are dropped.
    max_fragment_len: usize,
}

impl FrameAssembler {
    /// Create an assembler with the JSON codec and default limits.
    pub fn new() -> Self {
        Self::with_codec(Arc::new(JsonCodec::default()))
    }

    /// Create an assembler that decodes candidates with `codec`.
    pub fn with_codec(codec: Arc<dyn Codec>) -> Self {
        Self {
            fragment: String::new(),
            codec,
            max_fragment_len: DEFAULT_MAX_FRAGMENT_LEN,
        }
    }

    /// Set the maximum carried fragment length, in bytes.
    pub fn with_max_fragment_len(mut self, max_fragment_len: usize) -> Self {
        self.max_fragment_len = max_fragment_len;
        self
    }

    /// Push newly read text and return every message completed by it.
    ///
    /// Messages come back in stream order. Incomplete input is buffered
    /// internally; decode failures are never returned as errors.
    pub fn feed(&mut self, text: &str) -> Vec<Message> {
        let mut joined = std::mem::take(&mut self.fragment);
        joined.push_str(text);

        let delimited = insert_boundaries(&joined);
        let mut messages = Vec::new();
        let mut carry: Option<String> = None;

        for candidate in delimited.split(BOUNDARY) {
            if candidate.trim().is_empty() {
                continue;
            }

            let attempt = match carry.take() {
                Some(mut prefix) => {
                    prefix.push_str(candidate);
                    prefix
                }
                None => candidate.to_string(),
            };

            match self.codec.decode(&attempt) {
                Ok(value) => messages.extend(classify(value)),
                Err(_) => carry = Some(attempt),
            }
        }

        if let Some(rest) = carry {
            if rest.len() > self.max_fragment_len {
                tracing::warn!(
                    len = rest.len(),
                    max = self.max_fragment_len,
                    "discarding oversized incomplete fragment"
                );
                messages.push(Message::Unrecognized {
                    raw: preview(&rest),
                    reason: format!(
                        "incomplete fragment exceeded {} bytes",
                        self.max_fragment_len
                    ),
                });
            } else {
                self.fragment = rest;
            }
        }

        messages
    }

    /// The carried fragment awaiting more input.
    pub fn pending_fragment(&self) -> &str {
        &self.fragment
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.fragment.len()
    }

    /// Check if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.fragment.is_empty()
    }

    /// Drop any carried fragment.
    pub fn clear(&mut self) {
        self.fragment.clear();
    }
}

impl Default for FrameAssembler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RequestId;
    use serde_json::json;

    fn reply_ids(messages: &[Message]) -> Vec<String> {
        messages
            .iter()
            .filter_map(|m| match m {
                Message::Reply(r) => Some(r.id.correlation_key()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_single_complete_reply() {
        let mut assembler = FrameAssembler::new();
        let messages = assembler.feed(r#"{"jsonrpc":"2.0","id":"1","result":"0x1"}"#);

        assert_eq!(messages.len(), 1);
        assert_eq!(reply_ids(&messages), vec!["1"]);
        assert!(assembler.is_empty());
    }

    #[test]
    fn test_two_replies_in_one_read() {
        let mut assembler = FrameAssembler::new();
        let messages = assembler.feed(r#"{"id":"1","result":"a"}{"id":"2","result":"b"}"#);

        assert_eq!(reply_ids(&messages), vec!["1", "2"]);
        match (&messages[0], &messages[1]) {
            (Message::Reply(a), Message::Reply(b)) => {
                assert_eq!(a.result, Some(json!("a")));
                assert_eq!(b.result, Some(json!("b")));
            }
            other => panic!("unexpected messages {:?}", other),
        }
        assert!(assembler.is_empty());
    }

    #[test]
    fn test_reply_split_across_reads() {
        let mut assembler = FrameAssembler::new();

        let messages = assembler.feed(r#"{"id":"1","result":"0x"#);
        assert!(messages.is_empty());
        assert_eq!(assembler.pending_fragment(), r#"{"id":"1","result":"0x"#);

        let messages = assembler.feed(r#"1"}"#);
        assert_eq!(messages.len(), 1);
        match &messages[0] {
            Message::Reply(reply) => {
                assert_eq!(reply.id, RequestId::from("1"));
                assert_eq!(reply.result, Some(json!("0x1")));
            }
            other => panic!("expected reply, got {:?}", other),
        }
        assert!(assembler.is_empty());
    }

    #[test]
    fn test_complete_then_partial() {
        let mut assembler = FrameAssembler::new();

        let messages = assembler.feed(r#"{"id":"1","result":"a"}{"id":"2","res"#);
        assert_eq!(reply_ids(&messages), vec!["1"]);
        assert_eq!(assembler.pending_fragment(), r#"{"id":"2","res"#);

        let messages = assembler.feed(r#"ult":"b"}"#);
        assert_eq!(reply_ids(&messages), vec!["2"]);
        assert!(assembler.is_empty());
    }

    #[test]
    fn test_newline_separated_messages() {
        let mut assembler = FrameAssembler::new();
        let messages = assembler.feed("{\"id\":1,\"result\":1}\n{\"id\":2,\"result\":2}\r\n");

        assert_eq!(reply_ids(&messages), vec!["1", "2"]);
        assert!(assembler.is_empty());
    }

    #[test]
    fn test_event_then_reply() {
        let mut assembler = FrameAssembler::new();
        let messages = assembler.feed(
            r#"{"jsonrpc":"2.0","method":"sub_push","params":{"subscription":"0x1","result":7}}{"id":"9","result":null}"#,
        );

        assert_eq!(messages.len(), 2);
        assert!(matches!(&messages[0], Message::Event(e) if e.subscription() == Some("0x1")));
        assert!(matches!(&messages[1], Message::Reply(r) if r.id.correlation_key() == "9"));
    }

    #[test]
    fn test_array_boundaries() {
        let mut assembler = FrameAssembler::new();

        // array then array
        let messages = assembler.feed(r#"[{"id":"1","result":1}][{"id":"2","result":2}]"#);
        assert_eq!(reply_ids(&messages), vec!["1", "2"]);

        // object then array
        let messages = assembler.feed(r#"{"id":"3","result":3}[{"id":"4","result":4}]"#);
        assert_eq!(reply_ids(&messages), vec!["3", "4"]);

        // array then object
        let messages = assembler.feed(r#"[{"id":"5","result":5}]{"id":"6","result":6}"#);
        assert_eq!(reply_ids(&messages), vec!["5", "6"]);

        assert!(assembler.is_empty());
    }

    #[test]
    fn test_batch_split_across_reads() {
        let mut assembler = FrameAssembler::new();

        assert!(assembler.feed(r#"[{"id":"1","result":1},{"id":"2","#).is_empty());
        let messages = assembler.feed(r#""result":2}]"#);

        assert_eq!(reply_ids(&messages), vec!["1", "2"]);
        assert!(assembler.is_empty());
    }

    #[test]
    fn test_string_containing_boundary_heals() {
        let mut assembler = FrameAssembler::new();
        let text = r#"{"id":"1","result":"a}{b"}"#;

        assert!(insert_boundaries(text).contains(BOUNDARY));

        let messages = assembler.feed(text);
        assert_eq!(messages.len(), 1);
        match &messages[0] {
            Message::Reply(reply) => assert_eq!(reply.result, Some(json!("a}{b"))),
            other => panic!("expected reply, got {:?}", other),
        }
        assert!(assembler.is_empty());
    }

    #[test]
    fn test_nested_objects_split_boundary() {
        let mut assembler = FrameAssembler::new();
        let messages = assembler.feed(r#"{"id":"1","result":{"a":{}}}{"id":"2","result":[]}"#);

        assert_eq!(reply_ids(&messages), vec!["1", "2"]);
    }

    #[test]
    fn test_char_at_a_time() {
        let mut assembler = FrameAssembler::new();
        let stream = r#"{"id":"1","result":"x"}{"method":"m","params":{}}"#;

        let mut all = Vec::new();
        for ch in stream.chars() {
            all.extend(assembler.feed(&ch.to_string()));
        }

        assert_eq!(all.len(), 2);
        assert!(matches!(&all[0], Message::Reply(_)));
        assert!(matches!(&all[1], Message::Event(_)));
        assert!(assembler.is_empty());
    }

    #[test]
    fn test_whitespace_only_input() {
        let mut assembler = FrameAssembler::new();
        assert!(assembler.feed("  \n").is_empty());
        assert!(assembler.feed(r#"{"id":"1","result":1}"#).len() == 1);
    }

    #[test]
    fn test_oversized_fragment_discarded() {
        let mut assembler = FrameAssembler::new().with_max_fragment_len(16);

        let messages = assembler.feed(r#"{"id":"1","result":"this never ends"#);
        assert_eq!(messages.len(), 1);
        assert!(matches!(&messages[0], Message::Unrecognized { .. }));
        assert!(assembler.is_empty());

        // Stream continues normally afterwards
        let messages = assembler.feed(r#"{"id":"2","result":2}"#);
        assert_eq!(reply_ids(&messages), vec!["2"]);
    }

    #[test]
    fn test_clear_drops_fragment() {
        let mut assembler = FrameAssembler::new();
        assembler.feed(r#"{"id":"1""#);
        assert!(!assembler.is_empty());
        assert_eq!(assembler.len(), 9);

        assembler.clear();
        assert!(assembler.is_empty());
    }
}
