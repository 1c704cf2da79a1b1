//! Protocol module - JSON-RPC envelopes and stream framing.
//!
//! This module implements the text protocol for the WebSocket stream:
//! - Request, reply and push-event envelopes
//! - Reply/event classification by presence of `id`
//! - Frame assembler for splitting and rejoining messages across reads

mod envelope;
mod frame_assembler;

pub use envelope::{
    classify, Message, RequestId, RpcError, RpcRequest, RpcResponse, StreamingMessage,
    JSONRPC_VERSION,
};
pub use frame_assembler::{insert_boundaries, FrameAssembler, BOUNDARY, DEFAULT_MAX_FRAGMENT_LEN};
