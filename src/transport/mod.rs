//! Transport module - connection seams and their implementations.
//!
//! Provides:
//! - [`Connector`], [`FrameSink`], [`FrameSource`] - the seams the client
//!   talks to
//! - [`WsConnector`] - WebSocket via `tokio-tungstenite` (text frames)
//! - [`memory`] - in-process transport for tests and demos
//! - [`ConnectionSupervisor`] - lazy, bounded-time connection lifecycle

pub mod memory;
mod supervisor;
mod websocket;

pub use supervisor::{ConnectionState, ConnectionSupervisor};
pub use websocket::WsConnector;

use std::future::Future;
use std::pin::Pin;

use crate::error::Result;

/// Boxed future returned by the transport traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Write half of an open connection.
pub type BoxSink = Box<dyn FrameSink>;

/// Read half of an open connection.
pub type BoxSource = Box<dyn FrameSource>;

/// Opens connections to an endpoint.
pub trait Connector: Send + Sync + 'static {
    /// Open one connection and return its write and read halves.
    fn connect<'a>(&'a self, endpoint: &'a str) -> BoxFuture<'a, Result<(BoxSink, BoxSource)>>;
}

/// Sends whole text frames.
pub trait FrameSink: Send {
    /// Send one text frame.
    fn send_text(&mut self, text: String) -> BoxFuture<'_, Result<()>>;

    /// Close the connection from our side.
    fn close(&mut self) -> BoxFuture<'_, Result<()>>;
}

/// Yields received text in arbitrary chunks.
pub trait FrameSource: Send {
    /// Wait for the next chunk. `Ok(None)` means the peer closed.
    fn next_text(&mut self) -> BoxFuture<'_, Result<Option<String>>>;
}
