//! WebSocket transport over `tokio-tungstenite`.

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::{BoxFuture, BoxSink, BoxSource, Connector, FrameSink, FrameSource};
use crate::error::Result;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connector for `ws://` (and, with the `rustls` feature, `wss://`) endpoints.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl WsConnector {
    /// Create a WebSocket connector.
    pub fn new() -> Self {
        Self
    }
}

impl Connector for WsConnector {
    fn connect<'a>(&'a self, endpoint: &'a str) -> BoxFuture<'a, Result<(BoxSink, BoxSource)>> {
        Box::pin(async move {
            let (stream, response) = connect_async(endpoint).await?;
            tracing::debug!(endpoint, status = %response.status(), "WebSocket handshake complete");

            let (sink, stream) = stream.split();
            let sink: BoxSink = Box::new(WsSink { sink });
            let source: BoxSource = Box::new(WsSource { stream });
            Ok((sink, source))
        })
    }
}

struct WsSink {
    sink: SplitSink<WsStream, Message>,
}

impl FrameSink for WsSink {
    fn send_text(&mut self, text: String) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.sink.send(Message::Text(text.into())).await?;
            Ok(())
        })
    }

    fn close(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.sink.close().await?;
            Ok(())
        })
    }
}

struct WsSource {
    stream: SplitStream<WsStream>,
}

impl FrameSource for WsSource {
    fn next_text(&mut self) -> BoxFuture<'_, Result<Option<String>>> {
        Box::pin(async move {
            loop {
                let message = match self.stream.next().await {
                    Some(message) => message?,
                    None => return Ok(None),
                };

                match message {
                    Message::Text(text) => return Ok(Some(text.as_str().to_owned())),
                    Message::Binary(data) => match String::from_utf8(data.to_vec()) {
                        Ok(text) => return Ok(Some(text)),
                        Err(_) => {
                            tracing::warn!(len = data.len(), "dropping non-UTF-8 binary frame");
                        }
                    },
                    Message::Close(frame) => {
                        tracing::debug!(?frame, "peer sent close frame");
                        return Ok(None);
                    }
                    // Pongs are answered by tungstenite while the stream is polled.
                    Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
                }
            }
        })
    }
}
