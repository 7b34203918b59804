//! Transport layer for the debugging-protocol connection.
//!
//! The connection layer is written against the [`Transport`] and
//! [`TransportReceiver`] traits so the JSON-RPC correlation logic can be
//! exercised with the in-memory fake transport. The production
//! implementation is a WebSocket to the remote browser's debugging
//! endpoint.

use std::future::Future;
use std::pin::Pin;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::error::{Error, Result};

/// Sending half of a transport.
pub trait Transport: Send {
    fn send(&mut self, message: Value) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Receiving half of a transport. `run` pumps inbound messages into the
/// channel handed out in [`TransportParts::message_rx`] until the remote
/// side goes away.
pub trait TransportReceiver: Send {
    fn run(self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<()>> + Send>>;
}

/// The pieces a connection is built from.
pub struct TransportParts {
    pub sender: Box<dyn Transport>,
    pub receiver: Box<dyn TransportReceiver>,
    pub message_rx: mpsc::UnboundedReceiver<Value>,
}

type WsSink = futures_util::stream::SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Open a WebSocket to a debugging endpoint and return transport parts.
///
/// The url is typically of the form `ws://host:port/devtools/browser/{id}`,
/// obtained from the endpoint's `/json/version` HTTP handler or from an
/// allocation grant.
pub async fn connect_ws(ws_url: &str) -> Result<TransportParts> {
    tracing::debug!(target = "visor.transport", url = ws_url, "opening debugging WebSocket");

    let (ws_stream, _) = tokio_tungstenite::connect_async(ws_url)
        .await
        .map_err(|e| Error::ConnectionFailed {
            url: ws_url.to_string(),
            reason: e.to_string(),
        })?;

    let (sink, source) = ws_stream.split();
    let (message_tx, message_rx) = mpsc::unbounded_channel();

    Ok(TransportParts {
        sender: Box::new(WsTransportSender { sink }),
        receiver: Box::new(WsTransportReceiver { source, message_tx }),
        message_rx,
    })
}

struct WsTransportSender {
    sink: WsSink,
}

impl Transport for WsTransportSender {
    fn send(&mut self, message: Value) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let text = serde_json::to_string(&message)?;
            self.sink
                .send(Message::Text(text.into()))
                .await
                .map_err(|e| Error::ChannelClosed(format!("WebSocket send failed: {e}")))
        })
    }
}

struct WsTransportReceiver {
    source: WsSource,
    message_tx: mpsc::UnboundedSender<Value>,
}

impl TransportReceiver for WsTransportReceiver {
    fn run(mut self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> {
        Box::pin(async move {
            while let Some(msg_result) = self.source.next().await {
                let msg = match msg_result {
                    Ok(msg) => msg,
                    Err(e) => {
                        tracing::warn!(target = "visor.transport", error = %e, "WebSocket read error, stopping");
                        break;
                    }
                };

                let text = match msg {
                    Message::Text(t) => t.to_string(),
                    Message::Binary(b) => match String::from_utf8(b.to_vec()) {
                        Ok(s) => s,
                        Err(_) => continue,
                    },
                    Message::Close(_) => {
                        tracing::debug!(target = "visor.transport", "WebSocket closed by remote");
                        break;
                    }
                    _ => continue,
                };

                let value: Value = match serde_json::from_str(&text) {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::warn!(target = "visor.transport", error = %e, "dropping unparseable message");
                        continue;
                    }
                };

                if self.message_tx.send(value).is_err() {
                    break;
                }
            }
            Ok(())
        })
    }
}
