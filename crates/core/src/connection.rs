//! JSON-RPC connection layer for the remote debugging protocol.
//!
//! Implements request/response correlation on top of the transport:
//! - Generating unique command ids
//! - Correlating responses with pending commands
//! - Distinguishing events from responses (events carry no `id`)
//! - Forwarding events, tagged with their page session, to the consumer
//!
//! # Message Flow
//!
//! 1. Caller invokes `send_command()` with method, params and an optional
//!    page session id
//! 2. Connection generates a unique id and creates a oneshot channel
//! 3. The command is serialized and sent via the transport
//! 4. Caller awaits on the oneshot receiver (with a timeout)
//! 5. The message loop receives the response from the transport
//! 6. The response is correlated by id and completes the oneshot
//!
//! Events are pushed to the receiver returned by [`CdpConnection::new`];
//! if nobody is listening they are dropped.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{Mutex, mpsc, oneshot};

use crate::error::{Error, Result};
use crate::transport::{TransportParts, TransportReceiver};

/// Default timeout for a single protocol command.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// An event received from the remote browser.
#[derive(Debug, Clone)]
pub struct CdpEvent {
    /// The event method name (e.g. `Page.screencastFrame`).
    pub method: String,
    /// The event parameters.
    pub params: Value,
    /// Page session the event belongs to, if any. Browser-level events
    /// (target discovery) carry no session.
    pub session_id: Option<String>,
}

/// Error object embedded in a failed response.
#[derive(Debug, Clone, serde::Deserialize)]
struct ResponseError {
    code: i64,
    message: String,
}

/// Connection to a remote debugging endpoint.
///
/// Thread-safe; share across tasks with `Arc`. Multiple concurrent
/// commands are supported, including commands scoped to different page
/// sessions over the same socket.
pub struct CdpConnection {
    /// Sequential command id counter.
    last_id: AtomicU64,
    /// Pending commands awaiting responses, keyed by id.
    callbacks: Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value>>>>>,
    /// Transport write half.
    sender: Mutex<Box<dyn crate::transport::Transport>>,
    /// Receiver half, taken by `run()`.
    pump: parking_lot::Mutex<Option<(Box<dyn TransportReceiver>, mpsc::UnboundedReceiver<Value>)>>,
    /// Outgoing event stream.
    event_tx: mpsc::UnboundedSender<CdpEvent>,
}

impl CdpConnection {
    /// Create a connection over the given transport.
    ///
    /// Returns the connection and the stream of events it will forward.
    /// Spawn [`CdpConnection::run`] in a background task before sending
    /// commands.
    pub fn new(parts: TransportParts) -> (Self, mpsc::UnboundedReceiver<CdpEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let connection = Self {
            last_id: AtomicU64::new(1),
            callbacks: Arc::new(Mutex::new(HashMap::new())),
            sender: Mutex::new(parts.sender),
            pump: parking_lot::Mutex::new(Some((parts.receiver, parts.message_rx))),
            event_tx,
        };
        (connection, event_rx)
    }

    /// Send a command and await its response with the default timeout.
    ///
    /// `session_id` scopes the command to an attached page session; `None`
    /// targets the browser-level connection.
    pub async fn send_command(
        &self,
        method: &str,
        params: Value,
        session_id: Option<&str>,
    ) -> Result<Value> {
        self.send_command_with_timeout(method, params, session_id, DEFAULT_COMMAND_TIMEOUT)
            .await
    }

    /// Send a command with an explicit timeout.
    pub async fn send_command_with_timeout(
        &self,
        method: &str,
        params: Value,
        session_id: Option<&str>,
        timeout: Duration,
    ) -> Result<Value> {
        let id = self.last_id.fetch_add(1, Ordering::SeqCst);

        let mut message = serde_json::json!({
            "id": id,
            "method": method,
            "params": params,
        });
        if let Some(sid) = session_id {
            message["sessionId"] = Value::String(sid.to_string());
        }

        tracing::trace!(target = "visor.cdp", id, method, "sending command");

        // Register the pending response before sending to avoid races.
        let (tx, rx) = oneshot::channel();
        self.callbacks.lock().await.insert(id, tx);

        {
            let mut sender = self.sender.lock().await;
            if let Err(e) = sender.send(message).await {
                self.callbacks.lock().await.remove(&id);
                return Err(e);
            }
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::ChannelClosed(
                "response channel closed before reply".to_string(),
            )),
            Err(_) => {
                self.callbacks.lock().await.remove(&id);
                Err(Error::Timeout {
                    method: method.to_string(),
                    duration: timeout,
                })
            }
        }
    }

    /// Run the message dispatch loop until the transport closes.
    ///
    /// Spawn in a background task; can only be called once.
    pub async fn run(&self) {
        let (receiver, mut message_rx) = self
            .pump
            .lock()
            .take()
            .expect("run() can only be called once");

        let receiver_handle = tokio::spawn(async move {
            if let Err(e) = receiver.run().await {
                tracing::warn!(target = "visor.cdp", error = %e, "transport receiver error");
            }
        });

        while let Some(message) = message_rx.recv().await {
            self.dispatch(message).await;
        }

        tracing::debug!(target = "visor.cdp", "message loop ended (transport closed)");

        // Fail any commands still in flight so callers do not hang.
        let mut callbacks = self.callbacks.lock().await;
        for (_, tx) in callbacks.drain() {
            let _ = tx.send(Err(Error::ChannelClosed(
                "connection closed with command in flight".to_string(),
            )));
        }
        drop(callbacks);

        let _ = receiver_handle.await;
    }

    /// Dispatch a single inbound message.
    ///
    /// Messages with an `id` are responses to pending commands; messages
    /// with a `method` and no `id` are events.
    async fn dispatch(&self, message: Value) {
        if let Some(id) = message.get("id").and_then(Value::as_u64) {
            let callback = self.callbacks.lock().await.remove(&id);
            let Some(callback) = callback else {
                tracing::debug!(target = "visor.cdp", id, "response for unknown command id");
                return;
            };

            let result = match message.get("error") {
                Some(err) => {
                    let parsed: ResponseError = serde_json::from_value(err.clone())
                        .unwrap_or(ResponseError {
                            code: -1,
                            message: err.to_string(),
                        });
                    Err(Error::Cdp {
                        code: parsed.code,
                        message: parsed.message,
                    })
                }
                None => Ok(message.get("result").cloned().unwrap_or(Value::Null)),
            };

            let _ = callback.send(result);
        } else if let Some(method) = message.get("method").and_then(Value::as_str) {
            let event = CdpEvent {
                method: method.to_string(),
                params: message.get("params").cloned().unwrap_or(Value::Null),
                session_id: message
                    .get("sessionId")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            };
            // If nobody is listening, drop the event.
            let _ = self.event_tx.send(event);
        } else {
            tracing::debug!(target = "visor.cdp", "dropping message with neither id nor method");
        }
    }
}
