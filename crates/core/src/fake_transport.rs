//! Fake transport for unit testing JSON-RPC correlation and event routing.
//!
//! Provides an in-memory transport for testing the protocol layer without a
//! remote browser. The controller can inject raw messages (responses and
//! events), inspect everything the connection sent, and register per-method
//! stubs so commands issued from background tasks are answered automatically.
//!
//! # Example
//!
//! ```ignore
//! let (parts, controller) = FakeTransportBuilder::new().build();
//! let connection = Arc::new(CdpConnection::new(parts));
//!
//! tokio::spawn({
//!     let conn = Arc::clone(&connection);
//!     async move { conn.run().await }
//! });
//!
//! controller.stub("Page.enable", json!({}));
//! let fut = connection.send_command("Page.navigate", json!({"url": "about:blank"}), None);
//! controller.inject_response(1, json!({"frameId": "f1"}));
//! let result = fut.await?;
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::transport::{Transport, TransportParts, TransportReceiver};

/// Builder for creating fake transport instances.
pub struct FakeTransportBuilder {
    // Nothing needed for now, but allows future extensibility
}

impl FakeTransportBuilder {
    pub fn new() -> Self {
        Self {}
    }

    /// Build the fake transport and return both parts and a controller.
    ///
    /// Returns [`TransportParts`] for creating a connection and a
    /// [`FakeTransportController`] for injecting messages and inspecting
    /// sent traffic.
    pub fn build(self) -> (TransportParts, FakeTransportController) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (message_tx, message_rx) = mpsc::unbounded_channel();
        let sent_messages = Arc::new(Mutex::new(Vec::new()));
        let stubs = Arc::new(Mutex::new(HashMap::new()));

        let sender = FakeTransportSender {
            sent: Arc::clone(&sent_messages),
            stubs: Arc::clone(&stubs),
            inbound_tx: inbound_tx.clone(),
        };

        let receiver = FakeTransportReceiver {
            inbound_rx,
            message_tx,
        };

        let controller = FakeTransportController {
            inbound_tx,
            sent: sent_messages,
            stubs,
        };

        let parts = TransportParts {
            sender: Box::new(sender),
            receiver: Box::new(receiver),
            message_rx,
        };

        (parts, controller)
    }
}

impl Default for FakeTransportBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Controller for injecting messages, stubbing methods and inspecting
/// sent traffic.
pub struct FakeTransportController {
    inbound_tx: mpsc::UnboundedSender<Value>,
    sent: Arc<Mutex<Vec<Value>>>,
    stubs: Arc<Mutex<HashMap<String, Value>>>,
}

impl FakeTransportController {
    /// Inject a raw JSON message into the connection, as if the remote
    /// side had sent it.
    pub fn inject(&self, message: Value) {
        let _ = self.inbound_tx.send(message);
    }

    /// Inject a response message with the given id and result.
    pub fn inject_response(&self, id: u64, result: Value) {
        self.inject(serde_json::json!({
            "id": id,
            "result": result
        }));
    }

    /// Inject an error response message.
    pub fn inject_error(&self, id: u64, code: i64, message: &str) {
        self.inject(serde_json::json!({
            "id": id,
            "error": {
                "code": code,
                "message": message
            }
        }));
    }

    /// Inject an event message, optionally scoped to a page session.
    pub fn inject_event(&self, method: &str, params: Value, session_id: Option<&str>) {
        let mut msg = serde_json::json!({
            "method": method,
            "params": params
        });
        if let Some(sid) = session_id {
            msg["sessionId"] = Value::String(sid.to_string());
        }
        self.inject(msg);
    }

    /// Register a canned result for every command with the given method.
    ///
    /// Stubbed commands are answered immediately on send, which keeps
    /// multi-command flows (target setup, screencast start) from needing
    /// hand-sequenced `inject_response` calls. Unstubbed commands stay
    /// pending until a response is injected by id.
    pub fn stub(&self, method: &str, result: Value) {
        self.stubs.lock().insert(method.to_string(), result);
    }

    /// Take all sent messages, clearing the buffer.
    pub fn take_sent(&self) -> Vec<Value> {
        std::mem::take(&mut *self.sent.lock())
    }

    /// Sent messages matching the given method, without clearing.
    pub fn sent_with_method(&self, method: &str) -> Vec<Value> {
        self.sent
            .lock()
            .iter()
            .filter(|m| m["method"] == method)
            .cloned()
            .collect()
    }
}

struct FakeTransportSender {
    sent: Arc<Mutex<Vec<Value>>>,
    stubs: Arc<Mutex<HashMap<String, Value>>>,
    inbound_tx: mpsc::UnboundedSender<Value>,
}

impl Transport for FakeTransportSender {
    fn send(&mut self, message: Value) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let sent = Arc::clone(&self.sent);
        let stubs = Arc::clone(&self.stubs);
        let inbound_tx = self.inbound_tx.clone();
        Box::pin(async move {
            let stub = message["method"]
                .as_str()
                .and_then(|m| stubs.lock().get(m).cloned());
            let id = message["id"].as_u64();
            sent.lock().push(message);

            if let (Some(result), Some(id)) = (stub, id) {
                let _ = inbound_tx.send(serde_json::json!({
                    "id": id,
                    "result": result
                }));
            }
            Ok(())
        })
    }
}

struct FakeTransportReceiver {
    inbound_rx: mpsc::UnboundedReceiver<Value>,
    message_tx: mpsc::UnboundedSender<Value>,
}

impl TransportReceiver for FakeTransportReceiver {
    fn run(mut self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> {
        Box::pin(async move {
            while let Some(message) = self.inbound_rx.recv().await {
                if self.message_tx.send(message).is_err() {
                    break;
                }
            }
            Ok(())
        })
    }
}
