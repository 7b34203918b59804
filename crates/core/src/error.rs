//! Error types for the viewer core.

use std::time::Duration;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// WebSocket connection to the debugging endpoint could not be opened.
    #[error("failed to connect to {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    /// The remote side reported a protocol-level error for a command.
    #[error("remote protocol error {code}: {message}")]
    Cdp { code: i64, message: String },

    /// A command did not receive a response in time.
    #[error("command {method} timed out after {duration:?}")]
    Timeout { method: String, duration: Duration },

    /// The connection or a pending-response channel closed underneath us.
    #[error("connection closed: {0}")]
    ChannelClosed(String),

    /// Malformed message or unexpected payload shape.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// No page target could be located or created on the remote browser.
    #[error("no page target available: {0}")]
    NoPageTarget(String),

    /// Allocation service call failed.
    #[error("allocation error: {0}")]
    Allocation(String),

    /// Screencast frame payload could not be decoded.
    #[error("frame decode error: {0}")]
    FrameDecode(String),

    /// Drawing a decoded frame into the sink failed.
    #[error("frame sink error: {0}")]
    FrameSink(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// True when the error indicates the remote target or connection is gone,
    /// which teardown paths treat as expected rather than reportable.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Error::ChannelClosed(_) | Error::ConnectionFailed { .. })
    }
}
