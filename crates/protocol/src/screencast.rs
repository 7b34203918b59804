//! Screencast stream wire shapes.
//!
//! The remote page pushes compressed frames as `Page.screencastFrame`
//! events; each one must be acknowledged with its `sessionId` or the
//! stream stalls after the in-flight window is exhausted.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScreencastFormat {
    Jpeg,
    Png,
}

/// Parameters for `Page.startScreencast`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartScreencastParams {
    pub format: ScreencastFormat,
    pub quality: u8,
    pub every_nth_frame: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_height: Option<u32>,
}

/// Payload of a `Page.screencastFrame` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreencastFrameParams {
    /// Base64-encoded frame image.
    pub data: String,
    #[serde(default)]
    pub metadata: ScreencastFrameMetadata,
    /// Frame identifier to echo back in the acknowledgement.
    pub session_id: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScreencastFrameMetadata {
    pub device_width: f64,
    pub device_height: f64,
}

/// Parameters for `Page.screencastFrameAck`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreencastFrameAck {
    pub session_id: u64,
}
