//! Allocation API wire shapes.
//!
//! The allocation service hands out remote sandboxes (a full desktop
//! "computer" or a headless-with-display browser) keyed by resource type.
//! Requests queue when the pool is exhausted; a granted response carries a
//! connection url whose field name depends on the resource type.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Resource pool selector sent to the allocation service.
///
/// Serialized values match the service exactly: `computer` | `hdfBrowser`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResourceType {
    Computer,
    HdfBrowser,
}

impl ResourceType {
    /// Wire name of this resource type.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Computer => "computer",
            ResourceType::HdfBrowser => "hdfBrowser",
        }
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Allocation outcome reported by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocationState {
    /// Request accepted, waiting in the pool queue.
    Queued,
    /// Still waiting (older deployments report `waiting` instead of `queued`).
    Waiting,
    /// A sandbox has been assigned; `data` carries the connection url.
    Granted,
}

/// Response to an `allocate` call.
///
/// The `data` payload is left untyped here because its shape depends on the
/// resource type and allocation state; use [`ComputeGrant`], [`BrowserGrant`]
/// and [`QueueInfo`] to extract the relevant fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocateResponse {
    pub state: AllocationState,
    #[serde(default)]
    pub data: Value,
}

/// Granted payload for `computer` resources.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputeGrant {
    pub rdp_url: String,
}

/// Granted payload for `hdfBrowser` resources.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserGrant {
    pub vnc_url: String,
}

/// Queue metadata attached to `queued`/`waiting` responses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueueInfo {
    pub queue_position: Option<u32>,
}
