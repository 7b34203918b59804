//! HTTP client for the allocation service.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use visor::lifecycle::AllocationApi;
use visor::{Error, Result};
use visor_protocol::{AllocateResponse, ResourceType};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BalanceResponse {
    balance_ms: u64,
}

/// Allocation service reached over HTTP.
pub struct HttpAllocationApi {
    base_url: String,
    client: reqwest::Client,
}

impl HttpAllocationApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl AllocationApi for HttpAllocationApi {
    async fn allocate(&self, resource: ResourceType) -> Result<AllocateResponse> {
        let response = self
            .client
            .post(format!("{}/allocate", self.base_url))
            .json(&json!({"resourceType": resource}))
            .send()
            .await
            .map_err(|e| Error::Allocation(e.to_string()))?
            .error_for_status()
            .map_err(|e| Error::Allocation(e.to_string()))?;
        response
            .json()
            .await
            .map_err(|e| Error::Allocation(format!("malformed allocate response: {e}")))
    }

    async fn release(&self, resource: ResourceType) -> Result<()> {
        self.client
            .post(format!("{}/release", self.base_url))
            .json(&json!({"resourceType": resource}))
            .send()
            .await
            .map_err(|e| Error::Allocation(e.to_string()))?
            .error_for_status()
            .map_err(|e| Error::Allocation(e.to_string()))?;
        Ok(())
    }

    async fn time_balance(&self, resource: ResourceType) -> Result<u64> {
        let response: BalanceResponse = self
            .client
            .get(format!("{}/timeBalance", self.base_url))
            .query(&[("resourceType", resource.as_str())])
            .send()
            .await
            .map_err(|e| Error::Allocation(e.to_string()))?
            .error_for_status()
            .map_err(|e| Error::Allocation(e.to_string()))?
            .json()
            .await
            .map_err(|e| Error::Allocation(format!("malformed balance response: {e}")))?;
        Ok(response.balance_ms)
    }
}
