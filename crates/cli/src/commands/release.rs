use anyhow::{Context, Result};
use visor::OperatorKind;
use visor::lifecycle::AllocationApi;

use crate::api::HttpAllocationApi;

pub async fn execute(api_url: &str, kind: OperatorKind) -> Result<()> {
    let api = HttpAllocationApi::new(api_url);
    api.release(kind.resource_type())
        .await
        .context("release request failed")?;
    println!("released");
    Ok(())
}
