use anyhow::{Context, Result};
use visor::OperatorKind;
use visor::lifecycle::AllocationApi;

use crate::api::HttpAllocationApi;

pub async fn execute(api_url: &str, kind: OperatorKind) -> Result<()> {
    let api = HttpAllocationApi::new(api_url);
    let balance_ms = api
        .time_balance(kind.resource_type())
        .await
        .context("balance request failed")?;
    println!("{balance_ms}");
    Ok(())
}
