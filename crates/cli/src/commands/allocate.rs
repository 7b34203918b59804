use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing::info;
use visor::{
    OperatorKind, ResourceController, ResourceRequest, ResourceStatus, SessionOrigin,
};

use crate::api::HttpAllocationApi;

pub async fn execute(
    api_url: &str,
    session_id: String,
    kind: OperatorKind,
    is_free: bool,
    from_history: bool,
    timeout_secs: u64,
) -> Result<()> {
    let api = Arc::new(HttpAllocationApi::new(api_url));
    let controller = ResourceController::new(
        api,
        ResourceRequest {
            session_id,
            kind,
            is_free,
            origin: if from_history {
                SessionOrigin::History
            } else {
                SessionOrigin::New
            },
        },
    );

    let mut status_rx = controller.subscribe();
    controller.activate();

    let wait = async {
        loop {
            let status = *status_rx.borrow_and_update();
            match status {
                ResourceStatus::Connected => return Ok(()),
                ResourceStatus::Queuing => match controller.queue_position() {
                    Some(position) => info!("queuing, position {position}"),
                    None => info!("queuing"),
                },
                ResourceStatus::Connecting => info!("allocation requested, waiting for grant"),
                ResourceStatus::Unavailable => {
                    bail!("session came from history and cannot be reallocated")
                }
                ResourceStatus::Expired => bail!("session expired before a grant arrived"),
                ResourceStatus::Error => bail!(
                    "allocation failed: {}",
                    controller
                        .last_error()
                        .unwrap_or_else(|| "unknown error".to_string())
                ),
                ResourceStatus::Init => {}
            }
            status_rx
                .changed()
                .await
                .context("allocation controller went away")?;
        }
    };

    match tokio::time::timeout(Duration::from_secs(timeout_secs), wait).await {
        Ok(result) => result?,
        Err(_) => {
            controller.release(true).await;
            bail!("no grant after {timeout_secs}s, released");
        }
    }

    let endpoint = controller
        .endpoint()
        .context("connected without an endpoint url")?;
    println!("{}", endpoint.url);
    Ok(())
}
