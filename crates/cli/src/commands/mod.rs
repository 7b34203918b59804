use anyhow::Result;

use crate::cli::Commands;

mod allocate;
mod balance;
mod release;
mod watch;

pub async fn dispatch(command: Commands, api_url: &str) -> Result<()> {
    match command {
        Commands::Allocate {
            session_id,
            operator,
            free,
            from_history,
            timeout_secs,
        } => {
            allocate::execute(
                api_url,
                session_id,
                operator.into(),
                free,
                from_history,
                timeout_secs,
            )
            .await
        }
        Commands::Release { operator } => release::execute(api_url, operator.into()).await,
        Commands::Balance { operator } => balance::execute(api_url, operator.into()).await,
        Commands::Watch {
            ws_url,
            output,
            max_frames,
            quality,
        } => watch::execute(&ws_url, &output, max_frames, quality).await,
    }
}
