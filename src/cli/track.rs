use crate::App;
use anyhow::Result;
use tracing::{info, warn};

/// Runs the background tracker until Ctrl-C.
pub async fn run(app: &App) -> Result<()> {
    let tracker = app.tracker();
    tracker
        .run(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Interrupt received"),
                Err(e) => {
                    warn!("Cannot listen for Ctrl-C: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        })
        .await;
    Ok(())
}
