use std::sync::Arc;

use anyhow::Result;
use apply_pilot::{Args, ChromeBrowser, JsonPlaybookStore, OpenAiPlanner, SessionController, SessionStatus, face};
use clap::Parser;
use dotenvy::dotenv;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("apply_pilot=info")),
        )
        .init();

    let args = Args::parse();
    let profile = args.profile_values()?;
    let playbooks = args.playbook_dir()?;
    let planner = OpenAiPlanner::from_env(&args.model, &args.endpoint)?;

    let events = match args.monitor_port {
        Some(port) => {
            let (tx, _) = broadcast::channel(256);
            face::start_server(port, tx.clone()).await?;
            Some(tx)
        }
        None => None,
    };

    info!("launching Chrome");
    let options = args.chrome_options();
    let browser = tokio::task::spawn_blocking(move || ChromeBrowser::launch(&options))
        .await
        .map_err(|e| anyhow::anyhow!("browser launch panicked: {}", e))??;

    info!(playbooks = %playbooks.display(), "playbook store ready");
    let mut controller = SessionController::new(
        Arc::new(browser),
        Arc::new(planner),
        Arc::new(JsonPlaybookStore::new(playbooks)),
        Arc::new(args.judge()),
        profile,
        args.session_config(),
    );
    if let Some(tx) = events {
        controller = controller.with_events(tx);
    }

    let report = controller.run().await;
    println!("status: {}", report.status);
    println!("steps: {}", report.steps);
    if let Some(url) = &report.last_url {
        println!("last page: {url}");
    }
    if let Some(reason) = &report.reason {
        println!("reason: {reason}");
    }

    if report.status == SessionStatus::Failed {
        std::process::exit(1);
    }
    Ok(())
}
