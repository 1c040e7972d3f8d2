//! Entry point: parses CLI args, loads config, installs tracing, and hands
//! off to the supervisor (§4.11).

mod cli;
mod logging;
mod supervisor;

use std::sync::Arc;

use clap::Parser;
use ld_config::{SharedSettings, Settings};
use ld_network::webhook::FanoutSink;
use tracing::error;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Args::parse();
    let settings = Settings::load(args.config.as_deref())?;

    let (alert_tx, alert_rx) = logging::channel();
    let _logging = logging::init(&args.log_level, &args.log_file, alert_tx)?;

    async_main(settings, args.config, alert_rx).await
}

async fn async_main(
    settings: Settings,
    config_path: Option<std::path::PathBuf>,
    alert_rx: tokio::sync::mpsc::UnboundedReceiver<logging::AlertMessage>,
) -> anyhow::Result<()> {
    let fanout: Arc<dyn ld_network::webhook::AlertSink> = Arc::new(FanoutSink::from_settings(
        non_empty(&settings.webhook_slack),
        non_empty(&settings.webhook_discord),
    ));

    tokio::spawn(logging::spawn_alert_forwarder(
        alert_rx,
        fanout.clone(),
        "startup".to_string(),
    ));

    let shared = SharedSettings::new(settings);

    if let Err(err) = supervisor::run(shared, fanout, config_path).await {
        error!(%err, "supervisor exited with error");
        return Err(err);
    }
    Ok(())
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}
