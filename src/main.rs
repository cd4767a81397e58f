use anyhow::Result;
use std::env;

use videohub_engine::{DefaultLabels, EngineConfig, VideohubClient};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Initialize logger
    env_logger::init();

    // Get configuration from environment variables
    let videohub_host = env::var("VIDEOHUB_HOST").unwrap_or_else(|_| "localhost".to_string());
    let videohub_port: u16 = env::var("VIDEOHUB_PORT")
        .unwrap_or_else(|_| "9990".to_string())
        .parse()
        .unwrap_or(9990);

    let mut cfg = EngineConfig::default();
    if let Ok(path) = env::var("DEFAULT_LABELS_FILE") {
        cfg.default_labels = DefaultLabels::from_json_file(&path)?;
    }

    log::info!("Starting videohub-engine monitor");
    log::info!("Videohub: {}:{}", videohub_host, videohub_port);

    let client = VideohubClient::new(cfg);
    let mut events = client.subscribe();
    client
        .connect_with_auto_reconnect(&videohub_host, videohub_port)
        .await;

    // Log every engine event as a JSON line until interrupted
    loop {
        match events.recv().await {
            Ok(event) => log::info!("{}", serde_json::to_string(&event)?),
            Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                log::warn!("event log fell behind, {} events dropped", missed);
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }

    Ok(())
}
