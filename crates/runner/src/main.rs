use mirror_runner::{LiveSession, SlidingReservoir, offline_client, replay_file, report};
use mirror_sync::{load_config, load_default_config};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn print_help() {
    eprintln!(
        r#"Mirror Runner - keeps an in-memory mirror of remote trading terminals

USAGE:
    mirror-runner [OPTIONS]

OPTIONS:
    --config <PATH>     Load configuration from JSON file
    --replay <PATH>     Replay a JSON-lines packet capture offline and exit
    --help              Print this help message

ENVIRONMENT VARIABLES:
    RUST_LOG            Log level filter (default: mirror=info)

EXAMPLES:
    # Connect with the embedded default configuration
    mirror-runner

    # Connect with a config file
    mirror-runner --config mirror.json

    # Replay a capture
    mirror-runner --replay capture.jsonl
"#
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mirror=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = std::env::args().collect();
    let mut config_path: Option<String> = None;
    let mut replay_path: Option<String> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            "--config" | "-c" => {
                i += 1;
                let Some(path) = args.get(i) else {
                    anyhow::bail!("--config requires a path argument");
                };
                config_path = Some(path.clone());
            }
            "--replay" | "-r" => {
                i += 1;
                let Some(path) = args.get(i) else {
                    anyhow::bail!("--replay requires a path argument");
                };
                replay_path = Some(path.clone());
            }
            arg => {
                print_help();
                anyhow::bail!("unknown argument: {arg}");
            }
        }
        i += 1;
    }

    let config = match config_path {
        Some(path) => {
            tracing::info!("Loading configuration from: {}", path);
            load_config(&path)?
        }
        None => load_default_config()?,
    };
    tracing::info!(accounts = config.connection.accounts.len(), "Configuration loaded");

    if let Some(path) = replay_path {
        let (client, transport) = offline_client(config.to_client_config());
        let latency = Arc::new(SlidingReservoir::new(10_000));
        client.set_latency_reservoir(latency.clone());

        let stats = replay_file(&path, &client).await?;
        report::log_client(&client, Some(latency.as_ref()));
        tracing::info!(
            packets = stats.packets,
            rejected = stats.rejected,
            synchronize_requests = transport.synchronizations(),
            subscribe_requests = transport.subscribes(),
            "Replay complete"
        );
        return Ok(());
    }

    let session = LiveSession::new(config);
    session
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
        })
        .await?;

    Ok(())
}
