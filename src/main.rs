//! Monitor entry point: load configuration, connect the sink, open every
//! configured port, and run the poll loop until Ctrl-C.

use anyhow::Context;
use clap::Parser;
use log::info;
use std::path::PathBuf;
use tokio::sync::watch;

use slowmon::bus::{ConnectionRegistry, SerialOpener};
use slowmon::config::Settings;
use slowmon::device::Device;
use slowmon::poll::PollLoop;
use slowmon::sink::InfluxSink;

#[derive(Parser)]
#[command(name = "slowmon", about = "Laboratory slow-control monitor")]
struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "config/default.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(&cli.config)
        .with_context(|| format!("failed to load configuration from {:?}", cli.config))?;

    env_logger::Builder::new()
        .parse_filters(&settings.application.log_level)
        .init();

    let sink = InfluxSink::new(
        &settings.sink.url,
        &settings.sink.org,
        &settings.sink.bucket,
        &settings.sink.token,
    );
    sink.ping()
        .await
        .with_context(|| format!("sink at {} is not reachable", settings.sink.url))?;
    info!("Connected to InfluxDB at {}", settings.sink.url);

    let mut registry = ConnectionRegistry::new(Box::new(SerialOpener));
    let mut devices = Vec::new();
    for definition in &settings.devices {
        let connection = registry
            .open(&definition.port, definition.baud)
            .await
            .with_context(|| {
                format!(
                    "could not open {} for '{}'",
                    definition.port, definition.name
                )
            })?;
        devices.push(Device::new(
            definition.name.clone(),
            definition.device_kind()?,
            connection,
        ));
        info!(
            "Configured '{}' on {} at {} baud",
            definition.name, definition.port, definition.baud
        );
    }
    anyhow::ensure!(!devices.is_empty(), "no devices configured");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(true);
        }
    });

    PollLoop::new(devices, registry, Box::new(sink), settings.timing.clone(), shutdown_rx)
        .run()
        .await;

    Ok(())
}
