use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use robo_shell_lib::serial::interface::{discover_devices, SystemPorts};
use robo_shell_lib::{Client, FloodClient, LinkConfig, Transport};

#[derive(Parser)]
#[command(name = "robo-shell", version, about = "Talk to the Robo 24 ESP32 distance sensor")]
struct Cli {
    /// Serial port to use instead of USB discovery
    #[arg(long, global = true)]
    port: Option<String>,

    /// JSON config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Per-request response timeout in milliseconds
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List serial ports matching the sensor's USB id
    Ports,
    /// Request single measurements
    Measure {
        #[arg(long, default_value_t = 1)]
        count: usize,
    },
    /// Request a batch in a tight loop (or paced) and print the average
    Flood {
        #[arg(long)]
        rate_hz: Option<f64>,
        #[arg(long)]
        batch: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => LinkConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => LinkConfig::default(),
    };
    if let Some(port) = cli.port {
        config.transport.port = Some(port);
    }
    if let Some(timeout_ms) = cli.timeout_ms {
        config.client.response_timeout_ms = timeout_ms;
    }

    if let Command::Ports = cli.command {
        let devices = discover_devices(&SystemPorts, config.transport.vid, config.transport.pid)?;
        if devices.is_empty() {
            println!("No devices matching {:04x}:{:04x}", config.transport.vid, config.transport.pid);
        }
        for device in devices {
            println!(
                "{}\t{}",
                device.port_name,
                device.product.as_deref().unwrap_or("unknown product")
            );
        }
        return Ok(());
    }

    let transport = Arc::new(Transport::new(config.transport.clone()));
    transport.start().await.context("starting serial transport")?;

    let result = run(&cli.command, &transport, &mut config).await;
    transport.stop().await;
    result
}

async fn run(command: &Command, transport: &Arc<Transport>, config: &mut LinkConfig) -> anyhow::Result<()> {
    match command {
        Command::Ports => Ok(()),
        Command::Measure { count } => {
            let client = Client::with_config(Arc::clone(transport), &config.client);
            for _ in 0..*count {
                let measurement = client.request_measurement().await?;
                println!("{}", serde_json::to_string(&measurement)?);
            }
            Ok(())
        }
        Command::Flood { rate_hz, batch } => {
            if let Some(batch) = batch {
                config.client.flood_batch_size = *batch;
            }
            let client = FloodClient::with_config(Arc::clone(transport), &config.client)?;
            log::info!("Flooding {} requests", client.batch_size());
            let measurement = client.request_measurement(*rate_hz).await?;
            println!("{}", serde_json::to_string(&measurement)?);
            Ok(())
        }
    }
}
