//! Binary entrypoint for the wxrelay CLI.
//!
//! Commands:
//! - `start [--port <path>]` - run the relay against the console on the given (or configured) port
//! - `init` - write a starter `config.toml` and create the data directory
//! - `smoketest --port <path> [-b <baud>] [--timeout <s>]` - handshake and wait for one packet
//! - `decode <file>` - decode a captured raw serial dump offline
//!
//! See the library crate docs for module-level details: `wxrelay::`.
use anyhow::{anyhow, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use log::{error, info};
use std::time::Duration;

use wxrelay::config::Config;
use wxrelay::delivery::apply_structural_gate;
use wxrelay::server::StationServer;
use wxrelay::station::locate::locate;
use wxrelay::station::PacketAssembler;

#[derive(Parser)]
#[command(name = "wxrelay")]
#[command(about = "Relay weather-station console telemetry to storage and weather networks")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the relay
    Start {
        /// Console serial port (e.g., /dev/ttyUSB0); overrides the config
        #[arg(short, long)]
        port: Option<String>,
    },
    /// Write a default configuration file
    Init,
    /// Handshake with the console and wait for one decoded packet
    Smoketest {
        /// Console serial port
        #[arg(short, long)]
        port: String,
        /// Baud rate
        #[arg(short = 'b', long, default_value_t = 19200)]
        baud: u32,
        /// Seconds to wait before giving up
        #[arg(short, long, default_value_t = 45)]
        timeout: u64,
    },
    /// Decode a raw capture of the serial stream and print the record as JSON
    Decode {
        /// File holding raw bytes read from the console
        file: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let pre_config = match cli.command {
        Commands::Init => None,
        _ => Config::load(&cli.config).await.ok(),
    };
    init_logging(&pre_config, cli.verbose);

    match cli.command {
        Commands::Start { port } => {
            let config = match pre_config {
                Some(config) => config,
                None => Config::load(&cli.config).await?,
            };
            info!("Starting wxrelay v{}", env!("CARGO_PKG_VERSION"));

            // CLI overrides config
            let port_path = port.unwrap_or_else(|| config.station.port.clone());
            if port_path.is_empty() {
                return Err(anyhow!(
                    "No --port given and station.port is not set in {}",
                    cli.config
                ));
            }

            let mut server = StationServer::new(config).await?;
            server
                .connect_device(&port_path)
                .await
                .map_err(|e| anyhow!("Failed to connect to console on {}: {}", port_path, e))?;
            info!("Connected to console on {}", port_path);
            server.run().await?;
        }
        Commands::Init => {
            info!("Initializing new wxrelay configuration");
            Config::create_default(&cli.config).await?;
            let cfg = Config::default();
            tokio::fs::create_dir_all(&cfg.storage.data_dir).await?;
            info!("Configuration file created at {}", cli.config);
            info!("Data directory ready at {}", cfg.storage.data_dir);
        }
        Commands::Smoketest {
            port,
            baud,
            timeout,
        } => {
            #[cfg(not(feature = "serial"))]
            {
                let _ = (port, baud, timeout);
                error!("Smoketest requires the 'serial' feature");
                std::process::exit(2);
            }
            #[cfg(feature = "serial")]
            {
                let station = pre_config
                    .map(|c| c.station)
                    .unwrap_or_else(|| Config::default().station);
                let ok = smoketest(&port, baud, timeout, &station).await?;
                std::process::exit(if ok { 0 } else { 1 });
            }
        }
        Commands::Decode { file } => {
            let bytes = tokio::fs::read(&file)
                .await
                .map_err(|e| anyhow!("Failed to read {}: {}", file, e))?;
            let stale = pre_config
                .map(|c| c.station.cache_stale_secs)
                .unwrap_or(65);
            let mut assembler = PacketAssembler::new(Duration::from_secs(stale));
            match assembler.ingest(&bytes, std::time::Instant::now()) {
                Some(record) => {
                    let record = apply_structural_gate(record, Utc::now());
                    println!("{}", serde_json::to_string_pretty(&record)?);
                }
                None => {
                    error!("No decodable LOOP packet in {}: {:?}", file, locate(&bytes));
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}

#[cfg(feature = "serial")]
async fn smoketest(
    port: &str,
    baud: u32,
    timeout: u64,
    station: &wxrelay::config::StationConfig,
) -> Result<bool> {
    use tokio::sync::{mpsc, watch};
    use wxrelay::station::serial::{open_shared_port, SerialReader, SerialWriter};
    use wxrelay::station::{LinkController, LinkTiming};

    info!("Starting smoke test on {} @ {} baud", port, baud);
    let mut timing = LinkTiming::from_config(station);
    timing.baud_rate = baud;

    let shared = open_shared_port(port, baud).await?;
    let (frames_tx, frames_rx) = mpsc::unbounded_channel();
    let (obs_tx, mut obs_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let reader = SerialReader::new(shared.clone(), frames_tx, shutdown_rx.clone());
    let controller = LinkController::new(SerialWriter::new(shared), timing, obs_tx);
    let reader_task = tokio::spawn(reader.run());
    let controller_task = tokio::spawn(controller.run(frames_rx, shutdown_rx));

    let received = tokio::time::timeout(Duration::from_secs(timeout), obs_rx.recv()).await;
    let _ = shutdown_tx.send(true);
    let _ = reader_task.await;
    let _ = controller_task.await;

    let (ok, payload) = match received {
        Ok(Some(record)) => {
            let record = apply_structural_gate(record, Utc::now());
            (
                true,
                serde_json::json!({
                    "status": "ok",
                    "accepted": record.is_accepted(),
                    "disregard_reason": record.reason_text(),
                    "record": record,
                    "metrics": wxrelay::metrics::snapshot(),
                }),
            )
        }
        _ => (
            false,
            serde_json::json!({
                "status": "no_packet",
                "timeout_seconds": timeout,
                "metrics": wxrelay::metrics::snapshot(),
            }),
        ),
    };
    println!("{}", payload);
    Ok(ok)
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity overrides the configured level
    let base_level = match verbosity {
        0 => config
            .as_ref()
            .and_then(|c| c.logging.level.parse::<log::LevelFilter>().ok())
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);

    let log_file = config
        .as_ref()
        .and_then(|c| c.logging.file.as_ref())
        .and_then(|path| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .ok()
        });

    if let Some(f) = log_file {
        let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
        // Echo to the console only when attached to a terminal
        let is_tty = atty::is(atty::Stream::Stdout);
        builder.format(move |fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            let line = format!("{} [{}] {}", ts, record.level(), record.args());
            if let Ok(mut guard) = write_mutex.lock() {
                let _ = writeln!(guard, "{}", line);
            }
            if is_tty {
                writeln!(fmt, "{}", line)
            } else {
                Ok(())
            }
        });
    } else {
        builder.format(|fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            writeln!(fmt, "{} [{}] {}", ts, record.level(), record.args())
        });
    }
    let _ = builder.try_init();
}
