//! Binary entrypoint for the scalebridge CLI.
//!
//! Commands:
//! - `start` - run the bridge until Ctrl-C
//! - `init` - write a starter `config.toml`
//! - `check` - validate the configuration and list the port profiles
//! - `probe <name> [--timeout-ms <ms>]` - take one reading and print it as JSON
//!
//! See the library crate docs for module-level details: `scalebridge::`.
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use log::info;

use scalebridge::bridge::{AcquisitionCoordinator, BridgeService};
use scalebridge::config::Config;
use scalebridge::metrics;
use scalebridge::scale::framer::SENTINEL;
use scalebridge::scale::SerialLink;

#[derive(Parser)]
#[command(name = "scalebridge")]
#[command(about = "TCP bridge for serial weighing scales")]
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
    /// Start the bridge
    Start,
    /// Write a default configuration file
    Init,
    /// Validate the configuration and list port profiles
    Check,
    /// Take one stable reading from a configured port
    Probe {
        /// Logical port name, as a trigger client would send it
        name: String,
        /// Override the profile's timeout
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Init => {
            Config::create_default(&cli.config).await?;
            println!("Created default configuration at {}", cli.config);
            println!("Edit [[serial_ports]] to match your scales, then run `scalebridge start`.");
        }
        Commands::Start => {
            let config = Config::load(&cli.config).await?;
            init_logging(Some(&config), cli.verbose);
            info!("Starting scalebridge v{}", env!("CARGO_PKG_VERSION"));
            for profile in &config.serial_ports {
                info!(
                    "Port profile {} -> {} @ {} baud, timeout {}ms, {} decimals",
                    profile.name,
                    profile.device_path(),
                    profile.baud_rate,
                    profile.timeout_ms,
                    profile.decimal_places
                );
            }
            let service = BridgeService::bind(config, Arc::new(SerialLink)).await?;
            service.run().await?;
        }
        Commands::Check => {
            let config = Config::load(&cli.config).await?;
            println!(
                "Configuration OK: trigger on {}:{}",
                config.trigger.bind, config.trigger.port
            );
            for profile in &config.serial_ports {
                println!(
                    "  {:<10} {} {} baud data_bits={} parity={:?} stop_bits={:?} handshake={:?} timeout={}ms decimals={}",
                    profile.name,
                    profile.device_path(),
                    profile.baud_rate,
                    profile.data_bits,
                    profile.parity,
                    profile.stop_bits,
                    profile.handshake,
                    profile.timeout_ms,
                    profile.decimal_places
                );
            }
            match config.broadcast.listen_port {
                Some(port) => println!("Subscriber listener on port {}", port),
                None => println!("Subscriber listener disabled"),
            }
            for target in &config.broadcast.targets {
                println!("Subscriber target {}", target.addr());
            }
        }
        Commands::Probe { name, timeout_ms } => {
            let config = Config::load(&cli.config).await?;
            init_logging(Some(&config), cli.verbose);
            let profile = config
                .find_profile(&name)
                .ok_or_else(|| anyhow!("no port profile named {}", name))?;
            let timeout = timeout_ms
                .map(Duration::from_millis)
                .unwrap_or_else(|| profile.timeout());

            let coordinator = AcquisitionCoordinator::new(Arc::new(SerialLink));
            let result = coordinator.acquire_with_timeout(profile, timeout).await;
            let last = coordinator.last_reading().await;
            coordinator.close().await;

            let summary = match result {
                Ok(acquisition) => serde_json::json!({
                    "port": profile.name,
                    "result": acquisition,
                    "value": acquisition.value(),
                    "last_reading": last,
                    "metrics": metrics::snapshot(),
                }),
                Err(fault) => serde_json::json!({
                    "port": profile.name,
                    "fault": fault.to_string(),
                    "value": SENTINEL,
                    "last_reading": last,
                    "metrics": metrics::snapshot(),
                }),
            };
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    Ok(())
}

fn init_logging(config: Option<&Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity overrides the configured level
    let base_level = match verbosity {
        0 => config
            .and_then(|c| c.logging.level.parse::<log::LevelFilter>().ok())
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);

    let file = config
        .and_then(|c| c.logging.file.as_ref())
        .and_then(|path| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .ok()
        });

    match file {
        Some(f) => {
            let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
            // Foreground runs echo to the console; a service manager redirecting stdout gets the file only
            let is_tty = atty::is(atty::Stream::Stdout);
            builder.format(move |fmt, record| {
                let ts = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
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
        }
        None => {
            builder.format(|fmt, record| {
                writeln!(
                    fmt,
                    "{} [{}] {}",
                    chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                    record.level(),
                    record.args()
                )
            });
        }
    }
    let _ = builder.try_init();
}
