//! Binary entrypoint for the smsgate CLI.
//!
//! Commands:
//! - `start [--dry-run]` - forward SMS and calls until Ctrl-C (`--dry-run` logs instead of sending)
//! - `init` - create a starter `config.toml`
//! - `status` - query every configured modem and print the event log summary
//! - `probe --port <path> [-b <baud>]` - liveness + status for one port, as JSON
//! - `clear --device <name> [--bank ME|SM]` - delete all read messages on a modem
//! - `history [--limit N] [--kind sms|call] [--number <n>]` - list forwarded events
//!
//! See the library crate docs for module-level details: `smsgate::`.
use anyhow::{anyhow, bail, Result};
use clap::{Parser, Subcommand};
use log::{error, info, warn};

use smsgate::config::{Config, DeviceConfig};
use smsgate::forwarder::{self, Forwarder};
use smsgate::modem::parser::is_ok;
use smsgate::notify::{LogNotifier, Notifier};
use smsgate::sms::{Bank, DeleteOutcome, SmsEngine};
use smsgate::status::{self, DeviceStatus};
use smsgate::storage::{EventKind, EventStore, JsonlEventStore};

#[derive(Parser)]
#[command(name = "smsgate")]
#[command(about = "Forward SMS and incoming calls from AT-command modems to Telegram")]
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
    /// Start forwarding
    Start {
        /// Log notifications instead of sending them to Telegram
        #[arg(long)]
        dry_run: bool,
    },
    /// Write a default configuration file
    Init,
    /// Show modem status and event statistics
    Status,
    /// Check one serial port for a responsive modem
    Probe {
        /// Device serial port
        #[arg(short, long)]
        port: String,
        /// Baud rate
        #[arg(short = 'b', long, default_value_t = 115200)]
        baud: u32,
    },
    /// Delete all read messages from one modem's storage bank
    Clear {
        /// Device name from the config file
        #[arg(short, long)]
        device: String,
        /// Storage bank (ME or SM)
        #[arg(long, default_value = "ME")]
        bank: Bank,
    },
    /// List forwarded events, newest first
    History {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
        /// Only this kind of event (sms or call)
        #[arg(short, long)]
        kind: Option<EventKind>,
        /// Only events for this phone number
        #[arg(short, long)]
        number: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let pre_config = match cli.command {
        Commands::Init | Commands::Probe { .. } => None,
        _ => Config::load(&cli.config).await.ok(),
    };
    init_logging(&pre_config, cli.verbose);

    match cli.command {
        Commands::Start { dry_run } => {
            let mut config = match pre_config {
                Some(c) => c,
                None => Config::load(&cli.config).await?,
            };
            config.apply_env_overrides();
            if dry_run {
                config.validate_runtime()?;
            } else {
                config.validate()?;
            }
            info!("Starting smsgate v{}", env!("CARGO_PKG_VERSION"));
            let store = JsonlEventStore::open(&config.storage.data_dir).await?;

            if dry_run {
                info!("Dry run: notifications are logged, not sent");
                return run_forwarder(config, LogNotifier, store).await;
            }
            run_telegram(config, store).await
        }
        Commands::Init => {
            Config::create_default(&cli.config).await?;
            info!("Configuration file created at {}", cli.config);
            println!(
                "Created {}. Set telegram.bot_token / telegram.chat_id (or TELEGRAM_BOT_TOKEN / TELEGRAM_CHAT_ID) and list your modems under [[devices]].",
                cli.config
            );
            Ok(())
        }
        Commands::Status => {
            let config = match pre_config {
                Some(c) => c,
                None => Config::load(&cli.config).await?,
            };
            show_status(&config).await
        }
        Commands::Probe { port, baud } => {
            let config = Config::default();
            let device = DeviceConfig {
                name: "probe".to_string(),
                port: port.clone(),
                baud_rate: baud,
                read_timeout_ms: 2000,
            };
            let (alive, status) = match probe(&device, &config).await {
                Ok(status) => (true, status),
                Err(e) => (false, DeviceStatus::disconnected(&device.name, &port, e.to_string())),
            };
            let report = serde_json::json!({ "port": port, "alive": alive, "status": status });
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !alive {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Clear { device, bank } => {
            let config = match pre_config {
                Some(c) => c,
                None => Config::load(&cli.config).await?,
            };
            let dev = config
                .device(&device)
                .ok_or_else(|| anyhow!("no device named '{}' in {}", device, cli.config))?
                .clone();
            let mut session = forwarder::open_session(&dev, &config).await?;
            let mut engine = SmsEngine::new(&dev.name, config.sms_settings());
            let outcome = engine.delete_all_read(&mut session, bank).await;
            session.close();
            match outcome? {
                DeleteOutcome::Deleted => {
                    println!("Cleared read messages in {} on {}", bank, dev.name);
                    Ok(())
                }
                other => bail!("Clearing {} on {} failed: {:?}", bank, dev.name, other),
            }
        }
        Commands::History {
            limit,
            kind,
            number,
        } => {
            let config = match pre_config {
                Some(c) => c,
                None => Config::load(&cli.config).await?,
            };
            let store = JsonlEventStore::open(&config.storage.data_dir).await?;
            let events = match number {
                Some(n) => store.by_number(&n, limit).await?,
                None => store.recent(limit, kind).await?,
            };
            if events.is_empty() {
                println!("No events recorded.");
            }
            for ev in events {
                let local = ev.event_at.with_timezone(&chrono::Local);
                match ev.text {
                    Some(text) => println!(
                        "{} [{}] {} {}: {}",
                        local.format("%Y-%m-%d %H:%M:%S"),
                        ev.kind,
                        ev.device,
                        ev.number,
                        text.replace('\n', " ")
                    ),
                    None => println!(
                        "{} [{}] {} {}",
                        local.format("%Y-%m-%d %H:%M:%S"),
                        ev.kind,
                        ev.device,
                        ev.number
                    ),
                }
            }
            Ok(())
        }
    }
}

async fn run_forwarder<N: Notifier, S: EventStore>(config: Config, notifier: N, store: S) -> Result<()> {
    let mut forwarder = Forwarder::new(config, notifier, store);
    if let Err(e) = forwarder.run().await {
        error!("Forwarder stopped: {}", e);
        return Err(e);
    }
    Ok(())
}

#[cfg(feature = "telegram")]
async fn run_telegram(config: Config, store: JsonlEventStore) -> Result<()> {
    let notifier = smsgate::notify::TelegramNotifier::new(&config.telegram);
    run_forwarder(config, notifier, store).await
}

#[cfg(not(feature = "telegram"))]
async fn run_telegram(_config: Config, _store: JsonlEventStore) -> Result<()> {
    bail!("built without the 'telegram' feature; use --dry-run")
}

async fn probe(device: &DeviceConfig, config: &Config) -> Result<DeviceStatus> {
    let mut session = forwarder::open_session(device, config).await?;
    let reply = session.send_command("AT", session.timing().status).await?;
    if !is_ok(&reply) {
        session.close();
        bail!("no OK from modem on {}", device.port);
    }
    let status = status::query_status(&mut session, &device.port, &config.forwarder.banks).await;
    session.close();
    Ok(status?)
}

async fn show_status(config: &Config) -> Result<()> {
    println!("smsgate v{}", env!("CARGO_PKG_VERSION"));
    println!("Devices:");
    for device in &config.devices {
        let status = match probe(device, config).await {
            Ok(status) => status,
            Err(e) => {
                warn!("{} unavailable: {}", device.name, e);
                DeviceStatus::disconnected(&device.name, &device.port, e.to_string())
            }
        };
        println!("  {} ({}): {}", device.name, device.port, status.summary());
    }

    let store = JsonlEventStore::open(&config.storage.data_dir).await?;
    let stats = store.stats().await?;
    println!("Events:");
    println!("  total: {}", stats.total);
    println!("  sms: {}", stats.sms);
    println!("  calls: {}", stats.calls);
    println!("  last 24h: {}", stats.last_24h);
    Ok(())
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity wins over the configured level
    let base_level = match verbosity {
        0 => config
            .as_ref()
            .and_then(|c| c.logging.level.parse().ok())
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
        // Mirror to the console only in the foreground
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
            writeln!(
                fmt,
                "{} [{}] {}",
                chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
                record.level(),
                record.args()
            )
        });
    }
    let _ = builder.try_init();
}
