//! LogBus CLI
//!
//! Thin wrapper around logbus-core for command-line usage.
//!
//! ## Usage
//!
//! ```bash
//! # Emit one event at every level into logs/demo.log
//! logbus demo
//!
//! # Log each line of stdin to a stream
//! tail -f app.out | logbus --max-bytes 1048576 pipe --stream app
//!
//! # Accept events from other processes until Ctrl+C
//! logbus serve --socket /tmp/logbus.sock
//!
//! # Send one event to a running server
//! logbus send --socket /tmp/logbus.sock --stream jobs --level warning "queue is full"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use logbus_core::{Level, LogBusConfig, Pipeline, RotationInterval};
use tokio::io::AsyncBufReadExt;

/// LogBus - per-stream rotating logs
#[derive(Parser)]
#[command(name = "logbus")]
#[command(version = "0.1.0")]
#[command(about = "LogBus - per-stream rotating logs")]
#[command(
    long_about = "Routes log events to one file per stream, rotating each file on a time boundary or a size limit."
)]
struct Cli {
    /// Increase verbosity of logbus itself (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Directory for stream files
    #[arg(short, long, global = true, default_value = "logs")]
    log_dir: PathBuf,

    /// Rotate before a file reaches this many bytes (0 disables)
    #[arg(long, global = true)]
    max_bytes: Option<u64>,

    /// Rotated files kept per stream (0 keeps all)
    #[arg(long, global = true)]
    retention: Option<usize>,

    /// Time rotation: never, minutely, hourly, daily or a number of seconds like 90s
    #[arg(long, global = true, value_parser = parse_rotation)]
    rotation: Option<RotationInterval>,

    /// strftime pattern for record timestamps
    #[arg(long, global = true)]
    timestamp_format: Option<String>,

    /// Minimum level written to files
    #[arg(long, global = true)]
    file_level: Option<Level>,

    /// Minimum level mirrored to stdout
    #[arg(long, global = true)]
    console_level: Option<Level>,

    /// Do not mirror events to stdout
    #[arg(long, global = true)]
    no_console: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Emit one event at every level
    Demo {
        /// Stream to write to
        #[arg(short, long, default_value = "demo")]
        stream: String,
    },

    /// Log each line read from stdin
    Pipe {
        /// Stream to write to
        #[arg(short, long)]
        stream: String,

        /// Level of every line
        #[arg(short = 'L', long, default_value = "info")]
        level: Level,
    },

    /// Accept events from other processes until interrupted
    #[cfg(unix)]
    Serve {
        /// Unix socket to listen on
        #[arg(short, long)]
        socket: PathBuf,
    },

    /// Send one event to a running server
    #[cfg(unix)]
    Send {
        /// Unix socket of the server
        #[arg(short, long)]
        socket: PathBuf,

        /// Stream to write to
        #[arg(short = 'S', long)]
        stream: String,

        /// Level of the event
        #[arg(short = 'L', long, default_value = "info")]
        level: Level,

        /// Message text (joined with spaces)
        #[arg(required = true)]
        message: Vec<String>,
    },
}

fn setup_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    // stdout carries the console mirror
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();
}

/// Parse a rotation interval: a name or a number of seconds ("90s" or "90")
fn parse_rotation(s: &str) -> Result<RotationInterval> {
    match s.to_lowercase().as_str() {
        "never" => Ok(RotationInterval::Never),
        "minutely" => Ok(RotationInterval::Minutely),
        "hourly" => Ok(RotationInterval::Hourly),
        "daily" | "midnight" => Ok(RotationInterval::Daily),
        other => {
            let seconds: u64 = other
                .strip_suffix('s')
                .unwrap_or(other)
                .parse()
                .map_err(|_| {
                    anyhow::anyhow!(
                        "Invalid rotation '{}'. Must be never, minutely, hourly, daily or <seconds>s",
                        s
                    )
                })?;
            if seconds == 0 {
                anyhow::bail!("Rotation interval must be at least one second");
            }
            Ok(RotationInterval::Seconds(seconds))
        }
    }
}

fn build_config(cli: &Cli) -> LogBusConfig {
    let mut config = LogBusConfig::new(&cli.log_dir);
    if let Some(max_bytes) = cli.max_bytes {
        config = config.with_max_file_bytes(max_bytes);
    }
    if let Some(retention) = cli.retention {
        config = config.with_retention(retention);
    }
    if let Some(rotation) = cli.rotation {
        config = config.with_rotation(rotation);
    }
    if let Some(format) = &cli.timestamp_format {
        config = config.with_timestamp_format(format.clone());
    }
    if let Some(level) = cli.file_level {
        config = config.with_file_level(level);
    }
    if let Some(level) = cli.console_level {
        config = config.with_console_level(level);
    }
    if cli.no_console {
        config = config.no_console();
    }
    config
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let config = build_config(&cli);

    match cli.command {
        Commands::Demo { stream } => {
            let pipeline = start(config)?;
            let log = pipeline.producer(&stream)?;

            log.trace("verbose detail for deep debugging");
            log.debug("debug detail");
            log.info("service started");
            log.warn("disk usage above 80%");
            log.error("request failed");
            log.critical("service unavailable");
            log.emit_template(Level::Info, "processed {} records in {}ms", &[&128, &42]);

            pipeline.shutdown();
            eprintln!("Wrote demo events to {}", cli.log_dir.join(format!("{}.log", stream)).display());
        }

        Commands::Pipe { stream, level } => {
            let pipeline = start(config)?;
            let log = pipeline.producer(&stream)?;

            let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
            let mut count = 0u64;
            while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
                log.emit(level, line);
                count += 1;
            }

            pipeline.shutdown();
            tracing::info!(count, stream = %stream, "stdin closed");
        }

        #[cfg(unix)]
        Commands::Serve { socket } => {
            let pipeline = start(config.with_relay_socket(&socket))?;

            eprintln!("Listening on {}", socket.display());
            eprintln!("Writing streams to {}", cli.log_dir.display());
            eprintln!("Press Ctrl+C to stop.");

            let status_interval = Duration::from_secs(60);
            let mut last_status = std::time::Instant::now();

            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        eprintln!("Received shutdown signal...");
                        break;
                    }
                    _ = tokio::time::sleep(Duration::from_secs(1)) => {
                        if last_status.elapsed() >= status_interval {
                            last_status = std::time::Instant::now();
                            if let Some(stats) = pipeline.stats() {
                                eprintln!(
                                    "[Status] {} event(s), {} stream(s), {} rotation(s), {} error(s)",
                                    stats.dispatched,
                                    pipeline.streams().len(),
                                    stats.rotations,
                                    stats.errors
                                );
                            }
                        }
                    }
                }
            }

            pipeline.shutdown();
            eprintln!("Goodbye.");
        }

        #[cfg(unix)]
        Commands::Send {
            socket,
            stream,
            level,
            message,
        } => {
            let producer = logbus_core::RemoteProducer::connect(&socket, &stream, Level::LOWEST)
                .with_context(|| format!("Failed to connect to {}", socket.display()))?;
            producer.emit(level, message.join(" "));
            producer.flush().context("Failed to send event")?;
        }
    }

    Ok(())
}

fn start(config: LogBusConfig) -> Result<Pipeline> {
    let pipeline = Pipeline::new();
    pipeline
        .start(config)
        .context("Failed to start logging pipeline")?;
    Ok(pipeline)
}
