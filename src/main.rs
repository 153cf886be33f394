//! sockbridged: Unix-socket bridging relay daemon
//!
//! This is the main entry point for the relay daemon.
//!
//! # Usage
//!
//! ```bash
//! # Run with a configuration file
//! sockbridged -c /etc/sockbridge/config.json
//!
//! # Register channels directly on the command line
//! sockbridged -S vpn:/run/vpn.sock -S dns:/run/dns.sock
//!
//! # Run with environment overrides
//! SOCKBRIDGE_LOG_LEVEL=debug sockbridged -c config.json
//! ```

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Result;
use tokio::signal;
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

use sockbridge::config::{load_config_with_env, ChannelConfig, Config};
use sockbridge::{Bridge, SocketRegistry};

/// Command-line arguments
struct Args {
    /// Configuration file path
    config_path: Option<PathBuf>,
    /// Channels given as `-S name:path` pairs
    channels: Vec<ChannelConfig>,
    /// Generate default configuration
    generate_config: bool,
    /// Check configuration only
    check_config: bool,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config_path = None;
        let mut channels = Vec::new();
        let mut generate_config = false;
        let mut check_config = false;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-c" | "--config" => {
                    if let Some(path) = args.next() {
                        config_path = Some(PathBuf::from(path));
                    }
                }
                "-S" | "--socket" => {
                    let Some(pair) = args.next() else {
                        eprintln!("-S requires a name:path argument");
                        std::process::exit(1);
                    };
                    match ChannelConfig::parse_pair(&pair) {
                        Ok(channel) => channels.push(channel),
                        Err(e) => {
                            eprintln!("Invalid -S argument: {e}");
                            std::process::exit(1);
                        }
                    }
                }
                "-g" | "--generate-config" => {
                    generate_config = true;
                }
                "--check" => {
                    check_config = true;
                }
                "-h" | "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "-v" | "--version" => {
                    println!("sockbridged v{}", sockbridge::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {arg}");
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        Self {
            config_path,
            channels,
            generate_config,
            check_config,
        }
    }
}

fn print_help() {
    println!(
        r#"sockbridged v{}

Relay daemon bridging client sessions to local Unix-socket backends.

USAGE:
    sockbridged [OPTIONS]

OPTIONS:
    -c, --config <PATH>     Configuration file path
    -S, --socket <PAIR>     Register a channel as name:/path/to.sock (repeatable)
    -g, --generate-config   Generate default configuration and exit
    --check                 Check configuration and exit
    -h, --help              Print help information
    -v, --version           Print version information

ENVIRONMENT:
    SOCKBRIDGE_LOG_LEVEL    Override log level (trace, debug, info, warn, error)
    SOCKBRIDGE_CHANNELS     Extra channels as comma-separated name:path pairs

EXAMPLE:
    sockbridged -S vpn:/run/vpn.sock -S dns:/run/dns.sock
"#,
        sockbridge::VERSION
    );
}

/// Initialize logging
fn init_logging(config: &Config) {
    let level = match config.log.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("tokio=warn".parse().unwrap());

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);

    match (config.log.format.as_str(), config.log.timestamps) {
        ("json", _) => subscriber.json().init(),
        (_, true) => subscriber.init(),
        (_, false) => subscriber.without_time().init(),
    }
}

/// Assemble the effective configuration from file and -S arguments
fn assemble_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config_path {
        Some(path) => load_config_with_env(path).map_err(|e| {
            anyhow::anyhow!("Failed to load configuration from {:?}: {}", path, e)
        })?,
        None => Config {
            channels: Vec::new(),
            engine: sockbridge::EngineConfig::default(),
            log: sockbridge::LogConfig::default(),
        },
    };

    config.channels.extend(args.channels.iter().cloned());
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {e}"))?;

    Ok(config)
}

/// Main application entry point
#[tokio::main]
async fn main() -> Result<()> {
    let start_time = Instant::now();

    let args = Args::parse();

    // Handle generate-config
    if args.generate_config {
        let path = args
            .config_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("sockbridge.json"));
        sockbridge::config::create_default_config(&path)?;
        println!("Generated default configuration at {path:?}");
        return Ok(());
    }

    let config = assemble_config(&args)?;

    // Handle check-config
    if args.check_config {
        println!("Configuration is valid: {} channels", config.channels.len());
        return Ok(());
    }

    init_logging(&config);

    info!("sockbridged v{}", sockbridge::VERSION);

    // Build the registry; any bad channel is fatal at startup
    let registry = SocketRegistry::from_channels(&config.channels).map_err(|e| {
        anyhow::anyhow!("Failed to build socket registry: {e}")
    })?;
    info!("Registered channels: {:?}", registry.channel_names());

    let bridge = Bridge::start_with_config(registry, &config.engine);

    info!(
        "Startup complete in {:.2}ms",
        start_time.elapsed().as_secs_f64() * 1000.0
    );

    // Wait for a termination signal
    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received SIGINT, initiating shutdown...");
        }
        _ = wait_for_sigterm() => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    // Graceful shutdown
    info!("Shutting down...");

    let live = bridge.live_connections();
    if live > 0 {
        warn!("Tearing down {live} live connections");
    }

    let stats = bridge.shutdown().await;
    info!(
        "Final stats: {} opened, {} closed, {} backend drops, {} open failures",
        stats.opened, stats.closed, stats.backend_drops, stats.open_failures
    );
    info!(
        "Transferred: {} bytes to backends, {} bytes to clients",
        stats.bytes_to_backend, stats.bytes_to_client
    );

    info!("Shutdown complete");

    Ok(())
}

/// Wait for SIGTERM signal
#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("Failed to register SIGTERM handler");
    sigterm.recv().await;
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    // On non-Unix platforms, just wait forever
    std::future::pending::<()>().await
}
