//! UX Daemon Binary
//!
//! ## Usage
//!
//! ```bash
//! # Echo server on the default port
//! uxd serve
//!
//! # Shell commands over framed links, one process per connection
//! uxd serve --port 7100 --driver command --fork
//!
//! # Settings from a file, overridden by the environment
//! UXD_PORT=7200 uxd serve --config uxd.json
//!
//! # Send one request and print the reply
//! uxd ping --port 7100 "uname -a"
//! ```

use std::io::Write;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use ux_comms::CommsConfig;
use ux_daemon::{ping, Daemon, DaemonConfig, DaemonConfigBuilder, DaemonResult, PingOptions};

#[derive(Parser, Debug)]
#[command(name = "uxd")]
#[command(about = "Serve data-source drivers over framed TCP links")]
#[command(version)]
struct Cli {
    /// Debug-level logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Listen and dispatch every connection to a driver
    Serve(ServeArgs),
    /// Send one payload and print the first reply
    Ping(PingArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Driver name (echo, command, sink)
    #[arg(short, long)]
    driver: Option<String>,

    /// Serve each connection in a forked process
    #[arg(long)]
    fork: bool,

    /// Exchange unframed bytes
    #[arg(long)]
    raw: bool,

    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct PingArgs {
    /// Host running the daemon
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Daemon port
    #[arg(short, long)]
    port: u16,

    /// Give up after this many milliseconds
    #[arg(long, default_value_t = 5000)]
    timeout_ms: u64,

    /// Send and expect unframed bytes
    #[arg(long)]
    raw: bool,

    /// Payload to send
    payload: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "ux_daemon=debug,ux_comms=debug"
    } else {
        "ux_daemon=info,ux_comms=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let result = match cli.command {
        Command::Serve(args) => serve(args),
        Command::Ping(args) => run_ping(args),
    };
    if let Err(err) = &result {
        tracing::error!(error = %err, "uxd failed");
    }
    Ok(result?)
}

fn serve(args: ServeArgs) -> DaemonResult<()> {
    let base = match &args.config {
        Some(path) => DaemonConfig::from_json_file(path)?,
        None => DaemonConfig::default(),
    };
    let config = DaemonConfigBuilder::from_env()?.build_on(base);

    let mut flags = DaemonConfig::builder();
    if let Some(port) = args.port {
        flags = flags.port(port);
    }
    if let Some(driver) = &args.driver {
        flags = flags.driver(driver);
    }
    if args.fork {
        flags = flags.fork_on_accept(true);
    }
    if args.raw {
        flags = flags.raw_mode(true);
    }
    let config = flags.build_on(config);

    Daemon::start(&config)?.run()
}

fn run_ping(args: PingArgs) -> DaemonResult<()> {
    let options = PingOptions {
        host: args.host,
        port: args.port,
        timeout_ms: args.timeout_ms,
        raw_mode: args.raw,
    };
    let reply = ping(&options, args.payload.as_bytes(), CommsConfig::default())?;

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&reply)?;
    if !reply.ends_with(b"\n") {
        stdout.write_all(b"\n")?;
    }
    Ok(())
}
