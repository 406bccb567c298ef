//! warmpoold: one instance of a self-scaling warm pool.
//!
//! Every running copy registers in the shared registry, accepts a single
//! connection at a time, and runs the lifecycle controller that spawns a
//! sibling when the pool runs short of idle instances or exits this
//! process when it is surplus.
//!
//! # Usage
//!
//! ```text
//! warmpoold run --config /etc/warmpool.toml
//! warmpoold status --registry /run/warmpool/pool.redb --json
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

mod config;
mod instance;
mod session;
mod status;

#[derive(Parser)]
#[command(name = "warmpoold", about = "warmpool instance daemon", version)]
struct Cli {
    /// Log output format.
    #[arg(long, value_enum, default_value = "text", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Join the pool and serve until no longer needed.
    Run(RunArgs),
    /// Print the pool snapshot and registered instances.
    Status {
        #[command(flatten)]
        source: SourceArgs,
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Remove records of instances that stopped sending heartbeats.
    Reap {
        #[command(flatten)]
        source: SourceArgs,
    },
}

/// Where configuration and the registry come from.
#[derive(Args, Clone, Default)]
pub struct SourceArgs {
    /// Path to warmpool.toml.
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Registry database file (overrides the config file).
    #[arg(long)]
    pub registry: Option<PathBuf>,
}

#[derive(Args, Clone, Default)]
pub struct RunArgs {
    #[command(flatten)]
    pub source: SourceArgs,
    /// Address to accept the connection on.
    #[arg(long)]
    pub listen: Option<String>,
    /// Minimum number of unoccupied instances.
    #[arg(long)]
    pub min_reserve: Option<u32>,
    /// Seconds between spawn attempts by one instance.
    #[arg(long)]
    pub spawn_cooldown: Option<u64>,
    /// Seconds of idleness before an instance may exit.
    #[arg(long)]
    pub grace_period: Option<u64>,
    /// Seconds between controller evaluations.
    #[arg(long)]
    pub tick_interval: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Run(args) => {
            let config = config::resolve(&args.source, Some(&args))?;
            instance::run(config).await
        }
        Command::Status { source, json } => {
            let config = config::resolve(&source, None)?;
            status::print_status(&config, json)
        }
        Command::Reap { source } => {
            let config = config::resolve(&source, None)?;
            status::reap(&config)
        }
    }
}

/// Filter used when `RUST_LOG` is unset.
const DEFAULT_LOG_FILTER: &str = "info,warmpoold=debug,warmpool=debug";

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::ffi::OsString;

    #[test]
    fn default_log_filter_enables_pool_debug() {
        let filter: tracing_subscriber::EnvFilter = DEFAULT_LOG_FILTER.parse().unwrap();
        let rendered = filter.to_string();
        assert!(rendered.contains("warmpoold=debug"));
        assert!(rendered.contains("warmpool=debug"));
    }

    #[test]
    fn log_format_defaults_to_text() {
        let cli = Cli::try_parse_from(["warmpoold", "run"]).unwrap();
        assert!(matches!(cli.log_format, LogFormat::Text));

        let cli = Cli::try_parse_from(["warmpoold", "--log-format", "json", "run"]).unwrap();
        assert!(matches!(cli.log_format, LogFormat::Json));
    }

    #[test]
    fn inherited_args_drop_fixed_listen_address() {
        let own = ["run", "--listen", "0.0.0.0:7000", "--min-reserve", "2"].map(OsString::from);
        let inherited = warmpool_lifecycle::strip_listen_args(own);
        let argv = std::iter::once(OsString::from("warmpoold")).chain(inherited);

        let cli = Cli::try_parse_from(argv).unwrap();
        let Command::Run(run) = cli.command else {
            panic!("expected run subcommand");
        };
        assert_eq!(run.listen, None);
        assert_eq!(run.min_reserve, Some(2));
    }
}
