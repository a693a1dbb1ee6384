use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use whalewatch::models::config::WhaleWatchConfig;
use whalewatch::store::{DecisionSink, MemorySink};
use whalewatch::{Daemon, DataApiFeed, StaticFeed, Submission, TradeFeed};

#[derive(Parser, Debug)]
#[command(
    name = "whalewatch",
    about = "WhaleWatch - whale-trade signals decided by a multi-agent consensus panel"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/whalewatch.toml", global = true)]
    config: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll the public trade feed and decide on every whale trade until interrupted
    Run,

    /// Decide on trades read from a JSON file (or stdin) and print the decisions
    Evaluate {
        /// Read a JSON trade or array of trades from a file instead of stdin
        #[arg(short, long)]
        input: Option<String>,

        /// Skip network market lookups; use `[[markets]]` and trade titles only
        #[arg(long)]
        offline: bool,

        /// Keep decisions in memory instead of the SQLite log
        #[arg(long)]
        dry_run: bool,

        /// Pretty-print the output JSON
        #[arg(long)]
        pretty: bool,
    },
}

fn init_tracing(json: bool) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: &str) -> Result<WhaleWatchConfig> {
    let config_str = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config: {path}"))?;
    WhaleWatchConfig::from_toml_str(&config_str).with_context(|| "Failed to parse config")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = load_config(&cli.config)?;

    match cli.command {
        Command::Run => run(config).await,
        Command::Evaluate {
            input,
            offline,
            dry_run,
            pretty,
        } => evaluate(config, input, offline, dry_run, pretty).await,
    }
}

async fn run(config: WhaleWatchConfig) -> Result<()> {
    let sink = whalewatch::open_sink(&config)
        .with_context(|| format!("Failed to open decision log: {}", config.sink.sqlite_path))?;
    let pipeline =
        whalewatch::build_pipeline(&config, sink, false).context("Failed to build pipeline")?;
    let feed: Arc<dyn TradeFeed> =
        Arc::new(DataApiFeed::new(&config.feed).context("Failed to build trade feed")?);

    let daemon = Daemon::new(
        feed,
        Arc::new(pipeline),
        Duration::from_secs(config.feed.poll_interval_seconds),
    );
    let cancel = daemon.cancel_token();

    // Handle shutdown signals
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Received shutdown signal");
        cancel.cancel();
    });

    daemon.run().await;
    Ok(())
}

async fn evaluate(
    config: WhaleWatchConfig,
    input: Option<String>,
    offline: bool,
    dry_run: bool,
    pretty: bool,
) -> Result<()> {
    let trades_json = if let Some(input_path) = &input {
        std::fs::read_to_string(input_path)
            .with_context(|| format!("Failed to read input: {input_path}"))?
    } else {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read from stdin")?;
        buf
    };
    let feed = StaticFeed::from_json(&trades_json).context("Failed to parse trade JSON")?;

    let sink: Arc<dyn DecisionSink> = if dry_run {
        Arc::new(MemorySink::new())
    } else {
        whalewatch::open_sink(&config)
            .with_context(|| format!("Failed to open decision log: {}", config.sink.sqlite_path))?
    };
    let pipeline =
        whalewatch::build_pipeline(&config, sink, offline).context("Failed to build pipeline")?;

    let mut handles = Vec::new();
    for raw in feed.fetch().await? {
        match pipeline.submit(&raw).await {
            Ok(Submission::Signal { handle, .. }) => handles.push(handle),
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "Trade rejected"),
        }
    }

    let mut decisions = Vec::new();
    for handle in handles {
        if let Some(decision) = handle.await.context("Signal task failed")? {
            decisions.push(decision);
        }
    }
    pipeline.shutdown().await;

    // Output decisions as JSON to stdout
    let output = if pretty {
        serde_json::to_string_pretty(&decisions)?
    } else {
        serde_json::to_string(&decisions)?
    };
    println!("{output}");

    Ok(())
}
