use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use futures::future::join_all;
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

use sluice::config::SluiceConfig;
use sluice::ratelimit::{Decision, Limiter};

/// Leaky-bucket request admission.
#[derive(Debug, Parser)]
#[command(name = "sluice", version, about)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Issue a series of admission requests for one key and report the decisions
    Simulate(SimulateArgs),
    /// Print the effective configuration
    Config,
}

#[derive(Debug, Args)]
struct SimulateArgs {
    /// Rate limit key
    #[arg(long, default_value = "benjamin")]
    key: String,

    /// Number of requests to issue
    #[arg(long, default_value_t = 15)]
    calls: usize,

    /// Issue all requests concurrently instead of back-to-back
    #[arg(long)]
    concurrent: bool,

    /// Pause between sequential requests, in milliseconds
    #[arg(long, default_value_t = 0)]
    sleep_ms: u64,

    /// Override limiter.rate
    #[arg(long)]
    rate: Option<u64>,

    /// Override limiter.interval_ms
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Override limiter.burst
    #[arg(long)]
    burst: Option<u64>,

    /// Print one JSON object per decision
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .init();

    let config = SluiceConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Simulate(args) => simulate(config, args).await,
        Command::Config => {
            print!("{}", config.to_yaml()?);
            Ok(())
        }
    }
}

async fn simulate(mut config: SluiceConfig, args: SimulateArgs) -> anyhow::Result<()> {
    if let Some(rate) = args.rate {
        config.limiter.rate = rate;
    }
    if let Some(interval_ms) = args.interval_ms {
        config.limiter.interval_ms = interval_ms;
    }
    if let Some(burst) = args.burst {
        config.limiter.burst = burst;
    }
    config.validate()?;

    let limiter = Limiter::from_config(&config.limiter, config.backend.build_memory())?;
    info!(
        key = %args.key,
        calls = args.calls,
        rate = limiter.rate(),
        interval = ?limiter.interval(),
        burst = limiter.burst(),
        concurrent = args.concurrent,
        "Starting simulation"
    );

    let decisions: Vec<Decision> = if args.concurrent {
        join_all((0..args.calls).map(|_| limiter.check(&args.key)))
            .await
            .into_iter()
            .collect::<Result<_, _>>()?
    } else {
        let mut decisions = Vec::with_capacity(args.calls);
        for i in 0..args.calls {
            if i > 0 && args.sleep_ms > 0 {
                tokio::time::sleep(Duration::from_millis(args.sleep_ms)).await;
            }
            decisions.push(limiter.check(&args.key).await?);
        }
        decisions
    };

    let mut total_wait = Duration::ZERO;
    for (i, decision) in decisions.iter().enumerate() {
        total_wait += decision.wait;
        if args.json {
            println!(
                "{}",
                json!({
                    "call": i + 1,
                    "key": args.key,
                    "admitted": decision.is_allowed(),
                    "wait_ms": decision.wait.as_secs_f64() * 1000.0,
                    "remaining": decision.remaining,
                })
            );
        } else if decision.is_allowed() {
            println!("#{:<4} admitted  remaining={}", i + 1, decision.remaining);
        } else {
            println!("#{:<4} denied    wait={:?}", i + 1, decision.wait);
        }
    }

    let admitted = decisions.iter().filter(|d| d.is_allowed()).count();
    info!(
        admitted = admitted,
        denied = decisions.len() - admitted,
        total_wait = ?total_wait,
        "Simulation finished"
    );

    Ok(())
}
