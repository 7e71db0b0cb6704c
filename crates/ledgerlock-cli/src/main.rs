//! Ledgerlock CLI - configuration and lock manager simulation

use clap::{Parser, Subcommand};
use ledgerlock_core::config::Config;
use ledgerlock_core::locking::{
    AcquireOptions, LockError, LockManager, LockManagerStatus, LockPriority, LockType,
};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Parser)]
#[command(name = "ledgerlock")]
#[command(author, version, about = "In-process resource lock manager", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Run concurrent clients against a lock manager and report its status
    Simulate {
        /// Number of concurrent clients
        #[arg(short, long, default_value_t = 4)]
        workers: usize,
        /// Number of distinct resources
        #[arg(short, long, default_value_t = 3)]
        resources: usize,
        /// Acquire/release cycles per client
        #[arg(short, long, default_value_t = 25)]
        operations: usize,
        /// How long each lock is held, in milliseconds
        #[arg(long, default_value_t = 5)]
        hold_ms: u64,
        /// Wait timeout per acquire, in milliseconds
        #[arg(long, default_value_t = 2000)]
        wait_timeout_ms: u64,
        /// Seed for the client random generators
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a config value
    Get { key: String },
    /// Set a config value
    Set { key: String, value: String },
    /// List all config values
    List,
    /// Reset to defaults
    Reset,
    /// Show config file path
    Path,
}

#[derive(Debug, Default, Clone, Copy, Serialize)]
struct ClientTally {
    acquired: u64,
    timed_out: u64,
}

#[derive(Debug, Serialize)]
struct SimulationReport {
    workers: usize,
    resources: usize,
    operations: usize,
    acquired: u64,
    timed_out: u64,
    elapsed_ms: u128,
    status: LockManagerStatus,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so stdout stays parseable
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ledgerlock=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Config { action } => cmd_config(action, cli.format, cli.quiet),
        Commands::Simulate {
            workers,
            resources,
            operations,
            hold_ms,
            wait_timeout_ms,
            seed,
        } => {
            let params = SimulationParams {
                workers,
                resources,
                operations,
                hold: Duration::from_millis(hold_ms),
                wait_timeout: Duration::from_millis(wait_timeout_ms),
                seed,
            };
            cmd_simulate(params, cli.format, cli.quiet).await
        }
    }
}

fn cmd_config(action: ConfigAction, format: OutputFormat, quiet: bool) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            let value = config.get(&key)?;
            println!("{}", value);
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            if !quiet {
                println!("Set {} = {}", key, value);
            }
        }
        ConfigAction::List => {
            let config = Config::load()?;
            let items = config.list()?;
            if format == OutputFormat::Json {
                let map: serde_json::Map<String, serde_json::Value> = items
                    .into_iter()
                    .map(|(key, value)| (key, serde_json::Value::String(value)))
                    .collect();
                println!("{}", serde_json::to_string_pretty(&map)?);
            } else {
                for (key, value) in items {
                    println!("{} = {}", key, value);
                }
            }
        }
        ConfigAction::Reset => {
            Config::reset()?;
            if !quiet {
                println!("Configuration reset to defaults.");
            }
        }
        ConfigAction::Path => {
            let path = Config::config_path()?;
            println!("{}", path.display());
        }
    }
    Ok(())
}

struct SimulationParams {
    workers: usize,
    resources: usize,
    operations: usize,
    hold: Duration,
    wait_timeout: Duration,
    seed: u64,
}

async fn cmd_simulate(
    params: SimulationParams,
    format: OutputFormat,
    quiet: bool,
) -> anyhow::Result<()> {
    if params.workers == 0 || params.resources == 0 {
        anyhow::bail!("--workers and --resources must be greater than zero");
    }

    let config = Config::load()?;
    let manager = Arc::new(LockManager::new(config.locking.to_lock_config()));
    manager.start().await;

    let resources: Arc<Vec<String>> = Arc::new(
        (0..params.resources)
            .map(|i| format!("account:{}", i))
            .collect(),
    );

    info!(
        workers = params.workers,
        resources = params.resources,
        operations = params.operations,
        seed = params.seed,
        "Simulation started"
    );
    let started = Instant::now();

    let handles: Vec<_> = (0..params.workers)
        .map(|i| {
            let manager = manager.clone();
            let resources = resources.clone();
            let rng = StdRng::seed_from_u64(params.seed.wrapping_add(i as u64));
            let client = format!("client-{}", i);
            tokio::spawn(run_client(
                manager,
                resources,
                client,
                rng,
                params.operations,
                params.hold,
                params.wait_timeout,
            ))
        })
        .collect();

    let mut total = ClientTally::default();
    for handle in handles {
        let tally = handle.await??;
        total.acquired += tally.acquired;
        total.timed_out += tally.timed_out;
    }

    manager.stop().await;
    manager.process_releases().await;
    let status = manager.get_status().await;

    let report = SimulationReport {
        workers: params.workers,
        resources: params.resources,
        operations: params.operations,
        acquired: total.acquired,
        timed_out: total.timed_out,
        elapsed_ms: started.elapsed().as_millis(),
        status,
    };

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text if quiet => {
            println!("{} acquired, {} timed out", report.acquired, report.timed_out)
        }
        OutputFormat::Text => print_report(&report),
    }
    Ok(())
}

async fn run_client(
    manager: Arc<LockManager>,
    resources: Arc<Vec<String>>,
    client: String,
    mut rng: StdRng,
    operations: usize,
    hold: Duration,
    wait_timeout: Duration,
) -> anyhow::Result<ClientTally> {
    const PRIORITIES: [LockPriority; 4] = [
        LockPriority::Low,
        LockPriority::Normal,
        LockPriority::High,
        LockPriority::Critical,
    ];

    let mut tally = ClientTally::default();
    for _ in 0..operations {
        let resource = &resources[rng.gen_range(0..resources.len())];
        let lock_type = *LockType::ALL.choose(&mut rng).unwrap_or(&LockType::Read);
        let priority = *PRIORITIES.choose(&mut rng).unwrap_or(&LockPriority::Normal);
        let options = AcquireOptions::new()
            .with_priority(priority)
            .with_wait_timeout(wait_timeout);

        match manager
            .acquire_lock(resource, lock_type, &client, options)
            .await
        {
            Ok(lock_id) => {
                tally.acquired += 1;
                tokio::time::sleep(hold).await;
                if !manager.release_lock(lock_id, &client).await {
                    debug!(client = %client, lock_id = %lock_id, "Lock was reclaimed before release");
                }
            }
            Err(LockError::Timeout { waited_ms, .. }) => {
                tally.timed_out += 1;
                warn!(client = %client, resource = %resource, waited_ms, "Acquire timed out");
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(tally)
}

fn print_report(report: &SimulationReport) {
    let status = &report.status;
    println!("Simulation complete");
    println!("===================");
    println!(
        "Clients: {}  Resources: {}  Operations/client: {}",
        report.workers, report.resources, report.operations
    );
    println!("Elapsed: {} ms", report.elapsed_ms);
    println!("Acquired: {}", report.acquired);
    println!("Timed out: {}", report.timed_out);
    println!();
    println!("Lock manager status");
    println!("  Active locks:       {}", status.active_locks);
    println!("  Pending requests:   {}", status.pending_requests);
    println!("  Granted:            {}", status.stats.granted);
    println!("  Released:           {}", status.stats.released);
    println!("  Timeouts:           {}", status.stats.timeouts);
    println!("  Deadlocks detected: {}", status.stats.deadlocks_detected);
    println!("  Locks healed:       {}", status.stats.locks_healed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_simulate_defaults() {
        let cli = Cli::try_parse_from(["ledgerlock", "simulate"]).unwrap();
        match cli.command {
            Commands::Simulate {
                workers,
                resources,
                operations,
                seed,
                ..
            } => {
                assert_eq!(workers, 4);
                assert_eq!(resources, 3);
                assert_eq!(operations, 25);
                assert_eq!(seed, 42);
            }
            _ => panic!("expected simulate"),
        }
    }

    #[test]
    fn test_global_format_flag() {
        let cli = Cli::try_parse_from(["ledgerlock", "config", "list", "--format", "json"]).unwrap();
        assert!(cli.format == OutputFormat::Json);
    }

    #[tokio::test]
    async fn test_client_tally_counts_every_operation() {
        let manager = Arc::new(LockManager::with_defaults());
        let resources = Arc::new(vec!["account:0".to_string()]);
        let tally = run_client(
            manager.clone(),
            resources,
            "client-0".to_string(),
            StdRng::seed_from_u64(7),
            10,
            Duration::from_millis(1),
            Duration::from_millis(500),
        )
        .await
        .unwrap();

        assert_eq!(tally.acquired + tally.timed_out, 10);
        assert_eq!(tally.acquired, 10);
        assert_eq!(manager.get_status().await.active_locks, 0);
    }
}
