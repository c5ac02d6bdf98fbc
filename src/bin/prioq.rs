//! prioq CLI — drive a simulated reconcile loop against the queue.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::{Parser, Subcommand};
use prioqueue::config::Config;
use prioqueue::telemetry::work::{record_outcome, start_reconcile_span};
use prioqueue::telemetry::{TelemetryConfig, init_telemetry};
use prioqueue::{AddOpts, PriorityQueue};
use serde::Serialize;
use tracing::{Instrument, info};

#[derive(Parser)]
#[command(name = "prioq", about = "Priority work queue for reconcile loops")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run producers and workers against an in-memory queue
    Run {
        /// Concurrent workers
        #[arg(long, default_value_t = 4)]
        workers: usize,
        /// Distinct keys per round
        #[arg(long, default_value_t = 16)]
        keys: usize,
        /// Producer rounds; keys repeat across rounds and get merged
        #[arg(long, default_value_t = 3)]
        rounds: usize,
        /// Every Nth reconcile of a key fails and is rate-limited (0 = never)
        #[arg(long, default_value_t = 3)]
        fail_every: u32,
        /// Workers stop after this long without a handout
        #[arg(long, default_value_t = 500)]
        idle_ms: u64,
        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Default, Serialize)]
struct KeyStats {
    handouts: u32,
    failures: u32,
    max_priority: i32,
}

#[derive(Debug, Serialize)]
struct Summary {
    queue: String,
    handouts: u32,
    failures: u32,
    keys: BTreeMap<String, KeyStats>,
}

type Stats = Arc<Mutex<BTreeMap<String, KeyStats>>>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            workers,
            keys,
            rounds,
            fail_every,
            idle_ms,
            json,
        } => {
            cmd_run(
                workers,
                keys,
                rounds,
                fail_every,
                Duration::from_millis(idle_ms),
                json,
            )
            .await
        }
    }
}

async fn cmd_run(
    workers: usize,
    keys: usize,
    rounds: usize,
    fail_every: u32,
    idle: Duration,
    json: bool,
) -> anyhow::Result<()> {
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "prioq".to_string(),
        log_level: config.log_level.clone(),
    })?;

    let queue: PriorityQueue<String> = PriorityQueue::builder(config.queue_name.clone())
        .rate_limiter(config.rate_limiter())
        .build();

    let q = queue.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        q.shut_down();
    });

    let stats: Stats = Arc::default();
    let mut handles = Vec::with_capacity(workers);
    for worker in 0..workers {
        let queue = queue.clone();
        let stats = Arc::clone(&stats);
        handles.push(tokio::spawn(run_worker(worker, queue, stats, fail_every, idle)));
    }

    for round in 0..rounds {
        for i in 0..keys {
            let mut opts = AddOpts::new().priority(((i + round) % 3) as i32);
            if i % 4 == 0 {
                opts = opts.after(Duration::from_millis(10 * (round as u64 + 1)));
            }
            queue.add_with_opts(opts, [format!("key-{i:03}")]);
        }
        info!(round, ready = queue.len(), "round queued");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    for handle in handles {
        handle.await?;
    }
    queue.shut_down();

    let keys = std::mem::take(&mut *stats.lock().map_err(|_| anyhow::anyhow!("stats poisoned"))?);
    let summary = Summary {
        queue: queue.name().to_string(),
        handouts: keys.values().map(|s| s.handouts).sum(),
        failures: keys.values().map(|s| s.failures).sum(),
        keys,
    };
    print_summary(&summary, json)
}

/// Take keys until the queue stays idle for `idle` or shuts down.
async fn run_worker(
    worker: usize,
    queue: PriorityQueue<String>,
    stats: Stats,
    fail_every: u32,
    idle: Duration,
) {
    while let Ok(Some((key, priority))) = tokio::time::timeout(idle, queue.get_with_priority()).await
    {
        let span = start_reconcile_span(queue.name(), &key, priority);
        let failed = async {
            let attempt = {
                let mut stats = stats.lock().unwrap_or_else(|e| e.into_inner());
                let entry = stats.entry(key.clone()).or_default();
                entry.handouts += 1;
                entry.max_priority = entry.max_priority.max(priority);
                entry.handouts
            };
            // Stand-in for real reconcile work.
            tokio::time::sleep(Duration::from_millis(2)).await;
            fail_every > 0 && attempt % fail_every == 0
        }
        .instrument(span.clone())
        .await;

        if failed {
            if let Some(entry) = stats.lock().unwrap_or_else(|e| e.into_inner()).get_mut(&key) {
                entry.failures += 1;
            }
            record_outcome(&span, "requeued");
            queue.add_rate_limited(key.clone());
        } else {
            record_outcome(&span, "ok");
            queue.forget(&key);
        }
        queue.done(&key);
    }
    info!(worker, "worker idle, stopping");
}

fn print_summary(summary: &Summary, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }

    println!("{:<12}  {:>8}  {:>8}  {:>4}", "KEY", "HANDOUTS", "FAILURES", "PRI");
    println!("{}", "-".repeat(38));
    for (key, stats) in &summary.keys {
        println!(
            "{:<12}  {:>8}  {:>8}  {:>4}",
            key, stats.handouts, stats.failures, stats.max_priority
        );
    }
    println!(
        "\nqueue {}: {} handout(s), {} failure(s)",
        summary.queue, summary.handouts, summary.failures
    );
    Ok(())
}
