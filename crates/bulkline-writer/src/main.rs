//! bulkline CLI
//!
//! Reads NDJSON write records, batches them per target and writes the
//! batches to stdout as NDJSON. Logs go to stderr.
//!
//! Input line: `{"target": {"database": "db", "collection": "col"}, "op": {"kind": "insert_one", "document": {..}}}`

use bulkline_core::prelude::*;
use bulkline_writer::{JsonLinesSink, Registry};
use clap::Parser;
use serde::Deserialize;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "bulkline")]
#[command(about = "Batch NDJSON write operations per target")]
#[command(version)]
struct Args {
    /// Configuration file (any format the `config` crate understands)
    #[arg(long, env = "BULKLINE_CONFIG")]
    config: Option<String>,

    /// Input file; stdin when omitted or "-"
    #[arg(long, short)]
    input: Option<String>,

    /// Ops per batch
    #[arg(long, env = "BULKLINE_LIMIT")]
    limit: Option<usize>,

    /// Batches in flight at once
    #[arg(long, env = "BULKLINE_MAX_IN_FLIGHT")]
    max_in_flight: Option<usize>,

    /// Mark batches as ordered
    #[arg(long)]
    ordered: bool,

    /// Flush every block after this many input lines
    #[arg(long)]
    flush_every: Option<usize>,

    #[arg(long, env = "LOG_LEVEL")]
    log_level: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Record {
    target: Target,
    op: WriteOp,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = EngineConfig::load(args.config.as_deref())?;
    if let Some(limit) = args.limit {
        config.batch.limit = limit;
    }
    if let Some(max_in_flight) = args.max_in_flight {
        config.batch.max_in_flight = max_in_flight;
    }
    if args.ordered {
        config.batch.ordered = true;
    }
    if let Some(level) = args.log_level.clone() {
        config.observability.log_level = level;
    }
    config.validate()?;

    init_tracing(&config);
    info!(version = env!("CARGO_PKG_VERSION"), limit = config.batch.limit, "Starting bulkline");

    let sink = Arc::new(JsonLinesSink::new(tokio::io::stdout()));
    let registry = Registry::new(&config, sink)?;

    let result = match args.input.as_deref() {
        None | Some("-") => pump(BufReader::new(tokio::io::stdin()), &registry, args.flush_every).await,
        Some(path) => {
            let file = tokio::fs::File::open(path).await?;
            pump(BufReader::new(file), &registry, args.flush_every).await
        }
    };

    registry.close_all().await;

    let stats = result?;
    if let Some(dlq) = registry.dlq() {
        let failed = dlq.len().await;
        if failed > 0 {
            warn!(failed_batches = failed, "Batches in dead letter queue");
        }
    }
    info!(
        accepted = stats.accepted,
        skipped = stats.skipped,
        targets = registry.len().await,
        "bulkline finished"
    );
    Ok(())
}

fn init_tracing(config: &EngineConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.observability.log_level));
    let json = config.observability.log_format == "json";

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json().with_writer(std::io::stderr)))
        .with((!json).then(|| fmt::layer().with_writer(std::io::stderr)))
        .init();
}

#[derive(Debug, Default)]
struct PumpStats {
    accepted: u64,
    skipped: u64,
}

async fn pump<R>(reader: R, registry: &Registry, flush_every: Option<usize>) -> Result<PumpStats>
where
    R: AsyncBufRead + Unpin,
{
    let mut stats = PumpStats::default();
    let mut lines = reader.lines();
    let mut line_no = 0usize;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<Record>(&line) {
            Ok(record) => {
                let block = registry.block(&record.target).await?;
                block.add(record.op).await?;
                stats.accepted += 1;
            }
            Err(e) => {
                error!(line = line_no, error = %e, "Skipping malformed record");
                stats.skipped += 1;
            }
        }

        if flush_every.is_some_and(|n| n > 0 && line_no % n == 0) {
            for target in registry.targets().await {
                if let Some(block) = registry.get(&target).await {
                    block.flush().await?;
                }
            }
        }
    }

    Ok(stats)
}
