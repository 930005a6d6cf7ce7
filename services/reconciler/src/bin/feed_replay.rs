//! Replay a captured feed through a reconciliation manager.
//!
//! Input is JSON lines, one message per line:
//!
//! ```text
//! {"type":"snapshot","data":{"bids":[[50000,1.0]],"asks":[[50100,1.5]]},"sequence_id":1000}
//! {"type":"delta","kind":"update","path":"bids","data":[[50000,1.5]],"sequence_id":1001}
//! {"type":"checksum","expected":"9f2c..."}
//! ```
//!
//! Prints the final state and statistics as JSON on stdout. Logs go to
//! stderr and follow `RUST_LOG`.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use feed_types::ids::{FeedId, FeedKey, Symbol};
use reconciler::{
    Delta, DeltaTarget, OrderBookData, ReconciliationManager, ReconciliationRules, SnapshotKind,
    Value,
};

#[derive(Parser)]
#[command(name = "feed-replay")]
#[command(about = "Replay a snapshot/delta capture through the reconciler", long_about = None)]
struct Cli {
    /// JSON-lines capture file
    input: PathBuf,

    /// Symbol the capture belongs to
    #[arg(long, default_value = "BTC/USDT")]
    symbol: String,

    /// Feed name (orderbook, ticker, ...)
    #[arg(long, default_value = "orderbook")]
    feed: String,

    /// Rules document (JSON); defaults apply to omitted fields
    #[arg(long)]
    rules: Option<PathBuf>,

    /// Treat payloads as generic values instead of order books
    #[arg(long, default_value_t = false)]
    generic: bool,

    /// Levels per side in the printed book
    #[arg(long, default_value_t = 10)]
    depth: usize,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum FeedMessage<T> {
    Snapshot {
        data: T,
        #[serde(default)]
        sequence_id: Option<u64>,
        #[serde(default)]
        timestamp: Option<i64>,
    },
    Delta(Delta),
    Checksum {
        expected: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let rules = match &cli.rules {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("reading rules {}", path.display()))?;
            ReconciliationRules::from_json_str(&raw)
                .with_context(|| format!("parsing rules {}", path.display()))?
        }
        None => ReconciliationRules::default(),
    };
    let symbol = Symbol::try_new(cli.symbol.clone()).context("symbol must not be blank")?;
    let key = FeedKey::new(symbol, FeedId::new(cli.feed.clone()));
    let capture = fs::read_to_string(&cli.input)
        .with_context(|| format!("reading capture {}", cli.input.display()))?;

    info!(feed = %key, input = %cli.input.display(), "Replaying capture");

    let report = if cli.generic {
        let mut manager = ReconciliationManager::<Value>::new(key, SnapshotKind::Generic, rules)?;
        let messages = replay(&mut manager, &capture)?;
        let snapshot = manager.snapshot();
        json!({
            "feed": manager.key().to_string(),
            "messages": messages,
            "state": manager.state_label(),
            "sequence_id": snapshot.as_ref().and_then(|s| s.sequence_id),
            "data": snapshot.map(|s| s.data),
            "stats": manager.stats(),
        })
    } else {
        let mut manager =
            ReconciliationManager::<OrderBookData>::new(key, SnapshotKind::OrderBook, rules)?;
        let messages = replay(&mut manager, &capture)?;
        let snapshot = manager.snapshot();
        let (bids, asks) = snapshot
            .as_ref()
            .map(|s| s.data.depth(cli.depth))
            .unwrap_or_default();
        let (best_bid, best_ask) = manager.best_bid_ask();
        json!({
            "feed": manager.key().to_string(),
            "messages": messages,
            "state": manager.state_label(),
            "sequence_id": snapshot.as_ref().and_then(|s| s.sequence_id),
            "best_bid": best_bid,
            "best_ask": best_ask,
            "mid_price": manager.mid_price(),
            "spread": manager.spread(),
            "bids": bids,
            "asks": asks,
            "stats": manager.stats(),
        })
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Feed every message of `capture` to `manager`. Returns the message count.
fn replay<T>(manager: &mut ReconciliationManager<T>, capture: &str) -> Result<usize>
where
    T: DeltaTarget + DeserializeOwned,
{
    let mut count = 0;
    for (index, line) in capture.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line_no = index + 1;

        let message: FeedMessage<T> = serde_json::from_str(line)
            .with_context(|| format!("line {}: malformed feed message", line_no))?;
        match message {
            FeedMessage::Snapshot {
                data,
                sequence_id,
                timestamp: Some(timestamp),
            } => {
                manager.handle_snapshot_at(data, sequence_id, timestamp);
            }
            FeedMessage::Snapshot { data, sequence_id, .. } => {
                manager.handle_snapshot(data, sequence_id);
            }
            FeedMessage::Delta(delta) => {
                manager
                    .handle_delta(delta)
                    .with_context(|| format!("line {}: delta rejected", line_no))?;
            }
            FeedMessage::Checksum { expected } => {
                manager
                    .validate_checksum(&expected)
                    .with_context(|| format!("line {}: checksum rejected", line_no))?;
            }
        }
        count += 1;

        if let Some(request) = manager.take_resync_request() {
            warn!(
                line = line_no,
                reason = ?request.reason,
                last_sequence = ?request.last_sequence,
                "Resync requested, waiting for the next snapshot in the capture"
            );
        }
    }
    Ok(count)
}
