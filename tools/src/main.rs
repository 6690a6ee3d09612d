//! rollup-runner: headless ingest loop for the rollup engine.
//!
//! Usage:
//!   rollup-runner --db rollup.db
//!   rollup-runner --config rollup.json --no-compactor
//!
//! Reads one JSON command per line on stdin, writes one JSON reply per line
//! on stdout:
//!   {"type":"ingest","event":{...}}
//!   {"type":"totals","scope":"broadcast","id":"42"}   (totals + last_updated)
//!   {"type":"compact"}
//!   {"type":"quit"}

use anyhow::{Context, Result};
use rollup_core::{
    config::RollupConfig,
    engine::{IngestOutcome, RollupEngine},
    error::RollupResult,
    event::RowEvent,
    types::{AggregateKey, Scope},
};
use std::env;
use std::io::{self, BufRead, Write};

#[derive(serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IpcCommand {
    Ingest { event: RowEvent },
    Totals { scope: Scope, id: String },
    Compact,
    Quit,
}

#[derive(Default)]
struct RunStats {
    commands:  u64,
    applied:   u64,
    no_change: u64,
    duplicate: u64,
    errors:    u64,
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let mut config = match flag_value(&args, "--config") {
        Some(path) => RollupConfig::load(path).with_context(|| format!("loading {path}"))?,
        None => RollupConfig::default(),
    };
    if let Some(db) = flag_value(&args, "--db") {
        config.database.path = db.to_string();
    }
    let run_compactor = !args.iter().any(|a| a == "--no-compactor");

    eprintln!("rollup-runner");
    eprintln!("  db:         {}", config.database.path);
    eprintln!("  compactor:  {}", if run_compactor { "on" } else { "off" });
    eprintln!();

    let engine = RollupEngine::open(&config)?;

    // In-memory databases cannot be shared with a second connection.
    let compactor = if run_compactor && engine.store().path().is_some() {
        Some(engine.compactor(config.compactor.clone())?.spawn_periodic()?)
    } else {
        None
    };

    let stats = run_ipc_loop(&engine, &config)?;

    if let Some(handle) = compactor {
        handle.stop();
    }
    print_summary(&engine, &stats)?;
    Ok(())
}

fn run_ipc_loop(engine: &RollupEngine, config: &RollupConfig) -> Result<RunStats> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut handle = stdin.lock();
    let mut buffer = String::new();
    let mut stats = RunStats::default();

    loop {
        buffer.clear();
        let bytes_read = handle.read_line(&mut buffer)?;
        if bytes_read == 0 {
            break; // EOF
        }
        if buffer.trim().is_empty() {
            continue;
        }
        stats.commands += 1;

        let cmd: IpcCommand = match serde_json::from_str(&buffer) {
            Ok(c) => c,
            Err(e) => {
                stats.errors += 1;
                let err_json = serde_json::json!({ "error": e.to_string() });
                writeln!(stdout, "{}", err_json)?;
                stdout.flush()?;
                continue;
            }
        };

        let reply = match cmd {
            IpcCommand::Quit => break,
            IpcCommand::Ingest { mut event } => {
                if event.event_id.is_empty() {
                    event.event_id = uuid::Uuid::new_v4().to_string();
                }
                match engine.ingest(&event) {
                    Ok(outcome) => {
                        match &outcome {
                            IngestOutcome::Applied { .. } => stats.applied += 1,
                            IngestOutcome::NoChange => stats.no_change += 1,
                            IngestOutcome::Duplicate => stats.duplicate += 1,
                        }
                        serde_json::to_value(&outcome)?
                    }
                    Err(e) => {
                        stats.errors += 1;
                        log::error!("event={} ingest failed: {e}", event.event_id);
                        serde_json::json!({ "error": e.to_string(), "event_id": event.event_id })
                    }
                }
            }
            IpcCommand::Totals { scope, id } => match AggregateKey::new(scope, id) {
                Ok(key) => match totals_reply(engine, &key) {
                    Ok(reply) => reply,
                    Err(e) => {
                        stats.errors += 1;
                        serde_json::json!({ "error": e.to_string() })
                    }
                },
                Err(e) => {
                    stats.errors += 1;
                    serde_json::json!({ "error": e.to_string() })
                }
            },
            IpcCommand::Compact => serde_json::to_value(engine.compact(&config.compactor))?,
        };

        writeln!(stdout, "{}", reply)?;
        stdout.flush()?;
    }
    Ok(stats)
}

fn totals_reply(engine: &RollupEngine, key: &AggregateKey) -> RollupResult<serde_json::Value> {
    let totals = engine.get_totals(key)?;
    let last_updated = engine.last_updated(key)?;
    Ok(serde_json::json!({ "key": key, "totals": totals, "last_updated": last_updated }))
}

fn print_summary(engine: &RollupEngine, stats: &RunStats) -> Result<()> {
    eprintln!("=== RUN SUMMARY ===");
    eprintln!("  commands:     {}", stats.commands);
    eprintln!("  applied:      {}", stats.applied);
    eprintln!("  no change:    {}", stats.no_change);
    eprintln!("  duplicates:   {}", stats.duplicate);
    eprintln!("  errors:       {}", stats.errors);
    eprintln!("  records:      {}", engine.store().delta_record_count()?);
    eprintln!("  watermarks:   {}", engine.store().processed_event_count()?);

    for scope in Scope::ALL {
        let totals = engine.totals_for_scope(scope)?;
        if totals.is_empty() {
            continue;
        }
        eprintln!();
        eprintln!("=== {} TOTALS ({} keys) ===", scope.as_str().to_uppercase(), totals.len());
        for (key, counters) in totals.iter().take(20) {
            let line: Vec<String> = counters.iter().map(|(n, v)| format!("{n}={v}")).collect();
            eprintln!("  {:<16} {}", key.id(), line.join(" "));
        }
    }
    Ok(())
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}
