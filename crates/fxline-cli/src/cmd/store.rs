//! `fxline store` - inspect the shared store

use anyhow::{Context, Result};
use chrono::DateTime;
use clap::{Args, Subcommand};
use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};

use fxline_cache::LeaseRecord;
use fxline_store::{KvStore, Partition};

use crate::config::Config;

#[derive(Args, Debug)]
pub struct StoreArgs {
    #[command(subcommand)]
    pub action: StoreAction,
}

#[derive(Subcommand, Debug)]
pub enum StoreAction {
    /// List stored keys with a short description
    List {
        /// Only keys starting with this prefix (e.g. `ecb-usd:` or `lock:`)
        #[arg(short, long, default_value = "")]
        prefix: String,
    },
    /// Print the raw value of one key
    Show {
        key: String,
    },
    /// Remove temp files left behind by interrupted writes
    Cleanup,
}

pub fn run(args: StoreArgs, config: &Config) -> Result<()> {
    let store = config.open_store()?;
    match args.action {
        StoreAction::List { prefix } => list(store.as_ref(), &prefix),
        StoreAction::Show { key } => show(store.as_ref(), &key),
        StoreAction::Cleanup => {
            let removed = store.cleanup_tmp()?;
            eprintln!("Removed {removed} temp files from {}", store.dir().display());
            Ok(())
        }
    }
}

fn format_ms(ms: i64) -> String {
    DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ms.to_string())
}

/// One-line description of a stored value, by key layout.
fn describe(key: &str, raw: &str) -> (&'static str, String) {
    if key.starts_with("lock:") {
        return match serde_json::from_str::<LeaseRecord>(raw) {
            Ok(r) => ("lease", format!("{} since {}", r.holder, format_ms(r.acquired_at))),
            Err(_) => ("lease", "unreadable".to_string()),
        };
    }
    if key.starts_with("ratelimit:") {
        return match serde_json::from_str::<Vec<i64>>(raw) {
            Ok(stamps) => match stamps.last() {
                Some(&last) => ("window", format!("{} calls, last {}", stamps.len(), format_ms(last))),
                None => ("window", "empty".to_string()),
            },
            Err(_) => ("window", "unreadable".to_string()),
        };
    }
    match serde_json::from_str::<Partition>(raw) {
        Ok(p) => {
            let range = match (p.dates.keys().next(), p.max_date()) {
                (Some(first), Some(last)) => format!("{first}..{last}"),
                _ => "-".to_string(),
            };
            (
                "partition",
                format!("{} entries, {range}, fetched {}", p.len(), format_ms(p.fetched_at)),
            )
        }
        Err(_) => ("other", format!("{} bytes", raw.len())),
    }
}

fn list(store: &dyn KvStore, prefix: &str) -> Result<()> {
    let keys = store.keys(prefix)?;
    if keys.is_empty() {
        eprintln!("No keys.");
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Key").fg(Color::Cyan),
            Cell::new("Kind").fg(Color::Cyan),
            Cell::new("Details").fg(Color::Cyan),
        ]);

    for key in &keys {
        // Deleted between keys() and get(): skip
        let Some(raw) = store.get(key)? else { continue };
        let (kind, details) = describe(key, &raw);
        let kind_cell = match kind {
            "lease" => Cell::new(kind).fg(Color::Yellow),
            "partition" => Cell::new(kind).fg(Color::Green),
            _ => Cell::new(kind),
        };
        table.add_row(vec![Cell::new(key), kind_cell, Cell::new(details)]);
    }

    eprintln!("\n{table}");
    eprintln!("{} keys total", keys.len());
    Ok(())
}

fn show(store: &dyn KvStore, key: &str) -> Result<()> {
    let raw = store.get(key)?.with_context(|| format!("No such key: {key}"))?;
    match serde_json::from_str::<serde_json::Value>(&raw) {
        Ok(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        Err(_) => println!("{raw}"),
    }
    Ok(())
}
