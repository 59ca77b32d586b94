//! `fxline get` - look up values for dates
//!
//! Dates are resolved concurrently on a rayon pool, each through its own
//! call into the coordinator, the same way many spreadsheet cells
//! recalculate at once.

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use clap::Args;
use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
use rayon::prelude::*;

use fxline_cache::{Lookup, ResolveError};

use crate::config::Config;

#[derive(Args, Debug)]
pub struct GetArgs {
    /// Source id (see `fxline config`)
    pub source: String,

    /// Dates to look up (YYYY-MM-DD)
    #[arg(required = true)]
    pub dates: Vec<String>,

    /// Ticker symbol, for per-ticker sources
    #[arg(short, long)]
    pub ticker: Option<String>,

    /// Also look up every day from the last given date through this one
    #[arg(long, value_parser = parse_date)]
    pub through: Option<NaiveDate>,

    /// Number of concurrent lookups
    #[arg(short, long, default_value_t = 8)]
    pub workers: usize,
}

fn parse_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| format!("Invalid date format: {e}"))
}

/// Requested dates plus the optional `--through` range, in order.
fn expand_dates(dates: &[String], through: Option<NaiveDate>) -> Result<Vec<String>, String> {
    let mut out = dates.to_vec();
    if let Some(end) = through {
        let last = dates.last().ok_or("--through needs a start date")?;
        let start = parse_date(last)?;
        if end < start {
            return Err(format!("--through {end} is before {start}"));
        }
        out.extend(
            start
                .iter_days()
                .skip(1)
                .take_while(|d| *d <= end)
                .map(|d| d.to_string()),
        );
    }
    Ok(out)
}

pub fn run(args: GetArgs, config: &Config) -> Result<()> {
    let dates = expand_dates(&args.dates, args.through).map_err(anyhow::Error::msg)?;
    let store = config.open_store()?;
    let coord = config.coordinator(&args.source, store)?;
    let ticker = args.ticker.as_deref();

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(args.workers.max(1))
        .build()
        .context("Failed to create thread pool")?;

    log::debug!("{}: {} lookups with {} workers", args.source, dates.len(), args.workers);
    let results: Vec<(String, Result<Lookup, ResolveError>)> = pool.install(|| {
        dates
            .par_iter()
            .map(|date| (date.clone(), coord.get_value(ticker, date)))
            .collect()
    });

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Date").fg(Color::Cyan),
            Cell::new("Value").fg(Color::Cyan),
        ]);

    let mut failed = 0;
    for (date, result) in &results {
        let value = match result {
            Ok(Lookup::Value(v)) => Cell::new(v),
            Ok(Lookup::NoData) => Cell::new("no data").fg(Color::DarkGrey),
            Err(e) => {
                failed += 1;
                Cell::new(e).fg(Color::Red)
            }
        };
        table.add_row(vec![Cell::new(date), value]);
    }
    println!("{table}");

    if failed > 0 {
        bail!("{failed} of {} lookups failed", results.len());
    }
    Ok(())
}
