//! `fxline refresh` - refresh all known partitions
//!
//! A host scheduler normally runs this once a day. `--daily` keeps the
//! process alive and repeats every 24h until SIGINT/SIGTERM.

use std::ops::ControlFlow;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use clap::Args;
use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};

use fxline_cache::{RefreshOutcome, RefreshSummary};
use fxline_core::{SharedProgress, idle_until, is_shutdown_requested, shutdown_flag};

use crate::config::Config;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Args, Debug)]
pub struct RefreshArgs {
    /// Sources to refresh (default: all configured)
    pub sources: Vec<String>,

    /// Keep running and refresh again every 24 hours
    #[arg(long)]
    pub daily: bool,
}

pub fn run(args: RefreshArgs, config: &Config, progress: &SharedProgress) -> Result<()> {
    let ids: Vec<String> = if args.sources.is_empty() {
        config.sources.keys().cloned().collect()
    } else {
        args.sources
    };
    for id in &ids {
        config.source(id)?;
    }

    if !args.daily {
        let failed = refresh_once(&ids, config, progress)?;
        if failed > 0 {
            bail!("{failed} partitions failed to refresh");
        }
        return Ok(());
    }

    setup_signal_handler();
    loop {
        let started = Instant::now();
        // Failures are retried by the next round
        let failed = refresh_once(&ids, config, progress)?;
        if failed > 0 {
            log::warn!("{failed} partitions failed, retrying in the next round");
        }
        if is_shutdown_requested() {
            break;
        }
        let wait = DAY.saturating_sub(started.elapsed());
        log::info!("Next refresh in {}m", wait.as_secs() / 60);
        if !idle_until(wait, Duration::from_secs(1)) {
            break;
        }
    }
    log::info!("Shutdown requested, stopping refresh loop");
    Ok(())
}

/// One refresh round over `ids`. Returns the number of failed partitions.
fn refresh_once(ids: &[String], config: &Config, progress: &SharedProgress) -> Result<usize> {
    let store = config.open_store()?;
    let mut summaries: Vec<(String, RefreshSummary)> = Vec::new();

    for id in ids {
        let entry = config.source(id)?;
        let coord = config.coordinator(id, store.clone())?;
        let units = coord.known_units(&entry.tickers)?;
        log::info!("{id}: refreshing {} partitions", units.len());

        let pb = progress.batch_line(id, units.len() as u64);
        let summary = coord.refresh_units(&units, |unit, result| {
            let label = match result {
                Ok(RefreshOutcome::Fetched { entries }) => format!("{unit}: {entries} entries"),
                Ok(RefreshOutcome::Fresh) => format!("{unit}: fresh"),
                Ok(RefreshOutcome::Busy) => format!("{unit}: busy"),
                Err(_) => format!("{unit}: failed"),
            };
            pb.set_message(label);
            pb.inc(1);
            if is_shutdown_requested() {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });
        pb.finish_and_clear();

        log::info!("{id}: {summary}");
        for (unit, err) in &summary.failed {
            progress.println(format!("{id} {unit}: {err}"));
        }
        summaries.push((id.clone(), summary));
        if is_shutdown_requested() {
            break;
        }
    }

    print_summary(&summaries);
    Ok(summaries.iter().map(|(_, s)| s.failed.len()).sum())
}

fn print_summary(summaries: &[(String, RefreshSummary)]) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Source").fg(Color::Cyan),
            Cell::new("Fetched").fg(Color::Cyan),
            Cell::new("Entries").fg(Color::Cyan),
            Cell::new("Skipped").fg(Color::Cyan),
            Cell::new("Busy").fg(Color::Cyan),
            Cell::new("Failed").fg(Color::Cyan),
        ]);
    for (id, s) in summaries {
        let failed = if s.failed.is_empty() {
            Cell::new(0)
        } else {
            Cell::new(s.failed.len()).fg(Color::Red)
        };
        table.add_row(vec![
            Cell::new(id),
            Cell::new(s.fetched),
            Cell::new(s.entries),
            Cell::new(s.skipped),
            Cell::new(s.busy),
            failed,
        ]);
    }
    eprintln!("\n{table}");
}

fn setup_signal_handler() {
    // First signal: set graceful shutdown flag
    // Second signal: force exit
    // SAFETY: AtomicBool::swap and process::exit are async-signal-safe
    unsafe {
        signal_hook::low_level::register(signal_hook::consts::SIGTERM, || {
            if shutdown_flag().swap(true, Ordering::Relaxed) {
                std::process::exit(130);
            }
        })
        .expect("Failed to register SIGTERM handler");
        signal_hook::low_level::register(signal_hook::consts::SIGINT, || {
            if shutdown_flag().swap(true, Ordering::Relaxed) {
                std::process::exit(130);
            }
        })
        .expect("Failed to register SIGINT handler");
    }
}
