//! fxline - Cached lookups of daily financial data
//!
//! Looks up currency reference rates and stock closes per day, fetching
//! whole calendar years from rate-limited upstreams into a shared store.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod cmd;
mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "fxline")]
#[command(about = "Cached lookups of daily currency rates and stock closes")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Config file path (default: ./fxline.toml or ~/.config/fxline/config.toml)
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,

    /// Store directory (overrides the config file)
    #[arg(long, global = true)]
    store_dir: Option<std::path::PathBuf>,

    /// Whole-request timeout in seconds for upstream calls
    #[arg(long, global = true)]
    read_timeout: Option<u64>,
}

#[derive(Subcommand)]
enum Command {
    /// Look up values for one or more dates
    Get(cmd::get::GetArgs),
    /// Remove all cached partitions of a source
    Flush(cmd::flush::FlushArgs),
    /// Refresh all known partitions (current year replaced, past years backfilled)
    Refresh(cmd::refresh::RefreshArgs),
    /// Inspect the shared store
    Store(cmd::store::StoreArgs),
    /// Show current configuration
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Progress context (TTY auto-detect)
    let progress = Arc::new(fxline_core::ProgressContext::new());

    // Logging:
    //   TTY:     quiet (warn) unless --debug  — progress bars show activity
    //   non-TTY: info unless --debug          — logs are the only progress indicator
    let is_tty = progress.is_tty();
    let multi = if is_tty { Some(progress.multi()) } else { None };
    let quiet = if is_tty { !cli.debug } else { false };
    fxline_core::init_logging(quiet, cli.debug, multi);

    let mut config = if let Some(path) = cli.config {
        Config::from_file(&path)?
    } else {
        Config::load()?
    };
    if let Some(dir) = cli.store_dir {
        config.store.dir = dir;
    }

    // Apply HTTP settings (config file defaults, CLI overrides)
    let mut http_config = fxline_core::HttpConfig {
        connect_timeout: Duration::from_secs(config.http.connect_timeout),
        read_timeout: Duration::from_secs(cli.read_timeout.unwrap_or(config.http.read_timeout)),
        ..Default::default()
    };
    if let Some(ua) = &config.http.user_agent {
        http_config.user_agent = ua.clone();
    }
    fxline_core::set_http_config(http_config);

    match cli.command {
        Command::Get(args) => cmd::get::run(args, &config),
        Command::Flush(args) => cmd::flush::run(args, &config),
        Command::Refresh(args) => cmd::refresh::run(args, &config, &progress),
        Command::Store(args) => cmd::store::run(args, &config),
        Command::Config => {
            use comfy_table::{
                Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL,
            };

            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .apply_modifier(UTF8_ROUND_CORNERS)
                .set_header(vec![
                    Cell::new("Setting").fg(Color::Cyan),
                    Cell::new("Value").fg(Color::Cyan),
                ]);

            table.add_row(vec!["Store directory", &config.store.dir.display().to_string()]);
            table.add_row(vec![
                "Timeouts",
                &format!(
                    "connect {}s, read {}s",
                    config.http.connect_timeout, config.http.read_timeout
                ),
            ]);
            table.add_row(vec![
                "User agent",
                config.http.user_agent.as_deref().unwrap_or("default"),
            ]);
            eprintln!("\n{table}");

            let mut sources = Table::new();
            sources
                .load_preset(UTF8_FULL)
                .apply_modifier(UTF8_ROUND_CORNERS)
                .set_header(vec![
                    Cell::new("Source").fg(Color::Cyan),
                    Cell::new("Kind").fg(Color::Cyan),
                    Cell::new("Admission").fg(Color::Cyan),
                    Cell::new("Rate limit").fg(Color::Cyan),
                    Cell::new("UTC offset").fg(Color::Cyan),
                    Cell::new("History").fg(Color::Cyan),
                ]);
            for (id, entry) in &config.sources {
                let s = &entry.settings;
                let kind = match (&entry.currency, entry.tickers.len()) {
                    (Some(cur), _) => format!("{} EUR/{cur}", entry.kind.as_str()),
                    (None, 0) => entry.kind.as_str().to_string(),
                    (None, n) => format!("{} ({n} tickers)", entry.kind.as_str()),
                };
                let admission = if s.admission.is_blocking() {
                    "blocking"
                } else {
                    "non-blocking"
                };
                sources.add_row(vec![
                    Cell::new(id),
                    Cell::new(kind),
                    Cell::new(admission),
                    Cell::new(format!("{}/{}ms", s.rate_limit, s.window_ms)),
                    Cell::new(format!("{:+}min", s.utc_offset_minutes)),
                    Cell::new(format!("{}y", s.history_years)),
                ]);
            }
            eprintln!("{sources}");
            Ok(())
        }
    }
}
