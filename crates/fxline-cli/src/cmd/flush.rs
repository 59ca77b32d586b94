//! `fxline flush` - drop cached partitions

use anyhow::Result;
use clap::Args;

use crate::config::Config;

#[derive(Args, Debug)]
pub struct FlushArgs {
    /// Sources to flush
    #[arg(required_unless_present = "all")]
    pub sources: Vec<String>,

    /// Flush every configured source
    #[arg(long, conflicts_with = "sources")]
    pub all: bool,
}

pub fn run(args: FlushArgs, config: &Config) -> Result<()> {
    let ids: Vec<String> = if args.all {
        config.sources.keys().cloned().collect()
    } else {
        args.sources
    };

    let store = config.open_store()?;
    let mut total = 0;
    for id in &ids {
        let coord = config.coordinator(id, store.clone())?;
        let removed = coord.flush_cache();
        eprintln!("{id}: removed {removed} partitions");
        total += removed;
    }
    if ids.len() > 1 {
        eprintln!("{total} partitions removed");
    }
    Ok(())
}
