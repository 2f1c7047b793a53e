//! Status command implementation.

use anyhow::{Context, Result};
use trading_config::AppConfig;
use trading_data::SnapshotStore;
use trading_monitor::render_snapshot;

use crate::cli::StatusArgs;

pub async fn run(args: StatusArgs, config: &AppConfig) -> Result<()> {
    let dir = match args.mode {
        Some(mode) => config.paths.snapshot_dir.join(mode.dir_name()),
        None => config.paths.snapshot_dir.clone(),
    };
    let store = SnapshotStore::new(&dir);
    let Some(snapshot) = store
        .load_latest()
        .with_context(|| format!("Failed to read snapshots in {}", dir.display()))?
    else {
        println!("No snapshots in {}", dir.display());
        return Ok(());
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        println!("{}", render_snapshot(&snapshot, config.timezone()?));
    }
    Ok(())
}
