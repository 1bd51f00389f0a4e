//! Snapshot Publisher
//!
//! Periodically dumps the read-only state summary to
//! `<dir>/<account_id>_snapshot.json` for external observers. The write is
//! temp-file + rename so a reader never sees a torn document; write failures
//! are logged and the loop carries on.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use crate::state::AccountState;
use crate::store;

/// Write one snapshot now. Also used at session construction so observers
/// never find the file missing.
pub fn write_snapshot(state: &AccountState, dir: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("{}_snapshot.json", state.account_id()));
    let value = serde_json::to_value(state.summary())?;
    store::atomic_write_json(&path, &value)?;
    Ok(())
}

/// Background loop. Exits when `system_active` clears.
pub async fn run_snapshot_service(state: Arc<AccountState>, dir: PathBuf) {
    info!("Snapshot service started for {}", state.account_id());

    loop {
        if !state.signals().system_active {
            break;
        }

        if let Err(e) = write_snapshot(&state, &dir) {
            error!("Snapshot write failed for {}: {}", state.account_id(), e);
        }

        let interval = state.config().monitoring.snapshot_interval_secs;
        tokio::time::sleep(Duration::from_secs(interval.max(1))).await;
    }

    // Final dump so the file reflects the stopped state.
    if let Err(e) = write_snapshot(&state, &dir) {
        error!("Final snapshot write failed for {}: {}", state.account_id(), e);
    }

    info!("Snapshot service stopped for {}", state.account_id());
}
