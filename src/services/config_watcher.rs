//! Config Hot-Reload Watcher
//!
//! Watches the store's modification marker and republishes this account's
//! section when it moves. A malformed or missing section is logged and
//! dropped; the previous config stays authoritative.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use crate::state::AccountState;
use crate::store::ConfigStore;

/// Background loop. Exits when `system_active` clears.
pub async fn run_config_watcher(
    state: Arc<AccountState>,
    store: Arc<ConfigStore>,
    tick_secs: u64,
) {
    info!("Config watcher active for {}", state.account_id());

    let mut last_marker = store.modified_marker();

    loop {
        if !state.signals().system_active {
            break;
        }

        tokio::time::sleep(Duration::from_secs(tick_secs.max(1))).await;

        let marker = store.modified_marker();
        if marker.is_none() || marker == last_marker {
            continue;
        }
        // Let an in-flight external write settle before reading.
        tokio::time::sleep(Duration::from_millis(100)).await;
        last_marker = marker;

        match store.load_account(state.account_id()) {
            Ok(config) => {
                let limit = -config.kill_switch.mtm_loss_limit.abs();
                state.apply_config(config);
                info!(
                    "Hot reload for {}: mtm limit now {:.2}",
                    state.account_id(),
                    limit
                );
            }
            Err(e) => {
                error!(
                    "Config reload discarded for {}: {}",
                    state.account_id(),
                    e
                );
            }
        }
    }

    info!("Config watcher stopped for {}", state.account_id());
}
