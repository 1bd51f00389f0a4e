//! Integration tests for config hot reload: an external edit to the accounts
//! document shows up in the running session's risk limits without bouncing
//! any service.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use uuid::Uuid;

use tripwire::automation::{MockKillExecutor, MockVerifier};
use tripwire::broker::MockBroker;
use tripwire::notify::NullSink;
use tripwire::services::{ServiceName, SessionController, SupervisorSettings};
use tripwire::state::AccountState;
use tripwire::store::ConfigStore;

fn account_doc(limit: f64) -> serde_json::Value {
    json!({
        "acct1": {
            "account_name": "Main",
            "account_active": true,
            "kill_switch": {
                "enabled": true,
                "mtm_loss_limit": limit,
                "require_fill_confirmation": false,
                "auto_square_off": false
            },
            "monitoring": {
                "poll_interval_secs": 1,
                "off_market_interval_secs": 1,
                "snapshot_interval_secs": 1
            },
            "verification": {
                "enabled": false,
                "poll_secs": 1,
                "timeout_secs": 2,
                "lookback_secs": 60
            }
        }
    })
}

fn write_store(limit: f64) -> (Arc<ConfigStore>, PathBuf) {
    let dir = std::env::temp_dir().join(format!("tripwire-reload-{}", Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();

    std::fs::write(
        dir.join("accounts.json"),
        serde_json::to_string_pretty(&account_doc(limit)).unwrap(),
    )
    .unwrap();

    let credentials = json!({
        "acct1": {
            "broker": {
                "consumer_key": "k",
                "mobile_number": "+910000000000",
                "ucc": "AAAAA",
                "mpin": "123456",
                "totp_secret": "SECRET"
            }
        }
    });
    std::fs::write(
        dir.join("credentials.json"),
        serde_json::to_string(&credentials).unwrap(),
    )
    .unwrap();

    (
        Arc::new(ConfigStore::new(
            dir.join("accounts.json"),
            dir.join("credentials.json"),
        )),
        dir,
    )
}

fn build_controller(store: Arc<ConfigStore>, broker: MockBroker) -> Arc<SessionController> {
    let config = store.load_account("acct1").unwrap();
    let state = Arc::new(AccountState::new("acct1", config, Default::default()));
    let settings = SupervisorSettings {
        snapshot_dir: std::env::temp_dir().join(format!("tripwire-snaps-{}", Uuid::new_v4())),
        watcher_tick_secs: 1,
        watchdog_tick_secs: 1,
        stop_grace_secs: 2,
    };
    SessionController::new(
        state,
        store,
        Arc::new(broker),
        Arc::new(MockKillExecutor::new()),
        Arc::new(MockVerifier::never_confirming()),
        NullSink::new(),
        settings,
    )
}

mod hot_reload_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_new_limit_visible_without_service_interruption() {
        let (store, dir) = write_store(10_000.0);
        let controller = build_controller(store, MockBroker::new());

        controller.start().await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(controller.summary().risk.mtm_limit, -10_000.0);

        // External edit. The real-time pause keeps the file mtime distinct
        // even though tokio time is virtual.
        std::thread::sleep(Duration::from_millis(20));
        std::fs::write(
            dir.join("accounts.json"),
            serde_json::to_string_pretty(&account_doc(7_000.0)).unwrap(),
        )
        .unwrap();

        tokio::time::sleep(Duration::from_secs(4)).await;

        let summary = controller.summary();
        assert_eq!(summary.risk.mtm_limit, -7_000.0);

        // Data service never blinked.
        assert!(controller.live_services().contains(&ServiceName::Data));
        assert!(!summary.market.stale);

        controller.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_edit_keeps_previous_config() {
        let (store, dir) = write_store(10_000.0);
        let controller = build_controller(store, MockBroker::new());

        controller.start().await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;

        std::thread::sleep(Duration::from_millis(20));
        std::fs::write(dir.join("accounts.json"), "{ not json").unwrap();

        tokio::time::sleep(Duration::from_secs(4)).await;

        // Previous limits remain authoritative.
        assert_eq!(controller.summary().risk.mtm_limit, -10_000.0);
        assert!(controller.live_services().contains(&ServiceName::Config));

        controller.stop().await.unwrap();
    }
}
