//! End-to-end pipeline tests: market data flows from the broker through risk
//! evaluation into the kill sequence, with every collaborator mocked.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use uuid::Uuid;

use tripwire::automation::{MockKillExecutor, MockVerifier};
use tripwire::broker::MockBroker;
use tripwire::notify::NullSink;
use tripwire::services::{SessionController, SupervisorSettings};
use tripwire::state::AccountState;
use tripwire::store::ConfigStore;
use tripwire::types::{Order, OrderSide, Position, SessionStage};

struct Fixture {
    controller: Arc<SessionController>,
    broker: MockBroker,
    executor: MockKillExecutor,
    store: Arc<ConfigStore>,
}

fn write_store(
    kill_enabled: bool,
    require_confirmation: bool,
    auto_square_off: bool,
    verification_enabled: bool,
) -> (Arc<ConfigStore>, PathBuf) {
    let dir = std::env::temp_dir().join(format!("tripwire-pipeline-{}", Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();

    let accounts = json!({
        "acct1": {
            "account_name": "Main",
            "account_active": true,
            "kill_switch": {
                "enabled": kill_enabled,
                "mtm_loss_limit": 10000.0,
                "require_fill_confirmation": require_confirmation,
                "auto_square_off": auto_square_off
            },
            "monitoring": {
                "poll_interval_secs": 1,
                "off_market_interval_secs": 1,
                "snapshot_interval_secs": 1
            },
            "verification": {
                "enabled": verification_enabled,
                "poll_secs": 1,
                "timeout_secs": 3,
                "lookback_secs": 60
            }
        }
    });
    std::fs::write(
        dir.join("accounts.json"),
        serde_json::to_string_pretty(&accounts).unwrap(),
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

fn fixture(
    kill_enabled: bool,
    require_confirmation: bool,
    auto_square_off: bool,
    verifier: MockVerifier,
    verification_enabled: bool,
) -> Fixture {
    let (store, _dir) = write_store(
        kill_enabled,
        require_confirmation,
        auto_square_off,
        verification_enabled,
    );
    let broker = MockBroker::new();
    let executor = MockKillExecutor::new();

    let config = store.load_account("acct1").unwrap();
    let state = Arc::new(AccountState::new("acct1", config, Default::default()));
    let settings = SupervisorSettings {
        snapshot_dir: std::env::temp_dir().join(format!("tripwire-snaps-{}", Uuid::new_v4())),
        watcher_tick_secs: 1,
        watchdog_tick_secs: 1,
        stop_grace_secs: 2,
    };

    let controller = SessionController::new(
        state,
        store.clone(),
        Arc::new(broker.clone()),
        Arc::new(executor.clone()),
        Arc::new(verifier),
        NullSink::new(),
        settings,
    );

    Fixture {
        controller,
        broker,
        executor,
        store,
    }
}

/// A short position that loses 12,500 against a 10,000 limit once the quote
/// is 450: (10000 - 0) + (-50 * 450) = -12500.
fn breaching_market(broker: &MockBroker) {
    broker.set_positions(vec![Position {
        token: "53825".to_string(),
        segment: "nse_fo".to_string(),
        symbol: "NIFTY25AUG24800PE".to_string(),
        net_qty: -50,
        total_buy_amt: 0.0,
        total_sell_amt: 10_000.0,
        multiplier: 1.0,
        price_factor: 1.0,
        lot_size: 25.0,
        product: "NRML".to_string(),
    }]);
    broker.set_quote("53825", 450.0);
}

fn filled_sl_buy() -> Order {
    Order {
        order_id: "240808000099".to_string(),
        status: "COMPLETE".to_string(),
        order_type: "SL-M".to_string(),
        side: OrderSide::Buy,
        token: "53825".to_string(),
        symbol: "NIFTY25AUG24800PE".to_string(),
        qty: 50,
        filled_qty: 50,
    }
}

mod pipeline_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_breach_runs_full_kill_sequence() {
        let f = fixture(true, false, true, MockVerifier::never_confirming(), false);
        breaching_market(&f.broker);

        f.controller.start().await.unwrap();
        tokio::time::sleep(Duration::from_secs(8)).await;

        let summary = f.controller.summary();
        assert!(summary.signals.trigger_kill);
        assert!(summary.signals.kill_executed);
        assert!(summary.signals.locked_today);
        assert_eq!(summary.stage, SessionStage::KilledNoVerify);
        assert_eq!(f.executor.call_count(), 1);

        // Square off closed the short leg with a buy.
        let exits = f.broker.exit_orders();
        assert_eq!(
            exits,
            vec![("NIFTY25AUG24800PE".to_string(), OrderSide::Buy, 50)]
        );

        // The daily lock is durable.
        let persisted = f.store.load_account("acct1").unwrap();
        assert_eq!(
            persisted.kill_history.locked_date,
            Some(chrono::Local::now().date_naive())
        );

        f.controller.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_fires_at_most_once() {
        let f = fixture(true, false, false, MockVerifier::never_confirming(), false);
        breaching_market(&f.broker);

        f.controller.start().await.unwrap();
        tokio::time::sleep(Duration::from_secs(8)).await;
        assert_eq!(f.executor.call_count(), 1);

        // Keep breaching; the latch and the executed flag hold.
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(f.executor.call_count(), 1);
        assert!(f.controller.summary().signals.kill_executed);

        f.controller.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmation_gate_waits_for_sl_fill() {
        let f = fixture(true, true, false, MockVerifier::never_confirming(), false);
        breaching_market(&f.broker);

        f.controller.start().await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;

        // Breached, but no stop-loss fill: the gate holds.
        let summary = f.controller.summary();
        assert!(summary.risk.mtm_current <= summary.risk.mtm_limit);
        assert!(!summary.signals.trigger_kill);
        assert_eq!(f.executor.call_count(), 0);

        // The protective buy fills; the next cycles fire the sequence.
        f.broker.set_orders(vec![filled_sl_buy()]);
        tokio::time::sleep(Duration::from_secs(5)).await;

        let summary = f.controller.summary();
        assert!(summary.risk.sl_hit);
        assert!(summary.signals.kill_executed);
        assert_eq!(f.executor.call_count(), 1);

        f.controller.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_switch_monitors_without_enforcing() {
        let f = fixture(false, false, false, MockVerifier::never_confirming(), false);
        breaching_market(&f.broker);

        f.controller.start().await.unwrap();
        tokio::time::sleep(Duration::from_secs(6)).await;

        // Trigger latched, nothing executed: monitoring without live
        // enforcement.
        let summary = f.controller.summary();
        assert!(summary.signals.trigger_kill);
        assert!(!summary.signals.kill_executed);
        assert_eq!(f.executor.call_count(), 0);
        assert_eq!(summary.stage, SessionStage::Running);

        // Arming the switch lets the pending trigger proceed.
        f.controller.set_kill_enabled(true).unwrap();
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(f.controller.summary().signals.kill_executed);
        assert_eq!(f.executor.call_count(), 1);

        f.controller.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_verified_kill_reaches_verified_stage() {
        let f = fixture(true, false, false, MockVerifier::confirming_after(2), true);
        breaching_market(&f.broker);

        f.controller.start().await.unwrap();
        tokio::time::sleep(Duration::from_secs(12)).await;

        let summary = f.controller.summary();
        assert_eq!(summary.stage, SessionStage::KilledVerified);
        assert!(summary.signals.locked_today);

        let persisted = f.store.load_account("acct1").unwrap();
        assert!(persisted.kill_history.verified);

        f.controller.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_unverified_timeout_keeps_lock() {
        let f = fixture(true, false, false, MockVerifier::never_confirming(), true);
        breaching_market(&f.broker);

        f.controller.start().await.unwrap();
        tokio::time::sleep(Duration::from_secs(15)).await;

        let summary = f.controller.summary();
        assert_eq!(summary.stage, SessionStage::KilledUnverified);
        assert!(summary.signals.locked_today);

        let persisted = f.store.load_account("acct1").unwrap();
        assert!(persisted.kill_history.locked_date.is_some());
        assert!(!persisted.kill_history.verified);

        f.controller.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_data_never_regresses_risk_values() {
        let f = fixture(true, false, false, MockVerifier::never_confirming(), false);
        // A losing-but-not-breaching book: (10000) + (-50 * 250) = -2500.
        f.broker.set_positions(vec![Position {
            token: "53825".to_string(),
            segment: "nse_fo".to_string(),
            symbol: "NIFTY25AUG24800PE".to_string(),
            net_qty: -50,
            total_buy_amt: 0.0,
            total_sell_amt: 10_000.0,
            multiplier: 1.0,
            price_factor: 1.0,
            lot_size: 25.0,
            product: "NRML".to_string(),
        }]);
        f.broker.set_quote("53825", 250.0);

        f.controller.start().await.unwrap();
        tokio::time::sleep(Duration::from_secs(4)).await;

        let before = f.controller.summary();
        assert_eq!(before.risk.mtm_current, -2_500.0);

        // Sustained outage: values hold, staleness is flagged, limit intact.
        f.broker.fail_syncs(50);
        tokio::time::sleep(Duration::from_secs(20)).await;

        let after = f.controller.summary();
        assert_eq!(after.risk.mtm_current, -2_500.0);
        assert_eq!(after.risk.mtm_limit, -10_000.0);
        assert!(after.market.stale);
        assert_eq!(after.market.position_count, 1);

        f.controller.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_outage_triggers_single_reauth() {
        let f = fixture(true, false, false, MockVerifier::never_confirming(), false);
        breaching_market(&f.broker);
        // Quote low enough that the book loses without breaching.
        f.broker.set_quote("53825", 250.0);

        f.controller.start().await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(f.broker.auth_count(), 1);

        // Past max_retries (3) consecutive failures, exactly one re-auth.
        f.broker.fail_syncs(12);
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(f.broker.auth_count(), 2);

        f.controller.stop().await.unwrap();
    }
}
