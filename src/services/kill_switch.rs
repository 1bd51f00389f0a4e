//! Kill Execution Service
//!
//! Waits for the trigger latch and runs the irreversible sequence: notify,
//! square off (concurrently, fire-and-forget), execute the external kill
//! action, persist the daily lock, then hand verification to a detached
//! task. Square-off failures never block the kill action; a kill-action
//! failure ends the attempt in `Error` and leaves the rest of the session
//! running for the operator.
//!
//! A kill sequence executes at most once per session lifetime:
//! `kill_executed` is a one-way latch checked under the account lock.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::automation::{KillActionExecutor, KillContext, KillVerifier};
use crate::notify::NotificationSink;
use crate::state::AccountState;
use crate::store::ConfigStore;
use crate::types::{KillHistory, SessionStage};

/// Trigger poll cadence. Fast, so a breach turns into action within a tick.
const TRIGGER_POLL: Duration = Duration::from_millis(500);

/// Gap between square-off exit orders.
const EXIT_THROTTLE: Duration = Duration::from_millis(100);

/// How often the disabled-switch reminder is logged, in trigger polls.
const DISARMED_LOG_EVERY: u32 = 120;

/// Everything the kill service needs.
#[derive(Clone)]
pub struct KillDeps {
    pub state: Arc<AccountState>,
    pub store: Arc<ConfigStore>,
    pub executor: Arc<dyn KillActionExecutor>,
    pub verifier: Arc<dyn KillVerifier>,
    pub notifier: Arc<dyn NotificationSink>,
}

/// Background loop. Exits after the sequence completes (or fails), or when
/// the session stops.
pub async fn run_kill_service(deps: KillDeps) {
    let state = deps.state.clone();
    info!("Kill service armed for {}", state.account_id());

    let mut disarmed_polls: u32 = 0;

    loop {
        if !state.signals().system_active {
            break;
        }

        let signals = state.signals();
        if signals.trigger_kill && !signals.kill_executed {
            let config = state.config();
            if !config.kill_switch.enabled {
                // Deliberate fail-safe: monitoring without enforcement.
                if disarmed_polls % DISARMED_LOG_EVERY == 0 {
                    warn!(
                        "Trigger latched for {} but kill switch is disabled; standing by",
                        state.account_id()
                    );
                }
                disarmed_polls += 1;
                tokio::time::sleep(TRIGGER_POLL).await;
                continue;
            }

            execute_kill_sequence(&deps).await;
            break;
        }

        tokio::time::sleep(TRIGGER_POLL).await;
    }

    info!("Kill service disarmed for {}", state.account_id());
}

/// The irreversible sequence.
async fn execute_kill_sequence(deps: &KillDeps) {
    let state = &deps.state;
    let config = state.config();
    let risk = state.risk();

    info!(
        ">>> Kill sequence initiated for {} (mtm {:.2}) <<<",
        state.account_id(),
        risk.mtm_current
    );
    state.set_stage(SessionStage::Killing);
    deps.notifier.send(
        state.account_id(),
        &format!(
            "Kill sequence initiated. MTM {:.2} against limit {:.2}.",
            risk.mtm_current, risk.mtm_limit
        ),
    );

    // Square off runs alongside the kill action. Its failure is logged and
    // ignored: completing the kill matters more than a clean close.
    if config.kill_switch.auto_square_off {
        let state = state.clone();
        tokio::spawn(async move {
            square_off_all(&state).await;
        });
    }

    let ctx = KillContext {
        account_id: state.account_id().to_string(),
        account_name: config.account_name.clone(),
        mtm_at_trigger: risk.mtm_current,
    };

    // The only step whose failure is fatal to the attempt. No auto-retry of
    // an irreversible action; the operator takes it from here.
    if let Err(e) = deps.executor.execute(&ctx).await {
        error!("Kill action FAILED for {}: {}", state.account_id(), e);
        state.set_error(format!("kill action failed: {}", e));
        deps.notifier.send(
            state.account_id(),
            &format!("KILL ACTION FAILED: {}. Manual intervention required.", e),
        );
        return;
    }

    state.mark_kill_executed();
    info!("Kill action executed for {}", state.account_id());

    // Persist the lock before anything else so a crash between here and
    // verification still boots locked tomorrow-morning-today.
    let history = KillHistory {
        locked_date: Some(chrono::Local::now().date_naive()),
        timestamp: Some(Utc::now()),
        verified: false,
    };
    state.record_kill_history(history.clone());
    if let Err(e) = deps.store.save_kill_history(state.account_id(), &history) {
        error!(
            "Failed to persist daily lock for {}: {}",
            state.account_id(),
            e
        );
    }

    if config.verification.enabled {
        state.set_stage(SessionStage::KillWait);
        deps.notifier.send(
            state.account_id(),
            "Kill switch executed. Awaiting broker confirmation.",
        );

        // Detached on purpose: not in the registry, invisible to the
        // watchdog, free to outlive the kill service's own loop.
        let deps = deps.clone();
        tokio::spawn(async move {
            run_verification(deps, history).await;
        });
    } else {
        state.set_stage(SessionStage::KilledNoVerify);
        deps.notifier.send(
            state.account_id(),
            "Kill switch executed. Verification disabled; account locked for the day.",
        );
    }
}

/// Detached verification: poll the confirmation channel until it lands or
/// the timeout expires. Either outcome leaves the daily lock in place.
async fn run_verification(deps: KillDeps, mut history: KillHistory) {
    let state = &deps.state;
    let config = state.config().verification;
    let lookback = Duration::from_secs(config.lookback_secs);
    let deadline = tokio::time::Instant::now() + Duration::from_secs(config.timeout_secs);

    info!(
        "Verification started for {} (timeout {}s)",
        state.account_id(),
        config.timeout_secs
    );

    loop {
        match deps.verifier.check_confirmation(lookback).await {
            Ok(true) => {
                history.verified = true;
                if let Err(e) = deps.store.save_kill_history(state.account_id(), &history) {
                    error!(
                        "Failed to persist verified kill history for {}: {}",
                        state.account_id(),
                        e
                    );
                }
                state.record_kill_history(history);
                state.set_stage(SessionStage::KilledVerified);
                info!("Kill verified for {}", state.account_id());
                deps.notifier
                    .send(state.account_id(), "Broker confirmed trading disabled.");
                return;
            }
            Ok(false) => {}
            Err(e) => {
                warn!(
                    "Verification poll error for {}: {}",
                    state.account_id(),
                    e
                );
            }
        }

        if tokio::time::Instant::now() >= deadline {
            break;
        }
        tokio::time::sleep(Duration::from_secs(config.poll_secs.max(1))).await;
    }

    // Timeout is a defined outcome, not an error: the lock stands, the
    // confirmation just never showed up.
    state.set_stage(SessionStage::KilledUnverified);
    warn!(
        "Kill verification timed out for {}; lock remains in force",
        state.account_id()
    );
    deps.notifier.send(
        state.account_id(),
        "Kill executed but confirmation not seen in time. Account remains locked; verify manually.",
    );
}

/// Close every open position with a market order. Per-position failures are
/// logged and skipped.
pub async fn square_off_all(state: &AccountState) {
    let Some(session) = state.broker_session() else {
        warn!(
            "Square off skipped for {}: no broker session",
            state.account_id()
        );
        return;
    };

    let positions = state.open_positions();
    if positions.is_empty() {
        info!("Square off for {}: no open positions", state.account_id());
        return;
    }

    warn!(
        ">>> Auto square-off initiated for {} ({} positions) <<<",
        state.account_id(),
        positions.len()
    );

    let mut placed = 0usize;
    for position in &positions {
        let Some(side) = position.closing_side() else {
            continue;
        };
        let qty = position.net_qty.abs();

        match session.place_market_exit(position, side, qty).await {
            Ok(ack) => {
                info!(
                    "Exit order {} for {}: {} {} x{}",
                    ack.order_id, state.account_id(), side, position.symbol, qty
                );
                placed += 1;
            }
            Err(e) => {
                error!(
                    "Exit order failed for {} {}: {}",
                    state.account_id(),
                    position.symbol,
                    e
                );
            }
        }

        tokio::time::sleep(EXIT_THROTTLE).await;
    }

    info!(
        "Square off complete for {}: {}/{} exit orders placed",
        state.account_id(),
        placed,
        positions.len()
    );
}
