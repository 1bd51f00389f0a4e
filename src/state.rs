//! Shared Account State
//!
//! One `AccountState` per account: configuration, credentials, the latest
//! market view, risk metrics, coordination signals and lifecycle status, all
//! behind a single mutex. Accessors keep lock scope to plain field reads and
//! writes; the guard is never held across a collaborator call, so a slow
//! broker can never stall another service's signal check.

use std::sync::{Arc, Mutex};

use chrono::Utc;

use crate::broker::BrokerSession;
use crate::types::{
    AccountConfig, Credentials, MarketSummary, Order, Position, QuoteMap, QuoteQuery, RiskMetrics,
    SessionSignals, SessionStage, SessionStatus, StateSummary,
};

/// Everything guarded by the account lock.
#[derive(Debug)]
struct AccountShared {
    config: AccountConfig,
    credentials: Credentials,
    positions: Vec<Position>,
    orders: Vec<Order>,
    quotes: QuoteMap,
    last_sync_at: Option<chrono::DateTime<Utc>>,
    stale: bool,
    risk: RiskMetrics,
    signals: SessionSignals,
    status: SessionStatus,
}

/// The per-account aggregate. Services hold an `Arc<AccountState>` and go
/// through the accessors below; the broker session handle lives beside the
/// business state and is cloned out before any I/O.
pub struct AccountState {
    account_id: String,
    inner: Mutex<AccountShared>,
    broker: Mutex<Option<Arc<dyn BrokerSession>>>,
}

impl AccountState {
    pub fn new(account_id: impl Into<String>, config: AccountConfig, credentials: Credentials) -> Self {
        let mtm_limit = -config.kill_switch.mtm_loss_limit.abs();
        Self {
            account_id: account_id.into(),
            inner: Mutex::new(AccountShared {
                config,
                credentials,
                positions: Vec::new(),
                orders: Vec::new(),
                quotes: QuoteMap::new(),
                last_sync_at: None,
                stale: false,
                risk: RiskMetrics {
                    mtm_limit,
                    mtm_distance: -mtm_limit,
                    ..RiskMetrics::default()
                },
                signals: SessionSignals::default(),
                status: SessionStatus::default(),
            }),
            broker: Mutex::new(None),
        }
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    // ========== Status ==========

    pub fn stage(&self) -> SessionStage {
        self.inner.lock().unwrap().status.stage
    }

    pub fn set_stage(&self, stage: SessionStage) {
        self.inner.lock().unwrap().status.stage = stage;
    }

    /// Move to `Error` and record the message observers will see.
    pub fn set_error(&self, message: impl Into<String>) {
        let mut shared = self.inner.lock().unwrap();
        shared.status.stage = SessionStage::Error;
        shared.status.error_message = Some(message.into());
    }

    // ========== Signals ==========

    pub fn signals(&self) -> SessionSignals {
        self.inner.lock().unwrap().signals
    }

    pub fn set_system_active(&self, active: bool) {
        self.inner.lock().unwrap().signals.system_active = active;
    }

    /// Latch the kill trigger. Returns true only on the false→true
    /// transition; repeated calls are no-ops.
    pub fn arm_trigger(&self) -> bool {
        let mut shared = self.inner.lock().unwrap();
        if shared.signals.trigger_kill {
            return false;
        }
        shared.signals.trigger_kill = true;
        true
    }

    /// Latch kill execution. One-way for the session lifetime.
    pub fn mark_kill_executed(&self) {
        let mut shared = self.inner.lock().unwrap();
        shared.signals.kill_executed = true;
        shared.signals.locked_today = true;
    }

    pub fn set_locked_today(&self, locked: bool) {
        self.inner.lock().unwrap().signals.locked_today = locked;
    }

    /// Reset per-session state at start. Kill-related signals survive when
    /// the daily lock is in force.
    pub fn reset_for_start(&self, locked: bool) {
        let mut shared = self.inner.lock().unwrap();
        shared.signals.system_active = true;
        shared.signals.locked_today = locked;
        if !locked {
            shared.signals.trigger_kill = false;
            shared.signals.kill_executed = false;
        }
        shared.status.error_message = None;
        shared.status.session_start = Some(Utc::now());
        shared.status.stage = if locked {
            SessionStage::Locked
        } else {
            SessionStage::Booting
        };
    }

    /// Reset to idle after a stop: services are down, broker handle cleared
    /// by the caller.
    pub fn reset_for_stop(&self) {
        let mut shared = self.inner.lock().unwrap();
        shared.signals.system_active = false;
        shared.status.stage = SessionStage::Idle;
        shared.status.session_start = None;
    }

    // ========== Market data ==========

    /// Publish a successful sync. Replaces positions and orders, merges
    /// quotes (a token missing from this cycle keeps its last price).
    pub fn apply_market(&self, positions: Vec<Position>, orders: Vec<Order>, quotes: QuoteMap) {
        let mut shared = self.inner.lock().unwrap();
        shared.positions = positions;
        shared.orders = orders;
        shared.quotes.extend(quotes);
        shared.last_sync_at = Some(Utc::now());
        shared.stale = false;
    }

    /// Record a failed sync cycle. Old market data is retained so risk
    /// evaluation keeps working with the last known values.
    pub fn mark_sync_failure(&self) {
        self.inner.lock().unwrap().stale = true;
    }

    /// Token/segment pairs quotes should be fetched for.
    pub fn quote_queries(&self) -> Vec<QuoteQuery> {
        let shared = self.inner.lock().unwrap();
        shared
            .positions
            .iter()
            .filter(|p| !p.token.is_empty())
            .map(|p| QuoteQuery {
                token: p.token.clone(),
                segment: p.segment.clone(),
            })
            .collect()
    }

    pub fn open_positions(&self) -> Vec<Position> {
        let shared = self.inner.lock().unwrap();
        shared.positions.iter().filter(|p| p.is_open()).cloned().collect()
    }

    // ========== Risk ==========

    /// Clone out everything one evaluation cycle needs.
    pub fn risk_inputs(&self) -> RiskInputs {
        let shared = self.inner.lock().unwrap();
        RiskInputs {
            positions: shared.positions.clone(),
            orders: shared.orders.clone(),
            quotes: shared.quotes.clone(),
            mtm_limit: shared.risk.mtm_limit,
            require_fill_confirmation: shared.config.kill_switch.require_fill_confirmation,
        }
    }

    /// Publish recomputed metrics.
    pub fn publish_risk(&self, mtm_current: f64, sl_hit: bool) {
        let mut shared = self.inner.lock().unwrap();
        shared.risk.mtm_current = mtm_current;
        shared.risk.mtm_distance = mtm_current - shared.risk.mtm_limit;
        shared.risk.sl_hit = sl_hit;
    }

    pub fn risk(&self) -> RiskMetrics {
        self.inner.lock().unwrap().risk
    }

    // ========== Config ==========

    pub fn config(&self) -> AccountConfig {
        self.inner.lock().unwrap().config.clone()
    }

    pub fn credentials(&self) -> Credentials {
        self.inner.lock().unwrap().credentials.clone()
    }

    pub fn set_credentials(&self, credentials: Credentials) {
        self.inner.lock().unwrap().credentials = credentials;
    }

    /// Atomically republish a reloaded config and the derived loss limit.
    pub fn apply_config(&self, config: AccountConfig) {
        let mut shared = self.inner.lock().unwrap();
        let mtm_limit = -config.kill_switch.mtm_loss_limit.abs();
        shared.config = config;
        shared.risk.mtm_limit = mtm_limit;
        shared.risk.mtm_distance = shared.risk.mtm_current - mtm_limit;
    }

    pub fn set_kill_switch_enabled(&self, enabled: bool) {
        self.inner.lock().unwrap().config.kill_switch.enabled = enabled;
    }

    pub fn record_kill_history(&self, history: crate::types::KillHistory) {
        self.inner.lock().unwrap().config.kill_history = history;
    }

    // ========== Broker handle ==========

    pub fn broker_session(&self) -> Option<Arc<dyn BrokerSession>> {
        self.broker.lock().unwrap().clone()
    }

    pub fn set_broker_session(&self, session: Option<Arc<dyn BrokerSession>>) {
        *self.broker.lock().unwrap() = session;
    }

    // ========== Snapshot ==========

    /// Shallow, lock-protected read of everything observers get to see.
    pub fn summary(&self) -> StateSummary {
        let shared = self.inner.lock().unwrap();
        StateSummary {
            account_id: self.account_id.clone(),
            account_name: shared.config.account_name.clone(),
            timestamp: Utc::now(),
            stage: shared.status.stage,
            stage_label: shared.status.stage.to_string(),
            error_message: shared.status.error_message.clone(),
            session_start: shared.status.session_start,
            risk: shared.risk,
            signals: shared.signals,
            market: MarketSummary {
                position_count: shared.positions.len(),
                open_position_count: shared.positions.iter().filter(|p| p.is_open()).count(),
                order_count: shared.orders.len(),
                quote_count: shared.quotes.len(),
                last_sync_at: shared.last_sync_at,
                stale: shared.stale,
            },
            kill_switch_enabled: shared.config.kill_switch.enabled,
            require_fill_confirmation: shared.config.kill_switch.require_fill_confirmation,
            auto_square_off: shared.config.kill_switch.auto_square_off,
        }
    }
}

/// Inputs one risk evaluation cycle works on, cloned out under the lock.
#[derive(Debug, Clone)]
pub struct RiskInputs {
    pub positions: Vec<Position>,
    pub orders: Vec<Order>,
    pub quotes: QuoteMap,
    pub mtm_limit: f64,
    pub require_fill_confirmation: bool,
}
