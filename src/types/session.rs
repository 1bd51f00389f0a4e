//! Session State Types
//!
//! Lifecycle stages, risk metrics, coordination signals and the read-only
//! summary published to observers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle stage of a per-account session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStage {
    Idle,
    Booting,
    Running,
    Killing,
    /// Kill action done, waiting for external confirmation.
    KillWait,
    KilledVerified,
    KilledUnverified,
    /// Kill action done, verification disabled by config.
    KilledNoVerify,
    /// Daily lock in force: monitoring only, no risk or kill services.
    Locked,
    Stopping,
    Error,
}

impl SessionStage {
    /// Whether the kill sequence has reached a terminal killed state.
    pub fn is_killed(&self) -> bool {
        matches!(
            self,
            SessionStage::KillWait
                | SessionStage::KilledVerified
                | SessionStage::KilledUnverified
                | SessionStage::KilledNoVerify
        )
    }
}

impl std::fmt::Display for SessionStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            SessionStage::Idle => "IDLE",
            SessionStage::Booting => "BOOTING",
            SessionStage::Running => "RUNNING",
            SessionStage::Killing => "KILLING",
            SessionStage::KillWait => "KILLED(WAITING)",
            SessionStage::KilledVerified => "KILLED(VERIFIED)",
            SessionStage::KilledUnverified => "KILLED(UNVERIFIED)",
            SessionStage::KilledNoVerify => "KILLED(NO VERIFY)",
            SessionStage::Locked => "LOCKED(VIEW-ONLY)",
            SessionStage::Stopping => "STOPPING",
            SessionStage::Error => "ERROR",
        };
        write!(f, "{}", label)
    }
}

/// Live risk metrics recomputed every evaluation cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskMetrics {
    /// Current mark-to-market PnL.
    pub mtm_current: f64,
    /// Loss threshold, always stored negative.
    pub mtm_limit: f64,
    /// Headroom to the limit (`mtm_current - mtm_limit`).
    pub mtm_distance: f64,
    /// A protective stop-loss buy order has fully filled.
    pub sl_hit: bool,
}

/// Coordination flags between services. Mutated only under the account lock.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SessionSignals {
    pub system_active: bool,
    pub trigger_kill: bool,
    pub kill_executed: bool,
    pub locked_today: bool,
}

impl Default for SessionSignals {
    fn default() -> Self {
        Self {
            system_active: false,
            trigger_kill: false,
            kill_executed: false,
            locked_today: false,
        }
    }
}

/// Session status surfaced to observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatus {
    pub stage: SessionStage,
    pub error_message: Option<String>,
    pub session_start: Option<DateTime<Utc>>,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self {
            stage: SessionStage::Idle,
            error_message: None,
            session_start: None,
        }
    }
}

/// Shallow market view for snapshots.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketSummary {
    pub position_count: usize,
    pub open_position_count: usize,
    pub order_count: usize,
    pub quote_count: usize,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub stale: bool,
}

/// Read-only state summary published to the snapshot sink and the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSummary {
    pub account_id: String,
    pub account_name: String,
    pub timestamp: DateTime<Utc>,
    pub stage: SessionStage,
    pub stage_label: String,
    pub error_message: Option<String>,
    pub session_start: Option<DateTime<Utc>>,
    pub risk: RiskMetrics,
    pub signals: SessionSignals,
    pub market: MarketSummary,
    pub kill_switch_enabled: bool,
    pub require_fill_confirmation: bool,
    pub auto_square_off: bool,
}
