//! Account Configuration Types
//!
//! Per-account settings and credentials as stored in the external JSON
//! documents. The daemon treats credential contents as opaque; only field
//! presence is validated before authentication.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// Kill-switch parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KillSwitchConfig {
    /// Master arm flag. When false the trigger is observed but never acted
    /// on.
    pub enabled: bool,
    /// Loss limit magnitude. Stored positive in config; the risk engine
    /// derives the negative threshold.
    pub mtm_loss_limit: f64,
    /// Gate the trigger on a stop-loss order having actually filled.
    /// Absent means false: an MTM breach alone fires.
    #[serde(default)]
    pub require_fill_confirmation: bool,
    /// Square off open positions alongside the kill action.
    #[serde(default)]
    pub auto_square_off: bool,
}

/// Retry strategy for broker polling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryConfig {
    /// Exponential backoff delay for the given consecutive-error count,
    /// capped at `max_delay_ms`.
    pub fn delay_ms(&self, consecutive_errors: u32) -> u64 {
        if consecutive_errors == 0 {
            return self.base_delay_ms;
        }
        let exp = consecutive_errors.saturating_sub(1).min(16);
        let delay = self.base_delay_ms.saturating_mul(1u64 << exp);
        delay.min(self.max_delay_ms)
    }
}

/// Polling cadences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Poll interval inside the trading window (seconds).
    pub poll_interval_secs: u64,
    /// Poll interval outside the trading window (seconds).
    pub off_market_interval_secs: u64,
    /// Snapshot publish interval (seconds).
    #[serde(default = "default_snapshot_interval")]
    pub snapshot_interval_secs: u64,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_snapshot_interval() -> u64 {
    2
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 3,
            off_market_interval_secs: 60,
            snapshot_interval_secs: 2,
            retry: RetryConfig::default(),
        }
    }
}

/// Trading-hours window in exchange-local time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingWindow {
    pub open: NaiveTime,
    pub close: NaiveTime,
}

impl Default for TradingWindow {
    fn default() -> Self {
        Self {
            open: NaiveTime::from_hms_opt(9, 15, 0).unwrap(),
            close: NaiveTime::from_hms_opt(15, 30, 0).unwrap(),
        }
    }
}

impl TradingWindow {
    /// Whether the given wall-clock time falls inside the window.
    pub fn contains(&self, t: NaiveTime) -> bool {
        t >= self.open && t <= self.close
    }
}

/// Post-kill verification settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationConfig {
    pub enabled: bool,
    /// Cadence of confirmation polls (seconds).
    pub poll_secs: u64,
    /// Give up after this long (seconds).
    pub timeout_secs: u64,
    /// How far back the verifier searches for the confirmation message
    /// (seconds).
    pub lookback_secs: u64,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_secs: 20,
            timeout_secs: 300,
            lookback_secs: 900,
        }
    }
}

/// Notification toggles.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default)]
    pub telegram_enabled: bool,
}

/// Record of the most recent kill event. `locked_date == today` is the
/// durable daily lock: it forces observer-only boots until an operator
/// resets it or the calendar rolls over.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KillHistory {
    pub locked_date: Option<NaiveDate>,
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub verified: bool,
}

impl KillHistory {
    pub fn is_locked_on(&self, day: NaiveDate) -> bool {
        self.locked_date == Some(day)
    }
}

/// Full per-account configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountConfig {
    pub account_name: String,
    /// Inactive accounts are registered but never auto-started.
    #[serde(default)]
    pub account_active: bool,
    pub kill_switch: KillSwitchConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub window: TradingWindow,
    #[serde(default)]
    pub verification: VerificationConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    pub kill_history: KillHistory,
}

/// Broker login secrets. Opaque to the core.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BrokerCredentials {
    pub consumer_key: String,
    pub mobile_number: String,
    pub ucc: String,
    pub mpin: String,
    pub totp_secret: String,
    #[serde(default = "default_environment")]
    pub environment: String,
}

fn default_environment() -> String {
    "prod".to_string()
}

/// Telegram bot secrets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelegramCredentials {
    pub bot_token: String,
    pub chat_id: String,
}

/// Mailbox access for kill confirmation scanning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailboxCredentials {
    pub address: String,
    pub app_password: String,
    /// Only messages from this sender count as confirmations.
    pub sender_filter: String,
}

/// All secrets for one account.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    pub broker: BrokerCredentials,
    #[serde(default)]
    pub telegram: Option<TelegramCredentials>,
    #[serde(default)]
    pub mailbox: Option<MailboxCredentials>,
}

impl Credentials {
    /// Presence-only validation; contents are never inspected.
    pub fn validate(&self) -> std::result::Result<(), String> {
        let b = &self.broker;
        for (field, value) in [
            ("consumer_key", &b.consumer_key),
            ("mobile_number", &b.mobile_number),
            ("ucc", &b.ucc),
            ("mpin", &b.mpin),
            ("totp_secret", &b.totp_secret),
        ] {
            if value.trim().is_empty() {
                return Err(format!("missing broker credential field: {}", field));
            }
        }
        Ok(())
    }
}
