use std::env;
use std::path::PathBuf;

/// Which broker backend to construct at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerMode {
    /// Live REST client against the brokerage API.
    Rest,
    /// In-memory mock broker (dry runs, local development).
    Mock,
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Path to the per-account configuration document.
    pub accounts_file: PathBuf,
    /// Path to the per-account credentials document.
    pub credentials_file: PathBuf,
    /// Directory snapshots are published into.
    pub snapshot_dir: PathBuf,
    /// Broker backend selection.
    pub broker_mode: BrokerMode,
    /// Base URL of the brokerage REST API.
    pub broker_base_url: String,
    /// URL of the browser-automation bridge that performs the kill action.
    pub automation_bridge_url: String,
    /// URL of the mail bridge polled for kill confirmation messages.
    pub mail_bridge_url: String,
    /// Config watcher poll cadence (seconds).
    pub watcher_tick_secs: u64,
    /// Watchdog liveness poll cadence (seconds).
    pub watchdog_tick_secs: u64,
    /// Grace period when joining service tasks on stop (seconds).
    pub stop_grace_secs: u64,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3210);

        let broker_mode = match env::var("BROKER_MODE").as_deref() {
            Ok("mock") => BrokerMode::Mock,
            _ => BrokerMode::Rest,
        };

        Self {
            host,
            port,
            accounts_file: env::var("ACCOUNTS_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("source/accounts.json")),
            credentials_file: env::var("CREDENTIALS_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("source/credentials.json")),
            snapshot_dir: env::var("SNAPSHOT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("logs")),
            broker_mode,
            broker_base_url: env::var("BROKER_BASE_URL")
                .unwrap_or_else(|_| "https://gw-napi.kotaksecurities.com".to_string()),
            automation_bridge_url: env::var("AUTOMATION_BRIDGE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8750".to_string()),
            mail_bridge_url: env::var("MAIL_BRIDGE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8751".to_string()),
            watcher_tick_secs: env::var("WATCHER_TICK_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(2),
            watchdog_tick_secs: env::var("WATCHDOG_TICK_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            stop_grace_secs: env::var("STOP_GRACE_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}
