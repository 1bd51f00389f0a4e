//! Tripwire: autonomous mark-to-market kill-switch daemon.
//!
//! Supervises broker trading accounts, watching realtime MTM loss against a
//! configured limit. On breach it squares off open positions, fires an
//! external account-disabling action, verifies the action landed, and locks
//! the account for the remainder of the trading day.

pub mod api;
pub mod automation;
pub mod broker;
pub mod config;
pub mod error;
pub mod notify;
pub mod services;
pub mod state;
pub mod store;
pub mod types;

use std::sync::Arc;

use crate::config::Config;
use crate::services::SessionManager;

/// Application state shared across API handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub sessions: Arc<SessionManager>,
}
