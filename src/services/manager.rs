//! Session Manager
//!
//! Registry of per-account session controllers, built from the config store
//! at boot. Accounts are fully independent: each gets its own state, its own
//! collaborators and its own task group, and the registry never coordinates
//! across them.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{error, info, warn};

use crate::automation::{BridgeKillExecutor, MailboxVerifier};
use crate::broker::Broker;
use crate::config::Config;
use crate::error::AppError;
use crate::notify::TelegramNotifier;
use crate::state::AccountState;
use crate::store::ConfigStore;
use crate::types::StateSummary;

use super::supervisor::{SessionController, SupervisorSettings};

/// Registry of session controllers, one per configured account.
pub struct SessionManager {
    sessions: DashMap<String, Arc<SessionController>>,
}

impl SessionManager {
    /// Build controllers for every account in the store.
    pub fn build(
        config: &Config,
        store: Arc<ConfigStore>,
        broker: Arc<dyn Broker>,
    ) -> Result<Self, AppError> {
        let accounts = store.load_accounts()?;
        let sessions = DashMap::new();

        let settings = SupervisorSettings {
            snapshot_dir: config.snapshot_dir.clone(),
            watcher_tick_secs: config.watcher_tick_secs,
            watchdog_tick_secs: config.watchdog_tick_secs,
            stop_grace_secs: config.stop_grace_secs,
        };

        for (account_id, account_config) in accounts {
            let credentials = match store.load_credentials(&account_id) {
                Ok(c) => c,
                Err(e) => {
                    warn!(
                        "No credentials for {}; registering without them: {}",
                        account_id, e
                    );
                    Default::default()
                }
            };

            let telegram = if account_config.notifications.telegram_enabled {
                credentials.telegram.clone()
            } else {
                None
            };
            let notifier = Arc::new(TelegramNotifier::new(telegram));

            let executor = Arc::new(BridgeKillExecutor::new(&config.automation_bridge_url));
            let verifier = Arc::new(MailboxVerifier::new(
                &config.mail_bridge_url,
                credentials.mailbox.as_ref(),
            ));

            let state = Arc::new(AccountState::new(
                account_id.clone(),
                account_config,
                credentials,
            ));

            let controller = SessionController::new(
                state,
                store.clone(),
                broker.clone(),
                executor,
                verifier,
                notifier,
                settings.clone(),
            );

            info!("Registered account {}", account_id);
            sessions.insert(account_id, controller);
        }

        Ok(Self { sessions })
    }

    /// Start every account flagged active. Failures are logged per account
    /// and never block the others.
    pub async fn auto_start(&self) {
        for entry in self.sessions.iter() {
            let controller = entry.value().clone();
            if !controller.is_configured_active() {
                info!("Account {} inactive; not auto-starting", entry.key());
                continue;
            }
            if let Err(e) = controller.start().await {
                error!("Auto-start failed for {}: {}", entry.key(), e);
            }
        }
    }

    /// Stop every running session, for process shutdown.
    pub async fn stop_all(&self) {
        for entry in self.sessions.iter() {
            let controller = entry.value().clone();
            if controller.summary().signals.system_active {
                if let Err(e) = controller.stop().await {
                    warn!("Stop failed for {}: {}", entry.key(), e);
                }
            }
        }
    }

    pub fn get(&self, account_id: &str) -> Result<Arc<SessionController>, AppError> {
        self.sessions
            .get(account_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AppError::NotFound(format!("unknown account: {}", account_id)))
    }

    /// Summaries for every registered account, in stable order.
    pub fn list_summaries(&self) -> Vec<StateSummary> {
        let mut summaries: Vec<StateSummary> = self
            .sessions
            .iter()
            .map(|entry| entry.value().summary())
            .collect();
        summaries.sort_by(|a, b| a.account_id.cmp(&b.account_id));
        summaries
    }

    pub fn account_count(&self) -> usize {
        self.sessions.len()
    }
}
