//! Session Supervisor
//!
//! Owns the per-account lifecycle: start authenticates and spawns the
//! service tasks, a watchdog respawns any that die while the session is
//! active, stop flips the shared flag and joins everything with a bounded
//! grace period. Accounts already carrying today's lock boot observer-only:
//! monitoring runs, risk and kill never spawn.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::automation::{KillActionExecutor, KillVerifier};
use crate::broker::Broker;
use crate::error::AppError;
use crate::notify::NotificationSink;
use crate::state::AccountState;
use crate::store::ConfigStore;
use crate::types::{SessionStage, StateSummary};

use super::kill_switch::KillDeps;
use super::{config_watcher, data_sync, kill_switch, risk, snapshot};

/// The supervised services. The detached verification task is deliberately
/// not on this list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceName {
    Data,
    Risk,
    Kill,
    Config,
    Snapshot,
}

impl ServiceName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceName::Data => "data",
            ServiceName::Risk => "risk",
            ServiceName::Kill => "kill",
            ServiceName::Config => "config",
            ServiceName::Snapshot => "snapshot",
        }
    }
}

/// Knobs the supervisor itself needs, sourced from process config.
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub snapshot_dir: PathBuf,
    pub watcher_tick_secs: u64,
    pub watchdog_tick_secs: u64,
    pub stop_grace_secs: u64,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            snapshot_dir: PathBuf::from("logs"),
            watcher_tick_secs: 2,
            watchdog_tick_secs: 5,
            stop_grace_secs: 10,
        }
    }
}

/// Per-account session controller.
pub struct SessionController {
    state: Arc<AccountState>,
    store: Arc<ConfigStore>,
    broker: Arc<dyn Broker>,
    executor: Arc<dyn KillActionExecutor>,
    verifier: Arc<dyn KillVerifier>,
    notifier: Arc<dyn NotificationSink>,
    settings: SupervisorSettings,
    tasks: Mutex<HashMap<ServiceName, JoinHandle<()>>>,
    watchdog: Mutex<Option<JoinHandle<()>>>,
}

impl SessionController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        state: Arc<AccountState>,
        store: Arc<ConfigStore>,
        broker: Arc<dyn Broker>,
        executor: Arc<dyn KillActionExecutor>,
        verifier: Arc<dyn KillVerifier>,
        notifier: Arc<dyn NotificationSink>,
        settings: SupervisorSettings,
    ) -> Arc<Self> {
        // Seed the snapshot file so observers of inactive accounts never
        // read a missing document.
        if let Err(e) = snapshot::write_snapshot(&state, &settings.snapshot_dir) {
            warn!(
                "Initial snapshot failed for {}: {}",
                state.account_id(),
                e
            );
        }

        Arc::new(Self {
            state,
            store,
            broker,
            executor,
            verifier,
            notifier,
            settings,
            tasks: Mutex::new(HashMap::new()),
            watchdog: Mutex::new(None),
        })
    }

    pub fn account_id(&self) -> &str {
        self.state.account_id()
    }

    pub fn summary(&self) -> StateSummary {
        self.state.summary()
    }

    /// Whether the stored config flags this account for auto-start.
    pub fn is_configured_active(&self) -> bool {
        self.state.config().account_active
    }

    // ========== Lifecycle ==========

    /// Start the session: reload config and credentials, authenticate, spawn
    /// services, arm the watchdog.
    pub async fn start(self: &Arc<Self>) -> Result<(), AppError> {
        if self.state.signals().system_active {
            return Err(AppError::Conflict(format!(
                "session {} already running",
                self.account_id()
            )));
        }

        let config = self.store.load_account(self.account_id())?;
        let credentials = self.store.load_credentials(self.account_id())?;
        self.state.apply_config(config.clone());
        self.state.set_credentials(credentials.clone());

        let today = chrono::Local::now().date_naive();
        let locked = config.kill_history.is_locked_on(today);
        self.state.reset_for_start(locked);

        if locked {
            warn!(
                "{} carries today's kill lock; booting observer-only",
                self.account_id()
            );
        }

        match self.broker.authenticate(&credentials).await {
            Ok(session) => self.state.set_broker_session(Some(session)),
            Err(e) => {
                error!("Authentication failed for {}: {}", self.account_id(), e);
                // Roll the active flag back so the operator can retry.
                self.state.set_system_active(false);
                self.state.set_error(format!("authentication failed: {}", e));
                return Err(e.into());
            }
        }

        // Monitoring services run regardless of the lock; risk and kill only
        // on an unlocked boot.
        self.spawn_service(ServiceName::Data);
        self.spawn_service(ServiceName::Config);
        self.spawn_service(ServiceName::Snapshot);
        if !locked {
            self.spawn_service(ServiceName::Risk);
            self.spawn_service(ServiceName::Kill);
            self.state.set_stage(SessionStage::Running);
        }

        self.spawn_watchdog();

        info!(
            "Session started for {} ({})",
            self.account_id(),
            if locked { "locked" } else { "active" }
        );
        self.notifier.send(
            self.account_id(),
            if locked {
                "Session started in locked observer mode."
            } else {
                "Session started."
            },
        );
        Ok(())
    }

    /// Stop the session: cooperative flag flip, bounded join, teardown.
    pub async fn stop(&self) -> Result<(), AppError> {
        if !self.state.signals().system_active {
            return Err(AppError::Conflict(format!(
                "session {} is not running",
                self.account_id()
            )));
        }

        info!("Stopping session for {}", self.account_id());
        self.state.set_system_active(false);
        self.state.set_stage(SessionStage::Stopping);

        // The watchdog goes first so nothing gets respawned mid-teardown.
        let watchdog = self.watchdog.lock().unwrap().take();
        if let Some(watchdog) = watchdog {
            watchdog.abort();
            let _ = watchdog.await;
        }

        let handles: Vec<(ServiceName, JoinHandle<()>)> =
            self.tasks.lock().unwrap().drain().collect();
        let grace = Duration::from_secs(self.settings.stop_grace_secs);

        for (name, mut handle) in handles {
            // Loops observe the flag at iteration boundaries, so a bounded
            // wait is enough; anything slower (an in-flight collaborator
            // call) gets aborted.
            match tokio::time::timeout(grace, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) if e.is_cancelled() => {}
                Ok(Err(e)) => warn!("{} task ended badly: {}", name.as_str(), e),
                Err(_) => {
                    warn!(
                        "{} task did not stop within {:?}; aborting",
                        name.as_str(),
                        grace
                    );
                    handle.abort();
                }
            }
        }

        self.state.set_broker_session(None);
        self.state.reset_for_stop();
        info!("Session stopped for {}", self.account_id());
        Ok(())
    }

    /// Re-authenticate and swap the broker session without touching the
    /// running services.
    pub async fn refresh(&self) -> Result<(), AppError> {
        if !self.state.signals().system_active {
            return Err(AppError::Conflict(format!(
                "session {} is not running",
                self.account_id()
            )));
        }

        let credentials = self.store.load_credentials(self.account_id())?;
        self.state.set_credentials(credentials.clone());

        let session = self.broker.authenticate(&credentials).await?;
        self.state.set_broker_session(Some(session));
        info!("Session refreshed for {}", self.account_id());
        Ok(())
    }

    // ========== Operator actions ==========

    /// Latch the kill trigger by hand.
    pub fn trigger_manual(&self) -> Result<(), AppError> {
        let signals = self.state.signals();
        if !signals.system_active {
            return Err(AppError::Conflict(format!(
                "session {} is not running",
                self.account_id()
            )));
        }
        if signals.locked_today {
            return Err(AppError::Conflict(format!(
                "account {} is locked for the day",
                self.account_id()
            )));
        }
        if signals.kill_executed {
            return Err(AppError::Conflict(format!(
                "kill already executed for {}",
                self.account_id()
            )));
        }

        if self.state.arm_trigger() {
            warn!("Manual kill trigger latched for {}", self.account_id());
            self.notifier
                .send(self.account_id(), "Manual kill trigger received.");
        }
        Ok(())
    }

    /// Arm or disarm the kill switch, in memory and on disk.
    pub fn set_kill_enabled(&self, enabled: bool) -> Result<(), AppError> {
        self.state.set_kill_switch_enabled(enabled);
        self.store
            .save_kill_switch_enabled(self.account_id(), enabled)?;
        info!(
            "Kill switch {} for {}",
            if enabled { "armed" } else { "disarmed" },
            self.account_id()
        );
        Ok(())
    }

    /// Clear the daily lock, memory and disk. Operator override; the next
    /// start leaves observer mode.
    pub fn reset_daily_lock(&self) -> Result<(), AppError> {
        self.state.set_locked_today(false);
        self.state.record_kill_history(Default::default());
        self.store.clear_kill_history(self.account_id())?;
        warn!("Daily lock reset for {}", self.account_id());
        self.notifier
            .send(self.account_id(), "Daily lock reset by operator.");
        Ok(())
    }

    // ========== Task plumbing ==========

    fn spawn_service(self: &Arc<Self>, name: ServiceName) {
        let handle = self.service_task(name);
        self.tasks.lock().unwrap().insert(name, handle);
    }

    fn service_task(self: &Arc<Self>, name: ServiceName) -> JoinHandle<()> {
        match name {
            ServiceName::Data => tokio::spawn(data_sync::run_data_service(
                self.state.clone(),
                self.broker.clone(),
            )),
            ServiceName::Risk => tokio::spawn(risk::run_risk_service(
                self.state.clone(),
                self.notifier.clone(),
            )),
            ServiceName::Kill => tokio::spawn(kill_switch::run_kill_service(KillDeps {
                state: self.state.clone(),
                store: self.store.clone(),
                executor: self.executor.clone(),
                verifier: self.verifier.clone(),
                notifier: self.notifier.clone(),
            })),
            ServiceName::Config => tokio::spawn(config_watcher::run_config_watcher(
                self.state.clone(),
                self.store.clone(),
                self.settings.watcher_tick_secs,
            )),
            ServiceName::Snapshot => tokio::spawn(snapshot::run_snapshot_service(
                self.state.clone(),
                self.settings.snapshot_dir.clone(),
            )),
        }
    }

    fn spawn_watchdog(self: &Arc<Self>) {
        let controller = Arc::clone(self);
        let tick = Duration::from_secs(self.settings.watchdog_tick_secs.max(1));

        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(tick).await;
                if !controller.state.signals().system_active {
                    break;
                }
                controller.respawn_dead_services();
            }
        });

        *self.watchdog.lock().unwrap() = Some(handle);
    }

    /// One watchdog pass: bring back anything that died while the session
    /// is active.
    fn respawn_dead_services(self: &Arc<Self>) {
        let dead: Vec<ServiceName> = {
            let tasks = self.tasks.lock().unwrap();
            tasks
                .iter()
                .filter(|(_, handle)| handle.is_finished())
                .map(|(name, _)| *name)
                .collect()
        };

        for name in dead {
            if name == ServiceName::Kill {
                let signals = self.state.signals();
                let stage = self.state.stage();
                // The kill service exits for good reasons: sequence done, or
                // fatal action failure awaiting an operator. Neither may be
                // respawned into a second attempt.
                if signals.kill_executed || stage == SessionStage::Error {
                    self.tasks.lock().unwrap().remove(&name);
                    continue;
                }
            }

            warn!(
                "Watchdog respawning {} service for {}",
                name.as_str(),
                self.account_id()
            );
            self.spawn_service(name);
        }
    }

    /// Names of services whose tasks are currently alive.
    pub fn live_services(&self) -> Vec<ServiceName> {
        let tasks = self.tasks.lock().unwrap();
        tasks
            .iter()
            .filter(|(_, handle)| !handle.is_finished())
            .map(|(name, _)| *name)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::{MockKillExecutor, MockVerifier};
    use crate::broker::MockBroker;
    use crate::notify::NullSink;
    use serde_json::json;
    use uuid::Uuid;

    fn scratch_store(kill_enabled: bool, locked_today: bool) -> Arc<ConfigStore> {
        let dir = std::env::temp_dir().join(format!("tripwire-sup-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();

        let locked_date = if locked_today {
            Some(chrono::Local::now().date_naive().to_string())
        } else {
            None
        };

        let accounts = json!({
            "acct1": {
                "account_name": "Main",
                "account_active": true,
                "kill_switch": {
                    "enabled": kill_enabled,
                    "mtm_loss_limit": 10000.0,
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
                },
                "kill_history": {
                    "locked_date": locked_date,
                    "timestamp": null,
                    "verified": false
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

        Arc::new(ConfigStore::new(
            dir.join("accounts.json"),
            dir.join("credentials.json"),
        ))
    }

    fn controller(
        store: Arc<ConfigStore>,
        broker: MockBroker,
        executor: MockKillExecutor,
    ) -> Arc<SessionController> {
        let config = store.load_account("acct1").unwrap();
        let state = Arc::new(AccountState::new("acct1", config, Default::default()));
        let settings = SupervisorSettings {
            snapshot_dir: std::env::temp_dir().join(format!("tripwire-snap-{}", Uuid::new_v4())),
            watcher_tick_secs: 1,
            watchdog_tick_secs: 1,
            stop_grace_secs: 2,
        };
        SessionController::new(
            state,
            store,
            Arc::new(broker),
            Arc::new(executor),
            Arc::new(MockVerifier::never_confirming()),
            NullSink::new(),
            settings,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_respawns_crashed_service() {
        let controller = controller(
            scratch_store(true, false),
            MockBroker::new(),
            MockKillExecutor::new(),
        );
        controller.start().await.unwrap();

        // Crash the data task from outside.
        controller
            .tasks
            .lock()
            .unwrap()
            .get(&ServiceName::Data)
            .unwrap()
            .abort();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!controller.live_services().contains(&ServiceName::Data));

        controller.respawn_dead_services();
        assert!(controller.live_services().contains(&ServiceName::Data));

        controller.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_never_respawns_kill_after_execution() {
        let executor = MockKillExecutor::new();
        let controller = controller(scratch_store(true, false), MockBroker::new(), executor);
        controller.start().await.unwrap();

        controller.trigger_manual().unwrap();
        // Let the kill loop pick up the trigger and finish the sequence.
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert!(controller.summary().signals.kill_executed);
        assert!(!controller.live_services().contains(&ServiceName::Kill));

        controller.respawn_dead_services();
        assert!(!controller.live_services().contains(&ServiceName::Kill));
        assert!(!controller
            .tasks
            .lock()
            .unwrap()
            .contains_key(&ServiceName::Kill));

        controller.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_never_respawns_kill_after_fatal_error() {
        let executor = MockKillExecutor::new();
        executor.fail_with("portal down");
        let controller = controller(scratch_store(true, false), MockBroker::new(), executor);
        controller.start().await.unwrap();

        controller.trigger_manual().unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(controller.summary().stage, SessionStage::Error);
        assert!(!controller.summary().signals.kill_executed);

        controller.respawn_dead_services();
        assert!(!controller.live_services().contains(&ServiceName::Kill));

        controller.stop().await.unwrap();
    }
}
