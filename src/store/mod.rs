//! Config Store
//!
//! The external system of record: two JSON documents, one for per-account
//! configuration (including the durable kill history) and one for
//! credentials. Every write is a read-modify-write of the full document
//! followed by an atomic temp-file + rename, so observers and concurrent
//! daemons never see a torn file. Unknown keys belonging to other tools are
//! preserved verbatim.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::types::{AccountConfig, Credentials, KillHistory};

/// Store access errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Unknown account: {0}")]
    UnknownAccount(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// File-backed per-account configuration store.
pub struct ConfigStore {
    accounts_path: PathBuf,
    credentials_path: PathBuf,
    /// Serializes read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

impl ConfigStore {
    pub fn new(accounts_path: impl Into<PathBuf>, credentials_path: impl Into<PathBuf>) -> Self {
        Self {
            accounts_path: accounts_path.into(),
            credentials_path: credentials_path.into(),
            write_lock: Mutex::new(()),
        }
    }

    // ========== Reads ==========

    /// Load every account section. Ordering is stable for display purposes.
    pub fn load_accounts(&self) -> Result<BTreeMap<String, AccountConfig>> {
        let text = fs::read_to_string(&self.accounts_path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Load a single account's section.
    pub fn load_account(&self, account_id: &str) -> Result<AccountConfig> {
        let mut accounts = self.load_accounts()?;
        accounts
            .remove(account_id)
            .ok_or_else(|| StoreError::UnknownAccount(account_id.to_string()))
    }

    /// Load a single account's credentials.
    pub fn load_credentials(&self, account_id: &str) -> Result<Credentials> {
        let text = fs::read_to_string(&self.credentials_path)?;
        let mut all: BTreeMap<String, Credentials> = serde_json::from_str(&text)?;
        all.remove(account_id)
            .ok_or_else(|| StoreError::UnknownAccount(account_id.to_string()))
    }

    /// Modification marker for the hot-reload watcher: mtime of the accounts
    /// document. `None` when the file is unreadable (watcher treats that as
    /// no change).
    pub fn modified_marker(&self) -> Option<SystemTime> {
        fs::metadata(&self.accounts_path).and_then(|m| m.modified()).ok()
    }

    // ========== Writes ==========

    /// Persist a kill event. This is the durable daily lock: once
    /// `locked_date` is today, every boot until reset starts observer-only.
    pub fn save_kill_history(&self, account_id: &str, history: &KillHistory) -> Result<()> {
        self.update_account(account_id, |section| {
            section["kill_history"] = serde_json::to_value(history)?;
            Ok(())
        })
    }

    /// Clear the persisted lock. Operator override only.
    pub fn clear_kill_history(&self, account_id: &str) -> Result<()> {
        self.save_kill_history(account_id, &KillHistory::default())
    }

    /// Persist the master kill-switch arm flag.
    pub fn save_kill_switch_enabled(&self, account_id: &str, enabled: bool) -> Result<()> {
        self.update_account(account_id, |section| {
            section["kill_switch"]["enabled"] = Value::Bool(enabled);
            Ok(())
        })
    }

    /// Read-modify-write one account's section, preserving everything else
    /// in the document byte-for-byte semantically.
    fn update_account<F>(&self, account_id: &str, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut Value) -> Result<()>,
    {
        let _guard = self.write_lock.lock().unwrap();

        let text = fs::read_to_string(&self.accounts_path)?;
        let mut doc: Value = serde_json::from_str(&text)?;

        let section = doc
            .get_mut(account_id)
            .ok_or_else(|| StoreError::UnknownAccount(account_id.to_string()))?;
        mutate(section)?;

        atomic_write_json(&self.accounts_path, &doc)?;
        debug!("Persisted config update for {}", account_id);
        Ok(())
    }
}

/// Write pretty JSON via a temp file in the same directory, fsync, then
/// rename over the target.
pub fn atomic_write_json(path: &Path, value: &Value) -> Result<()> {
    let tmp_path = path.with_extension("tmp");
    {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(serde_json::to_string_pretty(value)?.as_bytes())?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
}
