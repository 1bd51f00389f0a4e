//! Notification Sink
//!
//! Best-effort operator alerts. Sends never block the caller: the HTTP hop
//! runs on its own task and failures are logged, not surfaced. A short
//! per-account dedup window keeps a flapping trigger from spamming the chat.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, warn};

use crate::types::TelegramCredentials;

/// Identical messages for the same account are suppressed for this long.
const DEDUP_WINDOW: Duration = Duration::from_secs(60);

/// Best-effort, non-blocking notification delivery.
pub trait NotificationSink: Send + Sync {
    fn send(&self, account_id: &str, message: &str);
}

/// Telegram bot sink.
pub struct TelegramNotifier {
    client: Client,
    credentials: Option<TelegramCredentials>,
    /// (account, message hash) -> last send time.
    recent: DashMap<(String, u64), Instant>,
}

impl TelegramNotifier {
    /// A notifier without credentials is a clean no-op, so accounts with
    /// notifications disabled can share the construction path.
    pub fn new(credentials: Option<TelegramCredentials>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            credentials,
            recent: DashMap::new(),
        }
    }

    fn should_send(&self, account_id: &str, message: &str) -> bool {
        let mut hasher = DefaultHasher::new();
        message.hash(&mut hasher);
        let key = (account_id.to_string(), hasher.finish());

        let now = Instant::now();
        // Drop expired entries so the map never grows unbounded.
        self.recent
            .retain(|_, sent_at| now.duration_since(*sent_at) < DEDUP_WINDOW);

        if self.recent.contains_key(&key) {
            return false;
        }
        self.recent.insert(key, now);
        true
    }
}

impl NotificationSink for TelegramNotifier {
    fn send(&self, account_id: &str, message: &str) {
        let Some(creds) = self.credentials.clone() else {
            return;
        };

        if !self.should_send(account_id, message) {
            debug!("Suppressed duplicate alert for {}", account_id);
            return;
        }

        let client = self.client.clone();
        let text = format!("🚨 *{} Alert*\n\n{}", account_id, message);

        tokio::spawn(async move {
            let url = format!("https://api.telegram.org/bot{}/sendMessage", creds.bot_token);
            let result = client
                .post(&url)
                .json(&json!({
                    "chat_id": creds.chat_id,
                    "text": text,
                    "parse_mode": "Markdown",
                }))
                .send()
                .await;

            match result {
                Ok(response) if !response.status().is_success() => {
                    warn!("Telegram send failed: {}", response.status());
                }
                Err(e) => warn!("Telegram connection error: {}", e),
                _ => {}
            }
        });
    }
}

/// Sink that records messages in memory. Used by tests and as the disabled
/// default.
#[derive(Default)]
pub struct NullSink {
    messages: std::sync::Mutex<Vec<(String, String)>>,
}

impl NullSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn messages(&self) -> Vec<(String, String)> {
        self.messages.lock().unwrap().clone()
    }
}

impl NotificationSink for NullSink {
    fn send(&self, account_id: &str, message: &str) {
        self.messages
            .lock()
            .unwrap()
            .push((account_id.to_string(), message.to_string()));
    }
}
