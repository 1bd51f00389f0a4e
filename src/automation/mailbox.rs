//! Mailbox Confirmation Verifier
//!
//! The broker emails a "trading disabled" notice once the kill action lands.
//! A small mail bridge exposes the inbox over HTTP; this verifier asks it
//! whether a matching message from the broker arrived inside the lookback
//! window.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::{AutomationError, KillVerifier};
use crate::types::MailboxCredentials;

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    matches: u32,
}

/// Mail-bridge backed verifier. Without mailbox credentials it degrades to
/// "never confirmed", which the kill sequence reports as an unverified
/// (still locked) outcome.
#[derive(Clone)]
pub struct MailboxVerifier {
    client: Client,
    base_url: String,
    sender_filter: Option<String>,
    subject_contains: String,
}

impl MailboxVerifier {
    pub fn new(base_url: impl Into<String>, mailbox: Option<&MailboxCredentials>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: base_url.into(),
            sender_filter: mailbox.map(|m| m.sender_filter.clone()),
            subject_contains: "trading access".to_string(),
        }
    }
}

impl KillVerifier for MailboxVerifier {
    fn check_confirmation(
        &self,
        lookback: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<bool, AutomationError>> + Send + '_>> {
        Box::pin(async move {
            let Some(sender) = self.sender_filter.as_deref() else {
                debug!("No mailbox configured; confirmation check is a no-op");
                return Ok(false);
            };

            let newer_than = lookback.as_secs().to_string();
            let response = self
                .client
                .get(format!("{}/search", self.base_url))
                .query(&[
                    ("from", sender),
                    ("subject", self.subject_contains.as_str()),
                    ("newer_than_secs", newer_than.as_str()),
                ])
                .send()
                .await?;

            if !response.status().is_success() {
                return Err(AutomationError::UnexpectedResponse(format!(
                    "mail bridge returned {}",
                    response.status()
                )));
            }

            let body: SearchResponse = response.json().await?;
            debug!("Mailbox search from={} matches={}", sender, body.matches);
            Ok(body.matches > 0)
        })
    }
}
