//! Automation Bridge Executor
//!
//! Hands the kill request to a local browser-automation bridge over HTTP.
//! The bridge logs into the broker's web portal and flips the segment
//! toggles; this side only cares whether that run succeeded.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use super::{AutomationError, KillActionExecutor, KillContext};

/// Bridge runs are slow (full browser login including an OTP hop), so the
/// request timeout is generous.
const BRIDGE_TIMEOUT: Duration = Duration::from_secs(240);

#[derive(Debug, Deserialize)]
struct BridgeResponse {
    ok: bool,
    #[serde(default)]
    detail: Option<String>,
}

/// HTTP client for the automation bridge.
#[derive(Clone)]
pub struct BridgeKillExecutor {
    client: Client,
    base_url: String,
}

impl BridgeKillExecutor {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(BRIDGE_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

impl KillActionExecutor for BridgeKillExecutor {
    fn execute<'a>(
        &'a self,
        ctx: &'a KillContext,
    ) -> Pin<Box<dyn Future<Output = Result<(), AutomationError>> + Send + 'a>> {
        Box::pin(async move {
            info!(
                "Dispatching kill action for {} to automation bridge",
                ctx.account_id
            );

            let response = self
                .client
                .post(format!("{}/kill", self.base_url))
                .json(&json!({
                    "accountId": ctx.account_id,
                    "accountName": ctx.account_name,
                    "mtmAtTrigger": ctx.mtm_at_trigger,
                }))
                .send()
                .await?;

            if !response.status().is_success() {
                let status = response.status();
                let text = response.text().await.unwrap_or_default();
                return Err(AutomationError::ActionFailed(format!(
                    "bridge returned {}: {}",
                    status,
                    &text[..text.len().min(200)]
                )));
            }

            let body: BridgeResponse = response.json().await?;
            if !body.ok {
                return Err(AutomationError::ActionFailed(
                    body.detail.unwrap_or_else(|| "bridge reported failure".to_string()),
                ));
            }

            info!("Automation bridge confirmed kill run for {}", ctx.account_id);
            Ok(())
        })
    }
}
