//! Kill Action Collaborators
//!
//! The irreversible account-disabling action and its confirmation check live
//! behind these traits. The daemon never knows whether the implementation
//! drives a browser, calls a privileged API, or something else entirely.

pub mod bridge;
pub mod mailbox;
pub mod mock;

pub use bridge::BridgeKillExecutor;
pub use mailbox::MailboxVerifier;
pub use mock::{MockKillExecutor, MockVerifier};

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use thiserror::Error;

/// Automation collaborator errors.
#[derive(Debug, Error)]
pub enum AutomationError {
    #[error("Kill action failed: {0}")]
    ActionFailed(String),

    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}

/// Everything the executor needs to disable one account.
#[derive(Debug, Clone)]
pub struct KillContext {
    pub account_id: String,
    pub account_name: String,
    /// MTM at the moment the trigger fired, for the audit trail.
    pub mtm_at_trigger: f64,
}

/// Performs the irreversible external disabling action. A failure here is
/// fatal to the kill sequence.
pub trait KillActionExecutor: Send + Sync {
    fn execute<'a>(
        &'a self,
        ctx: &'a KillContext,
    ) -> Pin<Box<dyn Future<Output = Result<(), AutomationError>> + Send + 'a>>;
}

/// Checks whether the broker's confirmation of the disabling action has
/// arrived. Polled by the detached verification task.
pub trait KillVerifier: Send + Sync {
    fn check_confirmation(
        &self,
        lookback: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<bool, AutomationError>> + Send + '_>>;
}
