//! Mock Automation Collaborators
//!
//! Scriptable kill executor and verifier for tests: outcomes are queued up
//! front, invocations are counted.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{AutomationError, KillActionExecutor, KillContext, KillVerifier};

/// Kill executor whose outcome is scripted.
#[derive(Clone, Default)]
pub struct MockKillExecutor {
    calls: Arc<AtomicU32>,
    fail_with: Arc<Mutex<Option<String>>>,
}

impl MockKillExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent execute call fail with this message.
    pub fn fail_with(&self, message: &str) {
        *self.fail_with.lock().unwrap() = Some(message.to_string());
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl KillActionExecutor for MockKillExecutor {
    fn execute<'a>(
        &'a self,
        _ctx: &'a KillContext,
    ) -> Pin<Box<dyn Future<Output = Result<(), AutomationError>> + Send + 'a>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.fail_with.lock().unwrap().clone() {
                Some(message) => Err(AutomationError::ActionFailed(message)),
                None => Ok(()),
            }
        })
    }
}

/// Verifier that confirms after a configurable number of polls.
#[derive(Clone)]
pub struct MockVerifier {
    calls: Arc<AtomicU32>,
    confirm_after: Arc<Mutex<Option<u32>>>,
}

impl MockVerifier {
    /// Confirm on the `n`-th poll (1-based).
    pub fn confirming_after(n: u32) -> Self {
        Self {
            calls: Arc::new(AtomicU32::new(0)),
            confirm_after: Arc::new(Mutex::new(Some(n))),
        }
    }

    /// Never confirm.
    pub fn never_confirming() -> Self {
        Self {
            calls: Arc::new(AtomicU32::new(0)),
            confirm_after: Arc::new(Mutex::new(None)),
        }
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl KillVerifier for MockVerifier {
    fn check_confirmation(
        &self,
        _lookback: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<bool, AutomationError>> + Send + '_>> {
        Box::pin(async move {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let confirmed = self
                .confirm_after
                .lock()
                .unwrap()
                .map(|n| call >= n)
                .unwrap_or(false);
            Ok(confirmed)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_executor_scripted_failure() {
        let executor = MockKillExecutor::new();
        let ctx = KillContext {
            account_id: "a".to_string(),
            account_name: "A".to_string(),
            mtm_at_trigger: -12_000.0,
        };

        assert!(executor.execute(&ctx).await.is_ok());
        executor.fail_with("portal down");
        assert!(executor.execute(&ctx).await.is_err());
        assert_eq!(executor.call_count(), 2);
    }

    #[tokio::test]
    async fn test_verifier_confirms_on_nth_poll() {
        let verifier = MockVerifier::confirming_after(3);
        let lookback = Duration::from_secs(60);

        assert!(!verifier.check_confirmation(lookback).await.unwrap());
        assert!(!verifier.check_confirmation(lookback).await.unwrap());
        assert!(verifier.check_confirmation(lookback).await.unwrap());
    }

    #[tokio::test]
    async fn test_verifier_never_confirms() {
        let verifier = MockVerifier::never_confirming();
        for _ in 0..5 {
            assert!(!verifier
                .check_confirmation(Duration::from_secs(60))
                .await
                .unwrap());
        }
        assert_eq!(verifier.call_count(), 5);
    }
}
