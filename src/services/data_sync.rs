//! Data Sync Service
//!
//! Polls the broker for positions, orders and quotes. Healthy cycles pace
//! themselves by the trading window (fast in-market, slow off-market);
//! failures back off exponentially with jitter, and a sustained outage
//! re-authenticates once per outage before resuming the backoff ladder. Old
//! market data is never cleared on failure, so risk keeps evaluating against
//! the last known values.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, info, warn};

use crate::broker::{Broker, BrokerError, BrokerSession};
use crate::state::AccountState;
use crate::types::QuoteQuery;

/// One full fetch cycle: positions, then orders, then quotes for whatever
/// tokens the fresh positions reference.
async fn sync_cycle(
    session: &Arc<dyn BrokerSession>,
    state: &AccountState,
) -> Result<(), BrokerError> {
    let positions = session.fetch_positions().await?;
    let orders = session.fetch_orders().await?;

    let quotes = if positions.is_empty() {
        Default::default()
    } else {
        let queries: Vec<QuoteQuery> = positions
            .iter()
            .filter(|p| !p.token.is_empty())
            .map(|p| QuoteQuery {
                token: p.token.clone(),
                segment: p.segment.clone(),
            })
            .collect();
        session.fetch_quotes(&queries).await?
    };

    state.apply_market(positions, orders, quotes);
    Ok(())
}

/// Background loop. Exits when `system_active` clears.
pub async fn run_data_service(state: Arc<AccountState>, broker: Arc<dyn Broker>) {
    info!("Data service started for {}", state.account_id());

    let mut consecutive_errors: u32 = 0;
    // One re-auth per outage: reset only by a successful sync.
    let mut reauth_attempted = false;

    loop {
        if !state.signals().system_active {
            break;
        }

        let Some(session) = state.broker_session() else {
            // Mid-refresh gap; try again shortly.
            tokio::time::sleep(Duration::from_millis(500)).await;
            continue;
        };

        let sleep_for = match sync_cycle(&session, &state).await {
            Ok(()) => {
                if consecutive_errors > 0 {
                    info!(
                        "Data sync recovered for {} after {} failures",
                        state.account_id(),
                        consecutive_errors
                    );
                }
                consecutive_errors = 0;
                reauth_attempted = false;

                let config = state.config();
                let now = chrono::Local::now().time();
                let secs = if config.window.contains(now) {
                    config.monitoring.poll_interval_secs
                } else {
                    config.monitoring.off_market_interval_secs
                };
                Duration::from_secs(secs.max(1))
            }
            Err(e) => {
                consecutive_errors += 1;
                state.mark_sync_failure();
                warn!(
                    "Data sync failure {} for {}: {}",
                    consecutive_errors,
                    state.account_id(),
                    e
                );

                let config = state.config();
                let retry = &config.monitoring.retry;

                if consecutive_errors > retry.max_retries && !reauth_attempted {
                    reauth_attempted = true;
                    warn!(
                        "{} consecutive sync failures for {}; re-authenticating",
                        consecutive_errors,
                        state.account_id()
                    );
                    let credentials = state.credentials();
                    match broker.authenticate(&credentials).await {
                        Ok(fresh) => {
                            state.set_broker_session(Some(fresh));
                            info!("Re-authentication succeeded for {}", state.account_id());
                        }
                        Err(auth_err) => {
                            warn!(
                                "Re-authentication failed for {}: {}",
                                state.account_id(),
                                auth_err
                            );
                        }
                    }
                }

                let base = retry.delay_ms(consecutive_errors);
                let jitter = if base >= 4 {
                    rand::thread_rng().gen_range(0..base / 4)
                } else {
                    0
                };
                Duration::from_millis(base + jitter)
            }
        };

        debug!(
            "Data service for {} sleeping {:?}",
            state.account_id(),
            sleep_for
        );
        tokio::time::sleep(sleep_for).await;
    }

    info!("Data service stopped for {}", state.account_id());
}
