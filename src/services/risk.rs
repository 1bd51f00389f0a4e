//! Risk Evaluation Service
//!
//! Recomputes MTM and stop-loss-hit status every cycle against whatever
//! market data the sync service last published, and latches the kill trigger
//! when the composite condition holds. Evaluation itself is idempotent and
//! side-effect-free; the latch is the only thing it ever flips, and only
//! once.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::notify::NotificationSink;
use crate::state::{AccountState, RiskInputs};
use crate::types::{Order, OrderSide, Position, QuoteMap};

/// Mark-to-market PnL over all positions:
/// `(sell_amt - buy_amt) + net_qty * ltp * multiplier * price_factor` per
/// leg. A leg with no quote contributes only its realized part.
pub fn compute_mtm(positions: &[Position], quotes: &QuoteMap) -> f64 {
    let total: f64 = positions
        .iter()
        .map(|p| {
            let ltp = quotes.get(&p.token).copied().unwrap_or(0.0);
            p.leg_pnl(ltp)
        })
        .sum();
    // Broker statements round to the paisa; match them.
    (total * 100.0).round() / 100.0
}

/// A protective exit has completed: a stop-loss-type BUY order (closing a
/// short leg) whose full quantity filled. The fill count is authoritative;
/// the status string is only a fallback for brokers that omit fill counts.
pub fn detect_sl_hit(orders: &[Order]) -> bool {
    orders.iter().any(|o| {
        o.is_stop_loss()
            && o.side == OrderSide::Buy
            && (o.is_fully_filled() || (o.qty == 0 && o.status_complete()))
    })
}

/// The composite trigger condition.
pub fn trigger_condition(inputs: &RiskInputs, mtm_current: f64, sl_hit: bool) -> bool {
    let breached = mtm_current <= inputs.mtm_limit;
    breached && (!inputs.require_fill_confirmation || sl_hit)
}

/// Background loop: evaluate, publish, maybe latch the trigger.
pub async fn run_risk_service(state: Arc<AccountState>, notifier: Arc<dyn NotificationSink>) {
    info!("Risk service started for {}", state.account_id());

    loop {
        if !state.signals().system_active {
            break;
        }

        let inputs = state.risk_inputs();
        let mtm_current = compute_mtm(&inputs.positions, &inputs.quotes);
        let sl_hit = detect_sl_hit(&inputs.orders);
        state.publish_risk(mtm_current, sl_hit);

        if trigger_condition(&inputs, mtm_current, sl_hit) {
            // arm_trigger is a one-way latch; a second breach cycle is a
            // no-op.
            if state.arm_trigger() {
                warn!(
                    "Trigger detected for {}: mtm={:.2} limit={:.2} sl_hit={}",
                    state.account_id(),
                    mtm_current,
                    inputs.mtm_limit,
                    sl_hit
                );
                notifier.send(
                    state.account_id(),
                    &format!(
                        "MTM limit breached: {:.2} (limit {:.2}). Kill sequence requested.",
                        mtm_current, inputs.mtm_limit
                    ),
                );
            }
        } else {
            debug!(
                "Risk cycle for {}: mtm={:.2} distance={:.2} sl_hit={}",
                state.account_id(),
                mtm_current,
                mtm_current - inputs.mtm_limit,
                sl_hit
            );
        }

        let poll = state.config().monitoring.poll_interval_secs;
        tokio::time::sleep(Duration::from_secs(poll.max(1))).await;
    }

    info!("Risk service stopped for {}", state.account_id());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(token: &str, net_qty: i64, buy: f64, sell: f64) -> Position {
        Position {
            token: token.to_string(),
            segment: "nse_fo".to_string(),
            symbol: format!("SYM{}", token),
            net_qty,
            total_buy_amt: buy,
            total_sell_amt: sell,
            multiplier: 1.0,
            price_factor: 1.0,
            lot_size: 25.0,
            product: "NRML".to_string(),
        }
    }

    fn sl_order(side: OrderSide, qty: i64, filled: i64) -> Order {
        Order {
            order_id: "1".to_string(),
            status: "OPEN".to_string(),
            order_type: "SL-M".to_string(),
            side,
            token: "111".to_string(),
            symbol: "SYM111".to_string(),
            qty,
            filled_qty: filled,
        }
    }

    #[test]
    fn test_mtm_sums_legs() {
        let positions = vec![
            position("111", -50, 0.0, 10_000.0),
            position("222", 25, 4_000.0, 0.0),
        ];
        let mut quotes = QuoteMap::new();
        quotes.insert("111".to_string(), 150.0);
        quotes.insert("222".to_string(), 180.0);

        // Leg 1: 10000 + (-50 * 150) = 2500
        // Leg 2: -4000 + (25 * 180)  = 500
        assert_eq!(compute_mtm(&positions, &quotes), 3_000.0);
    }

    #[test]
    fn test_mtm_missing_quote_keeps_realized_part() {
        let positions = vec![position("111", -50, 0.0, 10_000.0)];
        assert_eq!(compute_mtm(&positions, &QuoteMap::new()), 10_000.0);
    }

    #[test]
    fn test_sl_hit_requires_buy_side_full_fill() {
        // Fully filled buy-side stop loss: hit.
        assert!(detect_sl_hit(&[sl_order(OrderSide::Buy, 50, 50)]));
        // Partial fill: not yet.
        assert!(!detect_sl_hit(&[sl_order(OrderSide::Buy, 50, 20)]));
        // Sell-side stop loss does not close short exposure.
        assert!(!detect_sl_hit(&[sl_order(OrderSide::Sell, 50, 50)]));
        // Non-SL order types are ignored even when filled.
        let mut market = sl_order(OrderSide::Buy, 50, 50);
        market.order_type = "MKT".to_string();
        assert!(!detect_sl_hit(&[market]));
    }

    #[test]
    fn test_sl_hit_status_fallback_when_qty_unknown() {
        let mut order = sl_order(OrderSide::Buy, 0, 0);
        order.status = "COMPLETE".to_string();
        assert!(detect_sl_hit(&[order]));
    }

    fn inputs(limit: f64, require: bool) -> RiskInputs {
        RiskInputs {
            positions: Vec::new(),
            orders: Vec::new(),
            quotes: QuoteMap::new(),
            mtm_limit: limit,
            require_fill_confirmation: require,
        }
    }

    #[test]
    fn test_breach_alone_fires_without_confirmation_gate() {
        let i = inputs(-10_000.0, false);
        assert!(trigger_condition(&i, -12_000.0, false));
    }

    #[test]
    fn test_confirmation_gate_holds_trigger() {
        let i = inputs(-10_000.0, true);
        assert!(!trigger_condition(&i, -12_000.0, false));
        // Same breach, stop loss now filled: fires.
        assert!(trigger_condition(&i, -12_000.0, true));
    }

    #[test]
    fn test_no_trigger_above_limit() {
        let i = inputs(-10_000.0, false);
        assert!(!trigger_condition(&i, -9_999.99, true));
        assert!(trigger_condition(&i, -10_000.0, true));
    }
}
