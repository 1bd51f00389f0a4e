//! Mock Broker
//!
//! Scriptable in-memory broker for tests and dry runs. Positions, orders and
//! quotes are set directly; sync failures and auth failures can be injected;
//! every call is counted so tests can assert on interaction patterns.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use uuid::Uuid;

use super::{Broker, BrokerError, BrokerSession};
use crate::types::{
    Credentials, Order, OrderAck, OrderSide, Position, QuoteMap, QuoteQuery,
};

#[derive(Default)]
struct MockData {
    positions: Vec<Position>,
    orders: Vec<Order>,
    quotes: QuoteMap,
    /// Remaining sync calls that should fail.
    failing_syncs: u32,
    /// Remaining authenticate calls that should fail.
    failing_auths: u32,
    /// Exit orders the mock has accepted: (symbol, side, qty).
    exits: Vec<(String, OrderSide, i64)>,
}

/// Shared mock backend. Cheap to clone; all clones see the same script.
#[derive(Clone, Default)]
pub struct MockBroker {
    data: Arc<Mutex<MockData>>,
    auth_calls: Arc<AtomicU32>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    // ========== Scripting ==========

    pub fn set_positions(&self, positions: Vec<Position>) {
        self.data.lock().unwrap().positions = positions;
    }

    pub fn set_orders(&self, orders: Vec<Order>) {
        self.data.lock().unwrap().orders = orders;
    }

    pub fn set_quote(&self, token: &str, ltp: f64) {
        self.data.lock().unwrap().quotes.insert(token.to_string(), ltp);
    }

    /// Make the next `n` data fetches fail.
    pub fn fail_syncs(&self, n: u32) {
        self.data.lock().unwrap().failing_syncs = n;
    }

    /// Make the next `n` authentications fail.
    pub fn fail_auths(&self, n: u32) {
        self.data.lock().unwrap().failing_auths = n;
    }

    // ========== Inspection ==========

    pub fn auth_count(&self) -> u32 {
        self.auth_calls.load(Ordering::SeqCst)
    }

    pub fn exit_orders(&self) -> Vec<(String, OrderSide, i64)> {
        self.data.lock().unwrap().exits.clone()
    }

    fn take_sync_failure(&self) -> bool {
        let mut data = self.data.lock().unwrap();
        if data.failing_syncs > 0 {
            data.failing_syncs -= 1;
            true
        } else {
            false
        }
    }
}

impl Broker for MockBroker {
    fn authenticate<'a>(
        &'a self,
        credentials: &'a Credentials,
    ) -> Pin<Box<dyn Future<Output = Result<Arc<dyn BrokerSession>, BrokerError>> + Send + 'a>>
    {
        Box::pin(async move {
            self.auth_calls.fetch_add(1, Ordering::SeqCst);

            {
                let mut data = self.data.lock().unwrap();
                if data.failing_auths > 0 {
                    data.failing_auths -= 1;
                    return Err(BrokerError::Auth("simulated auth failure".to_string()));
                }
            }
            credentials.validate().map_err(BrokerError::Auth)?;

            Ok(Arc::new(MockSession {
                broker: self.clone(),
            }) as Arc<dyn BrokerSession>)
        })
    }
}

/// Session handle over the shared mock backend.
pub struct MockSession {
    broker: MockBroker,
}

impl BrokerSession for MockSession {
    fn fetch_positions(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Position>, BrokerError>> + Send + '_>> {
        Box::pin(async move {
            if self.broker.take_sync_failure() {
                return Err(BrokerError::Simulated("positions fetch".to_string()));
            }
            Ok(self.broker.data.lock().unwrap().positions.clone())
        })
    }

    fn fetch_orders(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Order>, BrokerError>> + Send + '_>> {
        Box::pin(async move {
            if self.broker.take_sync_failure() {
                return Err(BrokerError::Simulated("orders fetch".to_string()));
            }
            Ok(self.broker.data.lock().unwrap().orders.clone())
        })
    }

    fn fetch_quotes<'a>(
        &'a self,
        queries: &'a [QuoteQuery],
    ) -> Pin<Box<dyn Future<Output = Result<QuoteMap, BrokerError>> + Send + 'a>> {
        Box::pin(async move {
            if self.broker.take_sync_failure() {
                return Err(BrokerError::Simulated("quotes fetch".to_string()));
            }
            let data = self.broker.data.lock().unwrap();
            Ok(queries
                .iter()
                .filter_map(|q| data.quotes.get(&q.token).map(|ltp| (q.token.clone(), *ltp)))
                .collect())
        })
    }

    fn place_market_exit<'a>(
        &'a self,
        position: &'a Position,
        side: OrderSide,
        qty: i64,
    ) -> Pin<Box<dyn Future<Output = Result<OrderAck, BrokerError>> + Send + 'a>> {
        Box::pin(async move {
            let mut data = self.broker.data.lock().unwrap();
            data.exits.push((position.symbol.clone(), side, qty));
            Ok(OrderAck {
                order_id: Uuid::new_v4().to_string(),
                status: "Ok".to_string(),
            })
        })
    }
}
