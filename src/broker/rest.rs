//! Brokerage REST Client
//!
//! Two-step TOTP + MPIN login followed by positions / order-report / quotes
//! polling and market exit placement. The wire shapes are the broker's own:
//! short keys, numbers that arrive as strings, and lot-size-scaled quantities
//! for derivative segments. Everything is coerced defensively here so the
//! rest of the daemon only ever sees normalized types.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use hmac::{Hmac, Mac};
use reqwest::Client;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::{Broker, BrokerError, BrokerSession};
use crate::types::{
    Credentials, Order, OrderAck, OrderSide, Position, QuoteMap, QuoteQuery,
};

/// Live REST broker factory.
#[derive(Clone)]
pub struct RestBroker {
    client: Client,
    base_url: String,
}

impl RestBroker {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = Client::builder()
            .user_agent("Tripwire/0.1")
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

impl Broker for RestBroker {
    fn authenticate<'a>(
        &'a self,
        credentials: &'a Credentials,
    ) -> Pin<Box<dyn Future<Output = Result<Arc<dyn BrokerSession>, BrokerError>> + Send + 'a>>
    {
        Box::pin(async move {
            credentials.validate().map_err(BrokerError::Auth)?;
            let broker = &credentials.broker;

            let otp = totp_now(&broker.totp_secret);
            let device_id = device_fingerprint(&broker.consumer_key);

            // Step 1: TOTP login yields the view token and session id.
            let login: Value = self
                .client
                .post(format!("{}/login/1.0/login/v2/totp/login", self.base_url))
                .header("neo-consumer-key", &broker.consumer_key)
                .header("neo-device-id", &device_id)
                .json(&json!({
                    "mobileNumber": broker.mobile_number,
                    "ucc": broker.ucc,
                    "totp": otp,
                }))
                .send()
                .await?
                .json()
                .await?;

            let view_token = string_field(&login, "/data/token")
                .ok_or_else(|| BrokerError::Auth(format!("totp login rejected: {}", login)))?;
            let sid = string_field(&login, "/data/sid").unwrap_or_default();

            // Step 2: MPIN validation yields the trade token.
            let validate: Value = self
                .client
                .post(format!(
                    "{}/login/1.0/login/v2/totp/validate",
                    self.base_url
                ))
                .header("neo-consumer-key", &broker.consumer_key)
                .header("Authorization", &view_token)
                .header("sid", &sid)
                .json(&json!({ "mpin": broker.mpin }))
                .send()
                .await?
                .json()
                .await?;

            let trade_token = string_field(&validate, "/data/token")
                .ok_or_else(|| BrokerError::Auth(format!("mpin validate rejected: {}", validate)))?;

            debug!("Broker login complete for ucc {}", broker.ucc);

            Ok(Arc::new(RestSession {
                client: self.client.clone(),
                base_url: self.base_url.clone(),
                consumer_key: broker.consumer_key.clone(),
                trade_token,
                sid,
            }) as Arc<dyn BrokerSession>)
        })
    }
}

/// An authenticated REST session.
pub struct RestSession {
    client: Client,
    base_url: String,
    consumer_key: String,
    trade_token: String,
    sid: String,
}

impl RestSession {
    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .header("neo-consumer-key", &self.consumer_key)
            .header("Authorization", &self.trade_token)
            .header("sid", &self.sid)
    }
}

impl BrokerSession for RestSession {
    fn fetch_positions(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Position>, BrokerError>> + Send + '_>> {
        Box::pin(async move {
            let body: Value = self
                .request(reqwest::Method::GET, "/Orders/2.0/quick/user/positions")
                .send()
                .await?
                .json()
                .await?;

            let rows = body
                .pointer("/data")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();

            Ok(rows.iter().filter_map(parse_position).collect())
        })
    }

    fn fetch_orders(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Order>, BrokerError>> + Send + '_>> {
        Box::pin(async move {
            let body: Value = self
                .request(reqwest::Method::GET, "/Orders/2.0/quick/user/orders")
                .send()
                .await?
                .json()
                .await?;

            let rows = body
                .pointer("/data")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();

            Ok(rows.iter().map(parse_order).collect())
        })
    }

    fn fetch_quotes<'a>(
        &'a self,
        queries: &'a [QuoteQuery],
    ) -> Pin<Box<dyn Future<Output = Result<QuoteMap, BrokerError>> + Send + 'a>> {
        Box::pin(async move {
            if queries.is_empty() {
                return Ok(QuoteMap::new());
            }

            let instruments: Vec<Value> = queries
                .iter()
                .map(|q| {
                    json!({
                        "instrument_token": q.token,
                        "exchange_segment": q.segment,
                    })
                })
                .collect();

            let body: Value = self
                .request(reqwest::Method::POST, "/script/1.0/quotes/ltp")
                .json(&json!({ "instrument_tokens": instruments }))
                .send()
                .await?
                .json()
                .await?;

            // Standard responses carry `message`; some gateway versions use
            // `data` instead.
            let rows = body
                .pointer("/message")
                .or_else(|| body.pointer("/data"))
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();

            let mut quotes = QuoteMap::new();
            for item in &rows {
                let token = item
                    .pointer("/instrument_token")
                    .map(coerce_string)
                    .unwrap_or_default();
                if token.is_empty() {
                    continue;
                }
                let ltp = item.pointer("/last_traded_price").map(num).unwrap_or(0.0);
                quotes.insert(token, ltp);
            }
            Ok(quotes)
        })
    }

    fn place_market_exit<'a>(
        &'a self,
        position: &'a Position,
        side: OrderSide,
        qty: i64,
    ) -> Pin<Box<dyn Future<Output = Result<OrderAck, BrokerError>> + Send + 'a>> {
        Box::pin(async move {
            let body: Value = self
                .request(reqwest::Method::POST, "/Orders/2.0/quick/order/rule/ms/place")
                .json(&json!({
                    "exchange_segment": position.segment,
                    "product": position.product,
                    "price": "0",
                    "order_type": "MKT",
                    "quantity": qty.to_string(),
                    "validity": "DAY",
                    "trading_symbol": position.symbol,
                    "transaction_type": side.code(),
                    "amo": "NO",
                }))
                .send()
                .await?
                .json()
                .await?;

            let stat = string_field(&body, "/stat").unwrap_or_default();
            if stat != "Ok" {
                warn!("Exit order rejected for {}: {}", position.symbol, body);
                return Err(BrokerError::OrderRejected(body.to_string()));
            }

            Ok(OrderAck {
                order_id: string_field(&body, "/nOrdNo").unwrap_or_default(),
                status: stat,
            })
        })
    }
}

// ========== Wire parsing ==========

/// Coerce a JSON value that may be a number, a numeric string, or absent.
fn num(v: &Value) -> f64 {
    match v {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn field_num(row: &Value, key: &str) -> f64 {
    row.get(key).map(num).unwrap_or(0.0)
}

fn coerce_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

fn field_str(row: &Value, key: &str) -> String {
    row.get(key).map(coerce_string).unwrap_or_default()
}

fn string_field(body: &Value, pointer: &str) -> Option<String> {
    body.pointer(pointer).map(coerce_string).filter(|s| !s.is_empty())
}

/// Parse one raw position row. Rows with no activity at all are dropped.
pub(crate) fn parse_position(row: &Value) -> Option<Position> {
    let token = field_str(row, "tok");
    let segment = {
        let s = field_str(row, "exSeg");
        if s.is_empty() {
            "nse_fo".to_string()
        } else {
            s
        }
    };
    let symbol = field_str(row, "trdSym");
    let lot_size = field_num(row, "lotSz").max(0.0);
    let multiplier = {
        let m = field_num(row, "multiplier");
        if m == 0.0 {
            1.0
        } else {
            m
        }
    };

    let ratio = |num_key: &str, den_key: &str| {
        let n = field_num(row, num_key);
        let d = field_num(row, den_key);
        if n == 0.0 || d == 0.0 {
            1.0
        } else {
            n / d
        }
    };
    let price_factor = ratio("genNum", "genDen") * ratio("prcNum", "prcDen");

    let mut fl_buy = field_num(row, "flBuyQty");
    let mut fl_sell = field_num(row, "flSellQty");
    let mut cf_buy = field_num(row, "cfBuyQty");
    let mut cf_sell = field_num(row, "cfSellQty");

    // Derivative segments report lot-scaled quantities.
    if !segment.to_lowercase().contains("cm") && lot_size > 0.0 {
        fl_buy /= lot_size;
        fl_sell /= lot_size;
        cf_buy /= lot_size;
        cf_sell /= lot_size;
    }

    let total_buy_qty = cf_buy + fl_buy;
    let total_sell_qty = cf_sell + fl_sell;
    let net_qty = (total_buy_qty - total_sell_qty).round() as i64;

    let total_buy_amt = field_num(row, "cfBuyAmt") + field_num(row, "buyAmt");
    let total_sell_amt = field_num(row, "cfSellAmt") + field_num(row, "sellAmt");

    if total_buy_qty == 0.0 && total_sell_qty == 0.0 && net_qty == 0 {
        return None;
    }

    Some(Position {
        token,
        segment,
        symbol,
        net_qty,
        total_buy_amt,
        total_sell_amt,
        multiplier,
        price_factor,
        lot_size,
        product: {
            let p = field_str(row, "prod");
            if p.is_empty() {
                "NRML".to_string()
            } else {
                p
            }
        },
    })
}

/// Parse one raw order-report row.
pub(crate) fn parse_order(row: &Value) -> Order {
    let side = if field_str(row, "trnsTp").to_uppercase() == "B" {
        OrderSide::Buy
    } else {
        OrderSide::Sell
    };

    Order {
        order_id: field_str(row, "nOrdNo"),
        status: field_str(row, "ordSt").to_uppercase(),
        order_type: field_str(row, "prcTp").to_uppercase(),
        side,
        token: field_str(row, "tok"),
        symbol: field_str(row, "trdSym"),
        qty: field_num(row, "qty").round() as i64,
        filled_qty: field_num(row, "fldQty").round() as i64,
    }
}

// ========== TOTP + device id ==========

type HmacSha256 = Hmac<Sha256>;

/// RFC-6238 style one-time password over the shared secret, 30 second step.
fn totp_now(secret: &str) -> String {
    let counter = (chrono::Utc::now().timestamp() as u64) / 30;
    totp_at(secret, counter)
}

fn totp_at(secret: &str, counter: u64) -> String {
    let key = decode_base32(secret);
    let mut mac = HmacSha256::new_from_slice(&key).expect("hmac accepts any key size");
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    let offset = (digest[digest.len() - 1] & 0x0f) as usize;
    let code = ((digest[offset] as u32 & 0x7f) << 24)
        | ((digest[offset + 1] as u32) << 16)
        | ((digest[offset + 2] as u32) << 8)
        | digest[offset + 3] as u32;

    format!("{:06}", code % 1_000_000)
}

/// Base32 decode (RFC 4648 alphabet, padding ignored). Invalid characters
/// are skipped the way authenticator apps tolerate spaced secrets.
fn decode_base32(secret: &str) -> Vec<u8> {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";
    let mut bits: u64 = 0;
    let mut bit_count = 0;
    let mut out = Vec::new();

    for c in secret.to_uppercase().bytes() {
        let Some(value) = ALPHABET.iter().position(|&a| a == c) else {
            continue;
        };
        bits = (bits << 5) | value as u64;
        bit_count += 5;
        if bit_count >= 8 {
            bit_count -= 8;
            out.push(((bits >> bit_count) & 0xff) as u8);
        }
    }
    out
}

/// Stable per-installation device id derived from the consumer key.
fn device_fingerprint(consumer_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(consumer_key.as_bytes());
    hex::encode(&hasher.finalize()[..16])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_position_lot_adjusted() {
        let row = json!({
            "tok": "53825",
            "exSeg": "nse_fo",
            "trdSym": "NIFTY25AUG24800PE",
            "lotSz": "25",
            "multiplier": "1",
            "genNum": "1", "genDen": "1", "prcNum": "1", "prcDen": "1",
            "flBuyQty": "0", "flSellQty": "25",
            "cfBuyQty": "0", "cfSellQty": "0",
            "buyAmt": "0", "sellAmt": "3125.50",
            "cfBuyAmt": "0", "cfSellAmt": "0",
            "prod": "NRML"
        });

        let pos = parse_position(&row).unwrap();
        assert_eq!(pos.net_qty, -1);
        assert_eq!(pos.total_sell_amt, 3125.50);
        assert_eq!(pos.lot_size, 25.0);
        assert_eq!(pos.product, "NRML");
    }

    #[test]
    fn test_parse_position_drops_dead_rows() {
        let row = json!({
            "tok": "1", "exSeg": "nse_fo", "trdSym": "X", "lotSz": "25",
            "flBuyQty": "0", "flSellQty": "0", "cfBuyQty": "0", "cfSellQty": "0",
            "buyAmt": "0", "sellAmt": "0", "cfBuyAmt": "0", "cfSellAmt": "0"
        });
        assert!(parse_position(&row).is_none());
    }

    #[test]
    fn test_parse_position_equity_unscaled() {
        let row = json!({
            "tok": "11536", "exSeg": "nse_cm", "trdSym": "TCS-EQ", "lotSz": "1",
            "flBuyQty": "10", "flSellQty": "0", "cfBuyQty": "0", "cfSellQty": "0",
            "buyAmt": "35000", "sellAmt": "0", "cfBuyAmt": "0", "cfSellAmt": "0"
        });
        let pos = parse_position(&row).unwrap();
        assert_eq!(pos.net_qty, 10);
    }

    #[test]
    fn test_parse_order_normalizes_case() {
        let row = json!({
            "nOrdNo": "240808000012345",
            "ordSt": "complete",
            "prcTp": "sl-m",
            "trnsTp": "b",
            "trdSym": "NIFTY25AUG24800PE",
            "tok": "53825",
            "qty": "50",
            "fldQty": "50"
        });

        let order = parse_order(&row);
        assert_eq!(order.status, "COMPLETE");
        assert_eq!(order.order_type, "SL-M");
        assert_eq!(order.side, OrderSide::Buy);
        assert!(order.is_fully_filled());
    }

    #[test]
    fn test_totp_is_six_digits_and_deterministic() {
        let a = totp_at("TRC5ARJYNMHYD7WNCJIR4RMOXE", 12345);
        let b = totp_at("TRC5ARJYNMHYD7WNCJIR4RMOXE", 12345);
        let c = totp_at("TRC5ARJYNMHYD7WNCJIR4RMOXE", 12346);
        assert_eq!(a.len(), 6);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.chars().all(|ch| ch.is_ascii_digit()));
    }

    #[test]
    fn test_base32_decode_tolerates_spacing() {
        assert_eq!(decode_base32("MZXW6YTB"), b"fooba");
        assert_eq!(decode_base32("mzxw 6ytb"), b"fooba");
    }

    #[test]
    fn test_device_fingerprint_stable() {
        let a = device_fingerprint("key-1");
        assert_eq!(a, device_fingerprint("key-1"));
        assert_ne!(a, device_fingerprint("key-2"));
        assert_eq!(a.len(), 32);
    }
}
