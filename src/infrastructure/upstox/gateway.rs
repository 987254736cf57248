use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::market::{Candle, Ohlc, OhlcQuote, Timeframe};
use crate::domain::option_chain::{Greeks, OptionLeg, OptionType};
use crate::domain::order::{
    CancelOrderResponse, ModifyOrderRequest, ModifyOrderResponse, Order, OrderStatus,
    PlaceOrderRequest, PlaceOrderResponse,
};
use crate::domain::ports::BrokerGateway;
use crate::domain::types::{OrderType, Product, TxnType, Validity};
use crate::infrastructure::upstox::common::UpstoxGateway;
use crate::infrastructure::upstox::session::SessionState;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Instant;
use tracing::{info, warn};

fn value_decimal(v: &Value) -> Option<Decimal> {
    match v {
        Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        Value::String(s) => Decimal::from_str(s).ok(),
        _ => None,
    }
}

fn value_f64(v: &Value) -> f64 {
    v.as_f64()
        .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
        .unwrap_or(0.0)
}

fn value_ts(v: &Value) -> Option<DateTime<Utc>> {
    match v {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| chrono::TimeZone::timestamp_millis_opt(&Utc, ms).single()),
        _ => None,
    }
}

/// Candle row layout on the wire: `[ts, open, high, low, close, volume, oi?]`,
/// newest first. The gateway returns them oldest first.
fn parse_candle_rows(symbol: &str, data: &Value) -> Vec<Candle> {
    let rows = data
        .get("candles")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let mut candles: Vec<Candle> = rows
        .iter()
        .filter_map(|row| {
            let row = row.as_array()?;
            Some(Candle {
                symbol: symbol.to_string(),
                open_time: value_ts(row.first()?)?,
                open: value_decimal(row.get(1)?)?,
                high: value_decimal(row.get(2)?)?,
                low: value_decimal(row.get(3)?)?,
                close: value_decimal(row.get(4)?)?,
                volume: row.get(5).and_then(Value::as_i64).unwrap_or(0),
            })
        })
        .collect();
    candles.sort_by_key(|c| c.open_time);
    candles
}

fn parse_order(data: &Value) -> EngineResult<Order> {
    let order_id = data
        .get("order_id")
        .and_then(Value::as_str)
        .ok_or_else(|| EngineError::broker("order payload missing order_id"))?;
    let status = match data
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or("open")
        .to_uppercase()
        .as_str()
    {
        "COMPLETE" => OrderStatus::Complete,
        "CANCELLED" => OrderStatus::Cancelled,
        "REJECTED" => OrderStatus::Rejected,
        "PARTIAL" | "PARTIALLY_FILLED" => OrderStatus::Partial,
        _ => OrderStatus::Open,
    };
    let str_of = |field: &str| {
        data.get(field)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    let qty = data.get("quantity").and_then(Value::as_i64).unwrap_or(0);
    let filled_qty = data
        .get("filled_quantity")
        .and_then(Value::as_i64)
        .unwrap_or(0);
    Ok(Order {
        broker_order_id: order_id.to_string(),
        parent_order_id: data
            .get("parent_order_id")
            .and_then(Value::as_str)
            .map(String::from),
        advice_id: data.get("tag").and_then(Value::as_str).map(String::from),
        instrument_token: str_of("instrument_token"),
        symbol: str_of("trading_symbol"),
        order_type: OrderType::from_str(&str_of("order_type")).unwrap_or(OrderType::Market),
        txn_type: TxnType::from_str(&str_of("transaction_type")).unwrap_or(TxnType::Buy),
        qty,
        filled_qty,
        pending_qty: data
            .get("pending_quantity")
            .and_then(Value::as_i64)
            .unwrap_or(qty - filled_qty),
        product: Product::from_str(&str_of("product")).unwrap_or(Product::Mis),
        validity: if str_of("validity") == "IOC" {
            Validity::Ioc
        } else {
            Validity::Day
        },
        price: data.get("price").and_then(value_decimal),
        trigger_price: data.get("trigger_price").and_then(value_decimal),
        status,
        average_price: data.get("average_price").and_then(value_decimal),
        message: data
            .get("status_message")
            .and_then(Value::as_str)
            .map(String::from),
        placed_at: data
            .get("order_timestamp")
            .and_then(value_ts)
            .unwrap_or_else(Utc::now),
        updated_at: Utc::now(),
        exchange_ts: data.get("exchange_timestamp").and_then(value_ts),
    })
}

fn parse_chain_leg(underlying: &str, row: &Value, side: OptionType) -> Option<OptionLeg> {
    let node = row.get(match side {
        OptionType::Ce => "call_options",
        OptionType::Pe => "put_options",
    })?;
    let market = node.get("market_data").unwrap_or(&Value::Null);
    let greeks_node = node.get("option_greeks").unwrap_or(&Value::Null);
    let expiry = row
        .get("expiry")
        .and_then(Value::as_str)
        .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())?;
    Some(OptionLeg {
        instrument_key: node
            .get("instrument_key")
            .and_then(Value::as_str)?
            .to_string(),
        symbol: format!(
            "{}{}{}",
            underlying.rsplit('|').next().unwrap_or(underlying),
            row.get("strike_price").map(value_f64).unwrap_or(0.0) as i64,
            side
        ),
        strike: row.get("strike_price").and_then(value_decimal)?,
        option_type: side,
        expiry,
        oi: market.get("oi").map(value_f64).unwrap_or(0.0),
        volume: market.get("volume").map(value_f64).unwrap_or(0.0),
        ltp: market.get("ltp").and_then(value_decimal),
        greeks: Some(Greeks {
            delta: greeks_node.get("delta").map(value_f64).unwrap_or(0.0),
            gamma: greeks_node.get("gamma").map(value_f64).unwrap_or(0.0),
            theta: greeks_node.get("theta").map(value_f64).unwrap_or(0.0),
            vega: greeks_node.get("vega").map(value_f64).unwrap_or(0.0),
            rho: greeks_node.get("rho").map(value_f64).unwrap_or(0.0),
            iv: greeks_node.get("iv").map(value_f64).unwrap_or(0.0),
        }),
    })
}

fn intraday_path(key: &str, timeframe: Timeframe) -> String {
    format!(
        "/v3/historical-candle/intraday/{}/{}/{}",
        key,
        timeframe.unit(),
        timeframe.interval()
    )
}

#[async_trait]
impl BrokerGateway for UpstoxGateway {
    async fn place_order(&self, req: &PlaceOrderRequest) -> EngineResult<PlaceOrderResponse> {
        req.validate()?;
        let started = Instant::now();
        let body = json!({
            "instrument_token": req.instrument_token,
            "transaction_type": req.txn_type.to_string(),
            "order_type": req.order_type.as_broker_str(),
            "quantity": req.quantity,
            "product": req.product.to_string(),
            "validity": req.validity.to_string(),
            "price": req.price.map(|p| p.to_string()),
            "trigger_price": req.trigger_price.map(|p| p.to_string()),
            "is_amo": req.is_amo,
            "slice": req.slice,
            "tag": req.tag,
            "disclosed_quantity": req.disclosed_quantity,
        });
        let data = self.post_data("/v2/order/place", body).await?;

        let order_ids: Vec<String> = match data.get("order_ids").and_then(Value::as_array) {
            Some(ids) => ids
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect(),
            None => data
                .get("order_id")
                .and_then(Value::as_str)
                .map(|id| vec![id.to_string()])
                .unwrap_or_default(),
        };
        if order_ids.is_empty() {
            return Err(EngineError::broker("order placed but no order id returned"));
        }
        info!("UpstoxGateway: placed order(s) {:?}", order_ids);
        Ok(PlaceOrderResponse {
            order_ids,
            latency_ms: started.elapsed().as_millis() as i64,
        })
    }

    async fn modify_order(&self, req: &ModifyOrderRequest) -> EngineResult<ModifyOrderResponse> {
        req.validate()?;
        let started = Instant::now();
        let body = json!({
            "order_id": req.order_id,
            "quantity": req.quantity,
            "price": req.price.map(|p| p.to_string()),
            "trigger_price": req.trigger_price.map(|p| p.to_string()),
            "order_type": req.order_type.map(|t| t.as_broker_str()),
            "validity": req.validity.map(|v| v.to_string()),
        });
        let data = self.post_data("/v2/order/modify", body).await?;
        let order_id = data
            .get("order_id")
            .and_then(Value::as_str)
            .unwrap_or(&req.order_id)
            .to_string();
        Ok(ModifyOrderResponse {
            order_id,
            latency_ms: started.elapsed().as_millis() as i64,
        })
    }

    async fn cancel_order(&self, order_id: &str) -> EngineResult<CancelOrderResponse> {
        let started = Instant::now();
        let data = self
            .delete_data("/v2/order/cancel", &[("order_id", order_id.to_string())])
            .await?;
        let order_id = data
            .get("order_id")
            .and_then(Value::as_str)
            .unwrap_or(order_id)
            .to_string();
        Ok(CancelOrderResponse {
            order_id,
            latency_ms: started.elapsed().as_millis() as i64,
        })
    }

    async fn get_order_details(&self, order_id: &str) -> EngineResult<Order> {
        let data = self
            .get_data("/v2/order/details", &[("order_id", order_id.to_string())])
            .await?;
        parse_order(&data)
    }

    async fn get_order_history(
        &self,
        order_id: Option<&str>,
        tag: Option<&str>,
    ) -> EngineResult<Vec<Order>> {
        let mut params: Vec<(&str, String)> = Vec::new();
        if let Some(id) = order_id {
            params.push(("order_id", id.to_string()));
        }
        if let Some(tag) = tag {
            params.push(("tag", tag.to_string()));
        }
        let data = self.get_data("/v2/order/history", &params).await?;
        let rows = data.as_array().cloned().unwrap_or_default();
        Ok(rows.iter().filter_map(|r| parse_order(r).ok()).collect())
    }

    async fn is_order_working(&self, order_id: &str) -> EngineResult<bool> {
        let order = self.get_order_details(order_id).await?;
        Ok(matches!(order.status, OrderStatus::Open | OrderStatus::Partial))
    }

    async fn get_ltp_quote(&self, keys: &[String]) -> EngineResult<HashMap<String, Decimal>> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }
        let data = self
            .get_data(
                "/v2/market-quote/ltp",
                &[("instrument_key", keys.join(","))],
            )
            .await?;
        let mut out = HashMap::new();
        if let Some(map) = data.as_object() {
            for entry in map.values() {
                // The response is keyed by exchange symbol; the stable join
                // key is the instrument_token echoed in each entry.
                let token = entry
                    .get("instrument_token")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                if let Some(price) = entry.get("last_price").and_then(value_decimal) {
                    out.insert(token.to_string(), price);
                }
            }
        }
        Ok(out)
    }

    async fn get_market_ohlc_quote(
        &self,
        key: &str,
        timeframe: Timeframe,
    ) -> EngineResult<OhlcQuote> {
        let interval = match timeframe {
            Timeframe::OneDay => "1d".to_string(),
            tf => format!("I{}", tf.minutes()),
        };
        let data = self
            .get_data(
                "/v2/market-quote/ohlc",
                &[
                    ("instrument_key", key.to_string()),
                    ("interval", interval),
                ],
            )
            .await?;
        let entry = data
            .as_object()
            .and_then(|map| map.values().next())
            .ok_or_else(|| EngineError::not_found(format!("ohlc quote for {}", key)))?;

        let bar_of = |node: &Value| -> Option<Ohlc> {
            Some(Ohlc {
                open: node.get("open").and_then(value_decimal)?,
                high: node.get("high").and_then(value_decimal)?,
                low: node.get("low").and_then(value_decimal)?,
                close: node.get("close").and_then(value_decimal)?,
                volume: node.get("volume").and_then(Value::as_i64).unwrap_or(0),
                ts: node
                    .get("ts")
                    .and_then(value_ts)
                    .unwrap_or_else(|| self.clock.now()),
            })
        };

        let live = entry.get("live_ohlc").and_then(|n| bar_of(n));
        let prev = entry.get("prev_ohlc").and_then(|n| bar_of(n));
        let main = entry
            .get("ohlc")
            .and_then(|n| bar_of(n))
            .or_else(|| live.clone())
            .ok_or_else(|| EngineError::not_found(format!("ohlc quote for {}", key)))?;

        Ok(OhlcQuote {
            ohlc: main,
            prev_ohlc: prev,
            live_ohlc: live,
        })
    }

    async fn get_intraday_candles(
        &self,
        key: &str,
        timeframe: Timeframe,
    ) -> EngineResult<Vec<Candle>> {
        let data = self.get_data(&intraday_path(key, timeframe), &[]).await?;
        let candles = parse_candle_rows(key, &data);
        if candles.is_empty() {
            warn!("UpstoxGateway: no intraday candles for {}", key);
        }
        Ok(candles)
    }

    async fn get_historical_candles(
        &self,
        key: &str,
        timeframe: Timeframe,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> EngineResult<Vec<Candle>> {
        let path = format!(
            "/v3/historical-candle/{}/{}/{}/{}/{}",
            key,
            timeframe.unit(),
            timeframe.interval(),
            to.format("%Y-%m-%d"),
            from.format("%Y-%m-%d"),
        );
        let data = self.get_data(&path, &[]).await?;
        Ok(parse_candle_rows(key, &data))
    }

    async fn get_option_instruments(
        &self,
        underlying: &str,
        expiry: Option<NaiveDate>,
    ) -> EngineResult<Vec<OptionLeg>> {
        let mut params = vec![("instrument_key", underlying.to_string())];
        if let Some(expiry) = expiry {
            params.push(("expiry_date", expiry.format("%Y-%m-%d").to_string()));
        }
        let data = self.get_data("/v2/option/chain", &params).await?;
        let rows = data.as_array().cloned().unwrap_or_default();
        let mut legs = Vec::with_capacity(rows.len() * 2);
        for row in &rows {
            if let Some(leg) = parse_chain_leg(underlying, row, OptionType::Ce) {
                legs.push(leg);
            }
            if let Some(leg) = parse_chain_leg(underlying, row, OptionType::Pe) {
                legs.push(leg);
            }
        }
        Ok(legs)
    }

    async fn get_option_greeks(&self, keys: &[String]) -> EngineResult<HashMap<String, Greeks>> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }
        let data = self
            .get_data(
                "/v2/market-quote/option-greek",
                &[("instrument_key", keys.join(","))],
            )
            .await?;
        let mut out = HashMap::new();
        if let Some(map) = data.as_object() {
            for entry in map.values() {
                let token = entry
                    .get("instrument_token")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                out.insert(
                    token.to_string(),
                    Greeks {
                        delta: entry.get("delta").map(value_f64).unwrap_or(0.0),
                        gamma: entry.get("gamma").map(value_f64).unwrap_or(0.0),
                        theta: entry.get("theta").map(value_f64).unwrap_or(0.0),
                        vega: entry.get("vega").map(value_f64).unwrap_or(0.0),
                        rho: entry.get("rho").map(value_f64).unwrap_or(0.0),
                        iv: entry.get("iv").map(value_f64).unwrap_or(0.0),
                    },
                );
            }
        }
        Ok(out)
    }

    async fn get_best_bid_ask(&self, key: &str) -> EngineResult<Option<(Decimal, Decimal)>> {
        let data = self
            .get_data(
                "/v2/market-quote/depth",
                &[("instrument_key", key.to_string())],
            )
            .await?;
        let entry = match data.as_object().and_then(|map| map.values().next()) {
            Some(e) => e.clone(),
            None => return Ok(None),
        };
        let depth = entry.get("depth").unwrap_or(&Value::Null);
        let best = |side: &str| -> Option<Decimal> {
            depth
                .get(side)
                .and_then(Value::as_array)
                .and_then(|rows| rows.first())
                .and_then(|row| row.get("price"))
                .and_then(value_decimal)
        };
        match (best("buy"), best("sell")) {
            (Some(bid), Some(ask)) if bid > Decimal::ZERO && ask > Decimal::ZERO => {
                Ok(Some((bid, ask)))
            }
            _ => Ok(None),
        }
    }

    async fn refresh_access_token(&self) -> EngineResult<()> {
        let refresh_token = self
            .refresh_token
            .clone()
            .ok_or_else(|| EngineError::bad_request("no refresh token configured"))?;
        let envelope = self
            .post_unauthenticated(
                "/v2/login/authorization/refresh",
                &[
                    ("client_id", self.api_key.clone()),
                    ("client_secret", self.api_secret.clone()),
                    ("refresh_token", refresh_token),
                    ("grant_type", "refresh_token".to_string()),
                ],
            )
            .await?;
        let token = envelope
            .get("access_token")
            .or_else(|| envelope.get("data").and_then(|d| d.get("access_token")))
            .and_then(Value::as_str)
            .ok_or_else(|| EngineError::broker("refresh response missing access_token"))?;

        let expires_at = envelope
            .get("expires_in")
            .and_then(Value::as_i64)
            .map(|secs| self.clock.now() + chrono::Duration::seconds(secs));
        *self.session.write().await = SessionState::authenticated(token, expires_at);
        info!("UpstoxGateway: access token refreshed");
        Ok(())
    }

    async fn is_authenticated(&self) -> bool {
        self.session.read().await.is_valid(self.clock.now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_candle_rows_sorts_oldest_first() {
        let data = json!({
            "candles": [
                ["2026-07-29T04:05:00+00:00", 24510.0, 24520.0, 24500.0, 24515.0, 120000, 0],
                ["2026-07-29T04:04:00+00:00", 24500.0, 24512.0, 24495.0, 24510.0, 115000, 0]
            ]
        });
        let candles = parse_candle_rows("NSE_INDEX|Nifty 50", &data);
        assert_eq!(candles.len(), 2);
        assert!(candles[0].open_time < candles[1].open_time);
        assert_eq!(candles[1].close, Decimal::from_str("24515").unwrap());
    }

    #[test]
    fn test_parse_candle_rows_skips_malformed() {
        let data = json!({
            "candles": [
                ["not-a-ts", 1, 2, 3, 4, 5],
                ["2026-07-29T04:04:00+00:00", 24500.0, 24512.0, 24495.0, 24510.0, 115000]
            ]
        });
        assert_eq!(parse_candle_rows("K", &data).len(), 1);
    }

    #[test]
    fn test_parse_order_maps_status() {
        let data = json!({
            "order_id": "231001000000001",
            "status": "complete",
            "instrument_token": "NSE_FO|54321",
            "trading_symbol": "NIFTY24500CE",
            "order_type": "LIMIT",
            "transaction_type": "BUY",
            "quantity": 75,
            "filled_quantity": 75,
            "product": "MIS",
            "validity": "DAY",
            "price": 101.5,
            "average_price": 101.45,
            "order_timestamp": "2026-07-29T04:04:00+00:00"
        });
        let order = parse_order(&data).unwrap();
        assert_eq!(order.status, OrderStatus::Complete);
        assert_eq!(order.qty, 75);
        assert_eq!(order.pending_qty, 0);
        assert_eq!(order.order_type, OrderType::Limit);
    }

    #[test]
    fn test_parse_chain_leg_both_sides() {
        let row = json!({
            "expiry": "2026-08-27",
            "strike_price": 24500.0,
            "call_options": {
                "instrument_key": "NSE_FO|C24500",
                "market_data": {"oi": 1200000.0, "volume": 50000.0, "ltp": 112.5},
                "option_greeks": {"delta": 0.52, "gamma": 0.0009, "theta": -9.4, "vega": 11.2, "rho": 1.1, "iv": 13.4}
            },
            "put_options": {
                "instrument_key": "NSE_FO|P24500",
                "market_data": {"oi": 900000.0, "volume": 42000.0, "ltp": 98.0},
                "option_greeks": {"delta": -0.48, "gamma": 0.0008, "theta": -8.9, "vega": 11.0, "rho": -1.0, "iv": 14.8}
            }
        });
        let ce = parse_chain_leg("NSE_INDEX|Nifty 50", &row, OptionType::Ce).unwrap();
        let pe = parse_chain_leg("NSE_INDEX|Nifty 50", &row, OptionType::Pe).unwrap();
        assert_eq!(ce.option_type, OptionType::Ce);
        assert_eq!(ce.oi, 1_200_000.0);
        assert_eq!(pe.greeks.unwrap().iv, 14.8);
        assert_eq!(ce.expiry, NaiveDate::from_ymd_opt(2026, 8, 27).unwrap());
    }

    #[test]
    fn test_intraday_path_layout() {
        assert_eq!(
            intraday_path("NSE_INDEX|Nifty 50", Timeframe::FiveMin),
            "/v3/historical-candle/intraday/NSE_INDEX|Nifty 50/minutes/5"
        );
    }
}
