//! Risk-gate and outbox scenarios: order-rate throttling, idempotent
//! replay, market-hours boundaries and at-least-once publication.

mod common;

use common::{UNDERLYING, seed_bullish_world, world};
use chrono::{TimeZone, Utc};
use optra::domain::errors::ErrorKind;
use optra::domain::outbox::topics;
use optra::domain::ports::Clock;
use optra::domain::repositories::{OutboxRepository, RiskRepository};
use optra::domain::risk::RiskConfig;
use optra::domain::types::TxnType;
use optra::infrastructure::mock::fixtures;
use std::time::Duration;

/// With `orders_per_min_cap = 3` and three placements
/// inside the window, the fourth intent is blocked with RATE_LIMIT, a
/// breached risk event is written and no broker call is made.
#[tokio::test]
async fn test_rate_limit_blocks_fourth_order() {
    let w = world();
    let mut config = RiskConfig::defaults(w.clock.now());
    config.orders_per_min_cap = 3;
    w.risk_repo.save_config(&config).await.unwrap();

    for i in 0..3i64 {
        let mut req = fixtures::market_order("NSE_FO|54321", "NIFTY24500CE", TxnType::Buy, 75 + i);
        req.advice_id = Some(format!("advice-{}", i));
        w.orders.place_order(&req).await.unwrap();
    }
    assert_eq!(w.gateway.placed_orders().await.len(), 3);

    let fourth = fixtures::market_order("NSE_FO|54321", "NIFTY24500CE", TxnType::Buy, 99);
    let err = w.orders.place_order(&fourth).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RateLimit);

    // Exactly one breached event, typed RATE_LIMIT.
    let events = w
        .risk_repo
        .events_since(w.clock.now() - chrono::Duration::hours(1))
        .await
        .unwrap();
    let breaches: Vec<_> = events.iter().filter(|e| e.breached).collect();
    assert_eq!(breaches.len(), 1);
    assert_eq!(breaches[0].event_type, ErrorKind::RateLimit);

    // Broker untouched by the blocked intent.
    assert_eq!(w.gateway.placed_orders().await.len(), 3);

    // The counter rolls exactly 60 s after the first increment.
    w.clock.advance(Duration::from_secs(61));
    assert!(w.orders.place_order(&fourth).await.is_ok());
}

/// The same canonical request twice inside 10 s.
/// First placement succeeds; the replay reports DUPLICATE and places
/// nothing.
#[tokio::test]
async fn test_idempotent_replay() {
    let w = world();
    let req = fixtures::market_order("NSE_FO|54321", "NIFTY24500CE", TxnType::Buy, 75);

    let first = w.orders.place_order(&req).await.unwrap();
    assert_eq!(first.order_ids.len(), 1);

    w.clock.advance(Duration::from_secs(10));
    let err = w.orders.place_order(&req).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Duplicate);
    assert_eq!(w.gateway.placed_orders().await.len(), 1);
}

/// Market-hours boundary: 15:30:00 IST places, 15:30:01 IST is closed
/// unless the request is AMO.
#[tokio::test]
async fn test_market_close_boundary() {
    let w = world();

    // 15:30:00 IST == 10:00:00 UTC: still open (inclusive).
    w.clock
        .set(Utc.with_ymd_and_hms(2026, 7, 29, 10, 0, 0).unwrap());
    let req = fixtures::market_order("NSE_FO|54321", "NIFTY24500CE", TxnType::Buy, 75);
    assert!(w.orders.place_order(&req).await.is_ok());

    // One second later: closed.
    w.clock
        .set(Utc.with_ymd_and_hms(2026, 7, 29, 10, 0, 1).unwrap());
    let mut late = fixtures::market_order("NSE_FO|54321", "NIFTY24500CE", TxnType::Sell, 75);
    let err = w.orders.place_order(&late).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MarketClosed);

    // AMO passes after close.
    late.is_amo = true;
    assert!(w.orders.place_order(&late).await.is_ok());
}

/// Outbox at-least-once: rows drain onto the bus in insertion order and
/// are marked exactly once; replaying the executed advice creates no
/// duplicate order.
#[tokio::test]
async fn test_outbox_at_least_once_and_advice_idempotence() {
    let w = world();
    seed_bullish_world(&w).await;

    let advice = w
        .decision
        .generate_advice()
        .await
        .unwrap()
        .expect("advice expected");
    let executed = w.advice.execute(&advice.id).await.unwrap();

    let mut rx = w.bus.subscribe();
    let drained = w.relay.drain_once().await.unwrap();
    assert!(drained >= 3);

    let mut order_events = 0;
    for _ in 0..drained {
        let ev = rx.recv().await.unwrap();
        if ev.topic == topics::ORDER {
            order_events += 1;
            // Routing key follows the symbol-first rule.
            assert_eq!(ev.key, executed.symbol);
        }
    }
    assert_eq!(order_events, 1);

    // Nothing left: each row marked exactly once.
    assert_eq!(w.relay.drain_once().await.unwrap(), 0);
    assert!(w.outbox.fetch_unpublished(10).await.unwrap().is_empty());

    // Replayed execution: same terminal state, no extra broker order,
    // no extra outbox rows.
    let replayed = w.advice.execute(&advice.id).await.unwrap();
    assert_eq!(replayed.status, executed.status);
    assert_eq!(replayed.broker_order_id, executed.broker_order_id);
    assert_eq!(w.gateway.placed_orders().await.len(), 1);
    assert!(w.outbox.fetch_unpublished(10).await.unwrap().is_empty());
}

/// A circuit trip from sustained losses halts the engine tick and blocks
/// new placements until the IST-midnight reset.
#[tokio::test]
async fn test_daily_loss_trips_circuit_and_resets_next_day() {
    let w = world();
    seed_bullish_world(&w).await;
    w.engine.start();

    w.risk
        .note_realized_pnl(rust_decimal::Decimal::from(-25_000))
        .await;

    w.engine.tick().await;
    assert!(w.gateway.placed_orders().await.is_empty());
    assert_eq!(
        w.engine.last_error().await.as_deref(),
        Some("circuit breaker lockout")
    );

    let req = fixtures::market_order("NSE_FO|54321", "NIFTY24500CE", TxnType::Buy, 75);
    let err = w.orders.place_order(&req).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CircuitLockout);

    // Next IST day, 10:30 IST: the circuit has reset and flow resumes.
    w.clock
        .set(Utc.with_ymd_and_hms(2026, 7, 30, 5, 0, 0).unwrap());
    assert!(w.orders.place_order(&req).await.is_ok());
}

/// Momentum needs ten closes: nine valid bars surface NOT_FOUND.
#[tokio::test]
async fn test_momentum_minimum_window() {
    let w = world();
    let t0 = common::market_open_instant() - chrono::Duration::minutes(60);
    let candles: Vec<_> = (0..9)
        .map(|i| {
            fixtures::candle(
                UNDERLYING,
                t0 + chrono::Duration::minutes(5 * i),
                rust_decimal_macros::dec!(100),
                rust_decimal_macros::dec!(101),
                rust_decimal_macros::dec!(99),
                rust_decimal_macros::dec!(100),
            )
        })
        .collect();
    w.gateway
        .set_candles(UNDERLYING, optra::domain::market::Timeframe::FiveMin, candles)
        .await;

    let err = w
        .market_data
        .get_momentum_on(UNDERLYING, optra::domain::market::Timeframe::FiveMin)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}
