//! Prometheus metrics for the engine. All collectors use the `optra_`
//! prefix and are push-reported (text encoding via [`Metrics::gather`]).

use prometheus::{
    CounterVec, Gauge, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
    core::{AtomicF64, GenericGauge},
};
use std::sync::Arc;

#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    /// Engine ticks executed, by outcome (ok / skipped / error).
    pub engine_ticks_total: CounterVec,
    /// Orders by side and outcome.
    pub orders_total: CounterVec,
    /// Risk gate blocks by reason.
    pub risk_blocks_total: CounterVec,
    /// Advices by lifecycle event.
    pub advices_total: CounterVec,
    /// Broker API latency in seconds, by operation.
    pub api_latency_seconds: HistogramVec,
    /// Data-quality anomalies recorded, by kind.
    pub data_anomalies_total: CounterVec,
    /// Latest blended sentiment score (0-100).
    pub sentiment_score: GenericGauge<AtomicF64>,
    /// Latest 5-minute regime (-1 bearish, 0 neutral, +1 bullish).
    pub regime_gauge: GenericGauge<AtomicF64>,
    /// Trading circuit breaker (0 = closed, 1 = tripped).
    pub circuit_tripped: GenericGauge<AtomicF64>,
    /// Unpublished outbox rows observed at the last relay poll.
    pub outbox_backlog: GenericGauge<AtomicF64>,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let engine_ticks_total = CounterVec::new(
            Opts::new("optra_engine_ticks_total", "Engine ticks by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(engine_ticks_total.clone()))?;

        let orders_total = CounterVec::new(
            Opts::new("optra_orders_total", "Orders by side and outcome"),
            &["side", "outcome"],
        )?;
        registry.register(Box::new(orders_total.clone()))?;

        let risk_blocks_total = CounterVec::new(
            Opts::new("optra_risk_blocks_total", "Risk gate blocks by reason"),
            &["reason"],
        )?;
        registry.register(Box::new(risk_blocks_total.clone()))?;

        let advices_total = CounterVec::new(
            Opts::new("optra_advices_total", "Advice lifecycle events"),
            &["event"],
        )?;
        registry.register(Box::new(advices_total.clone()))?;

        let api_latency_seconds = HistogramVec::new(
            HistogramOpts::new("optra_api_latency_seconds", "Broker API latency")
                .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
            &["operation"],
        )?;
        registry.register(Box::new(api_latency_seconds.clone()))?;

        let data_anomalies_total = CounterVec::new(
            Opts::new("optra_data_anomalies_total", "Data quality anomalies"),
            &["kind"],
        )?;
        registry.register(Box::new(data_anomalies_total.clone()))?;

        let sentiment_score = Gauge::with_opts(Opts::new(
            "optra_sentiment_score",
            "Latest blended sentiment (0-100)",
        ))?;
        registry.register(Box::new(sentiment_score.clone()))?;

        let regime_gauge = Gauge::with_opts(Opts::new(
            "optra_regime",
            "Latest 5m regime (-1 bearish, 0 neutral, +1 bullish)",
        ))?;
        registry.register(Box::new(regime_gauge.clone()))?;

        let circuit_tripped = Gauge::with_opts(Opts::new(
            "optra_circuit_tripped",
            "Trading circuit breaker (0 closed, 1 tripped)",
        ))?;
        registry.register(Box::new(circuit_tripped.clone()))?;

        let outbox_backlog = Gauge::with_opts(Opts::new(
            "optra_outbox_backlog",
            "Unpublished outbox rows at last poll",
        ))?;
        registry.register(Box::new(outbox_backlog.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            engine_ticks_total,
            orders_total,
            risk_blocks_total,
            advices_total,
            api_latency_seconds,
            data_anomalies_total,
            sentiment_score,
            regime_gauge,
            circuit_tripped,
            outbox_backlog,
        })
    }

    /// Encode all collectors in Prometheus text format.
    pub fn gather(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        Ok(encoder.encode_to_string(&self.registry.gather())?)
    }
}
