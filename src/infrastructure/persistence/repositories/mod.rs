pub mod advice_repository;
pub mod analytics_repository;
pub mod candle_repository;
pub mod order_repository;
pub mod outbox_repository;
pub mod risk_repository;
pub mod sentiment_repository;
pub mod signal_repository;
pub mod tick_repository;

pub use advice_repository::SqliteAdviceRepository;
pub use analytics_repository::SqliteAnalyticsRepository;
pub use candle_repository::SqliteCandleRepository;
pub use order_repository::SqliteOrderRepository;
pub use outbox_repository::SqliteOutboxRepository;
pub use risk_repository::SqliteRiskRepository;
pub use sentiment_repository::SqliteSentimentRepository;
pub use signal_repository::SqliteSignalRepository;
pub use tick_repository::SqliteTickRepository;
