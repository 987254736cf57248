pub mod analyzer;
pub mod news_rss;
pub mod social_api;

pub use news_rss::RssNewsSentimentProvider;
pub use social_api::SocialApiSentimentProvider;
