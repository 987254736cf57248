pub mod advice;
pub mod errors;
pub mod market;
pub mod market_hours;
pub mod option_chain;
pub mod order;
pub mod outbox;
pub mod ports;
pub mod repositories;
pub mod risk;
pub mod sentiment;
pub mod signal;
pub mod types;
