pub mod advice;
pub mod decision;
pub mod engine;
pub mod market_data;
pub mod option_chain;
pub mod orders;
pub mod outbox;
pub mod risk;
pub mod sentiment;
pub mod signals;
pub mod system;
pub mod token_refresh;
