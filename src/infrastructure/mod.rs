pub mod event_bus;
pub mod memory_store;
pub mod mock;
pub mod observability;
pub mod persistence;
pub mod repositories;
pub mod sentiment;
pub mod upstox;
