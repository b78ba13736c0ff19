pub mod config;
pub mod engine;
pub mod execution;
pub mod lifecycle;
pub mod providers;
pub mod store;
pub mod terminal;
pub mod vault;
