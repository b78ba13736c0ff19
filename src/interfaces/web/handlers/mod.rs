pub mod admin;
pub mod agents;
pub mod credentials;
pub mod executions;
pub mod providers;
