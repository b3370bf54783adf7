pub mod handlers;
pub mod listener;
pub mod metrics;
pub mod types;
pub mod worker;
