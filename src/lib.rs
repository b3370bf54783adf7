pub mod backend;
pub mod client;
pub mod cmd;
pub mod db;
pub mod events;
pub mod fulfillment;
pub mod ledger;
pub mod orders;
pub mod pubsub;
pub mod utils;
