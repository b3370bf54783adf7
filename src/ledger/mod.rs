pub mod rules;
pub mod service;
pub mod state;
