pub mod service;
pub mod sku;
