pub mod cache;
pub mod config;
pub mod error;
pub mod proxy;
pub mod resolver;
pub mod stream;
