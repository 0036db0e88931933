pub mod cache;
pub mod config;
pub mod cycle;
pub mod export;
pub mod notify;
pub mod snapshot;
