pub mod api;
pub mod config;
pub mod contracts;
pub mod flusher;
pub mod metrics;
pub mod server;
pub mod storage;
pub mod upstream;
