// src/lib.rs
pub mod backpressure;
pub mod channel;
pub mod config;
pub mod metrics;
pub mod scheduler;
pub mod server;
pub mod transport;
