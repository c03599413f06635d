// src/metrics/mod.rs
mod collector;

pub use collector::{AcceptorMetrics, MetricsRegistry};
