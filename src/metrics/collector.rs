// src/metrics/collector.rs
use anyhow::Result;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use std::sync::Arc;

pub struct MetricsRegistry {
    registry: Registry,
    collector: Arc<AcceptorMetrics>,
}

impl MetricsRegistry {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let collector = Arc::new(AcceptorMetrics::new(&registry)?);

        Ok(Self {
            registry,
            collector,
        })
    }

    pub fn collector(&self) -> Arc<AcceptorMetrics> {
        self.collector.clone()
    }

    pub fn gather(&self) -> Vec<u8> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).unwrap();
        buffer
    }
}

pub struct AcceptorMetrics {
    // Accept cycle metrics
    pub accepted_total: IntCounter,
    pub accept_failures_total: IntCounter,

    // Backpressure metrics
    pub accept_throttled: IntGauge,

    // Channel metrics
    pub channels_active: IntGauge,
}

impl AcceptorMetrics {
    pub fn new(registry: &Registry) -> Result<Self> {
        let accepted_total = IntCounter::new(
            "acceptor_accepted_total",
            "Total number of accepted connections",
        )?;
        registry.register(Box::new(accepted_total.clone()))?;

        let accept_failures_total = IntCounter::new(
            "acceptor_accept_failures_total",
            "Total number of failed accept attempts",
        )?;
        registry.register(Box::new(accept_failures_total.clone()))?;

        let accept_throttled = IntGauge::new(
            "acceptor_accept_throttled",
            "Whether accept reads are currently throttled (1=throttled)",
        )?;
        registry.register(Box::new(accept_throttled.clone()))?;

        let channels_active = IntGauge::new(
            "acceptor_channels_active",
            "Number of active acceptor channels",
        )?;
        registry.register(Box::new(channels_active.clone()))?;

        Ok(Self {
            accepted_total,
            accept_failures_total,
            accept_throttled,
            channels_active,
        })
    }

    pub fn record_accept(&self) {
        self.accepted_total.inc();
    }

    pub fn record_accept_failure(&self) {
        self.accept_failures_total.inc();
    }

    pub fn set_throttled(&self, throttled: bool) {
        self.accept_throttled.set(if throttled { 1 } else { 0 });
    }

    pub fn channel_opened(&self) {
        self.channels_active.inc();
    }

    pub fn channel_closed(&self) {
        self.channels_active.dec();
    }
}
