//! Prometheus metrics for the reconciliation loop

use crate::resource::ResourceKind;
use prometheus::{Counter, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Prometheus metrics collector for the controller
#[derive(Clone)]
pub struct ControllerMetrics {
    /// Work items handled, by kind and result
    pub items_processed_total: CounterVec,
    /// Work items re-queued with backoff
    pub retries_total: Counter,
    /// Snapshots handed to the device agent
    pub config_posts_total: Counter,
    /// Virtual servers in the last snapshot
    pub virtual_servers: Gauge,
    /// Route group synthesis latency in seconds
    pub sync_duration_seconds: Histogram,
    pub registry: Arc<Registry>,
}

impl ControllerMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Arc::new(Registry::new());

        let items_processed_total = CounterVec::new(
            Opts::new("routegroup_items_processed_total", "Work items processed"),
            &["kind", "result"],
        )?;
        let retries_total = Counter::new("routegroup_retries_total", "Work items re-queued with backoff")?;
        let config_posts_total = Counter::new("routegroup_config_posts_total", "Config snapshots posted to the agent")?;
        let virtual_servers = Gauge::new("routegroup_virtual_servers", "Virtual servers in the last snapshot")?;
        let sync_duration_seconds = Histogram::with_opts(HistogramOpts::new(
            "routegroup_sync_duration_seconds",
            "Route group synthesis latency in seconds",
        ))?;

        registry.register(Box::new(items_processed_total.clone()))?;
        registry.register(Box::new(retries_total.clone()))?;
        registry.register(Box::new(config_posts_total.clone()))?;
        registry.register(Box::new(virtual_servers.clone()))?;
        registry.register(Box::new(sync_duration_seconds.clone()))?;

        Ok(Self {
            items_processed_total,
            retries_total,
            config_posts_total,
            virtual_servers,
            sync_duration_seconds,
            registry,
        })
    }

    pub fn record_item(&self, kind: ResourceKind, result: &str) {
        let kind = kind.to_string();
        self.items_processed_total
            .with_label_values(&[kind.as_str(), result])
            .inc();
    }

    /// Gather all metrics in Prometheus text format
    pub fn gather(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = vec![];
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
