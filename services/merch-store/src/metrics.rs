// Prometheus metrics for the merch store
// Tracks: registrations, purchases, transfers, coin flow and rejections

use prometheus::{
    register_histogram_with_registry, register_int_counter_vec_with_registry,
    register_int_counter_with_registry, Encoder, Histogram, HistogramOpts, IntCounter,
    IntCounterVec, Opts, Registry, TextEncoder,
};

pub struct Metrics {
    pub registry: Registry,

    // Business metrics
    pub users_registered_total: IntCounter,
    pub purchases_total: IntCounter,
    pub transfers_total: IntCounter,
    pub coins_spent_total: IntCounter,
    pub coins_transferred_total: IntCounter,

    // Failures by error type
    pub rejections_total: IntCounterVec,

    pub unit_of_work_duration_seconds: Histogram,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let users_registered_total = register_int_counter_with_registry!(
            Opts::new("merch_users_registered_total", "Users created on first login"),
            registry
        )?;

        let purchases_total = register_int_counter_with_registry!(
            Opts::new("merch_purchases_total", "Completed purchases"),
            registry
        )?;

        let transfers_total = register_int_counter_with_registry!(
            Opts::new("merch_transfers_total", "Completed coin transfers"),
            registry
        )?;

        let coins_spent_total = register_int_counter_with_registry!(
            Opts::new("merch_coins_spent_total", "Coins debited by purchases"),
            registry
        )?;

        let coins_transferred_total = register_int_counter_with_registry!(
            Opts::new("merch_coins_transferred_total", "Coins moved between users"),
            registry
        )?;

        let rejections_total = register_int_counter_vec_with_registry!(
            Opts::new("merch_rejections_total", "Failed operations by error type"),
            &["operation", "error_type"],
            registry
        )?;

        let unit_of_work_duration_seconds = register_histogram_with_registry!(
            HistogramOpts::new(
                "merch_unit_of_work_duration_seconds",
                "Time from begin to commit or rollback"
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            registry
        )?;

        Ok(Self {
            registry,
            users_registered_total,
            purchases_total,
            transfers_total,
            coins_spent_total,
            coins_transferred_total,
            rejections_total,
            unit_of_work_duration_seconds,
        })
    }

    /// Export all metrics in Prometheus text format
    pub fn export(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    pub fn track_rejection(&self, operation: &str, error_type: &str) {
        self.rejections_total
            .with_label_values(&[operation, error_type])
            .inc();
    }
}
