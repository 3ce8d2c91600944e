use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub dispatch_attempts_total: IntCounterVec,
    pub dispatch_latency_seconds: HistogramVec,
    pub connected_couriers: IntGauge,
    pub location_requests_total: IntCounterVec,
    pub delivery_transitions_total: IntCounterVec,
    pub stale_connections_swept_total: IntCounter,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let dispatch_attempts_total = IntCounterVec::new(
            Opts::new("dispatch_attempts_total", "Dispatch attempts by outcome"),
            &["outcome"],
        )
        .expect("valid dispatch_attempts_total metric");

        let dispatch_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "dispatch_latency_seconds",
                "Time from dispatch start to outcome in seconds",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0]),
            &["outcome"],
        )
        .expect("valid dispatch_latency_seconds metric");

        let connected_couriers =
            IntGauge::new("connected_couriers", "Couriers holding a live connection")
                .expect("valid connected_couriers metric");

        let location_requests_total = IntCounterVec::new(
            Opts::new(
                "location_requests_total",
                "Location polls sent to couriers by outcome",
            ),
            &["outcome"],
        )
        .expect("valid location_requests_total metric");

        let delivery_transitions_total = IntCounterVec::new(
            Opts::new(
                "delivery_transitions_total",
                "Applied delivery status transitions by target status",
            ),
            &["status"],
        )
        .expect("valid delivery_transitions_total metric");

        let stale_connections_swept_total = IntCounter::new(
            "stale_connections_swept_total",
            "Courier connections removed by the stale sweep",
        )
        .expect("valid stale_connections_swept_total metric");

        registry
            .register(Box::new(dispatch_attempts_total.clone()))
            .expect("register dispatch_attempts_total");
        registry
            .register(Box::new(dispatch_latency_seconds.clone()))
            .expect("register dispatch_latency_seconds");
        registry
            .register(Box::new(connected_couriers.clone()))
            .expect("register connected_couriers");
        registry
            .register(Box::new(location_requests_total.clone()))
            .expect("register location_requests_total");
        registry
            .register(Box::new(delivery_transitions_total.clone()))
            .expect("register delivery_transitions_total");
        registry
            .register(Box::new(stale_connections_swept_total.clone()))
            .expect("register stale_connections_swept_total");

        Self {
            registry,
            dispatch_attempts_total,
            dispatch_latency_seconds,
            connected_couriers,
            location_requests_total,
            delivery_transitions_total,
            stale_connections_swept_total,
        }
    }

    pub fn record_dispatch(&self, outcome: &str, elapsed_secs: f64) {
        self.dispatch_attempts_total
            .with_label_values(&[outcome])
            .inc();
        self.dispatch_latency_seconds
            .with_label_values(&[outcome])
            .observe(elapsed_secs);
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
