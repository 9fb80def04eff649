use prometheus::{
    Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub dispatches_total: IntCounterVec,
    pub deliveries_in_queue: IntGauge,
    pub dispatch_latency_seconds: HistogramVec,
    pub offer_outcomes_total: IntCounterVec,
    pub offers_expired_total: IntCounter,
    pub deliveries_completed_total: IntCounter,
    pub active_location_streams: IntGauge,
    pub critical_events_total: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let dispatches_total = IntCounterVec::new(
            Opts::new("dispatches_total", "Dispatch attempts by outcome"),
            &["outcome"],
        )
        .expect("valid dispatches_total metric");

        let deliveries_in_queue = IntGauge::new(
            "deliveries_in_queue",
            "Current number of deliveries awaiting dispatch",
        )
        .expect("valid deliveries_in_queue metric");

        let dispatch_latency_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "dispatch_latency_seconds",
                "Latency of dispatch processing in seconds",
            ),
            &["outcome"],
        )
        .expect("valid dispatch_latency_seconds metric");

        let offer_outcomes_total = IntCounterVec::new(
            Opts::new("offer_outcomes_total", "Offer resolutions by outcome"),
            &["outcome"],
        )
        .expect("valid offer_outcomes_total metric");

        let offers_expired_total = IntCounter::new(
            "offers_expired_total",
            "Offers released by the expiry sweep",
        )
        .expect("valid offers_expired_total metric");

        let deliveries_completed_total = IntCounter::new(
            "deliveries_completed_total",
            "Deliveries completed with proof of delivery",
        )
        .expect("valid deliveries_completed_total metric");

        let active_location_streams = IntGauge::new(
            "active_location_streams",
            "Location streams currently broadcasting",
        )
        .expect("valid active_location_streams metric");

        let critical_events_total = IntCounterVec::new(
            Opts::new(
                "critical_events_total",
                "Durable location events by milestone",
            ),
            &["event"],
        )
        .expect("valid critical_events_total metric");

        registry
            .register(Box::new(dispatches_total.clone()))
            .expect("register dispatches_total");
        registry
            .register(Box::new(deliveries_in_queue.clone()))
            .expect("register deliveries_in_queue");
        registry
            .register(Box::new(dispatch_latency_seconds.clone()))
            .expect("register dispatch_latency_seconds");
        registry
            .register(Box::new(offer_outcomes_total.clone()))
            .expect("register offer_outcomes_total");
        registry
            .register(Box::new(offers_expired_total.clone()))
            .expect("register offers_expired_total");
        registry
            .register(Box::new(deliveries_completed_total.clone()))
            .expect("register deliveries_completed_total");
        registry
            .register(Box::new(active_location_streams.clone()))
            .expect("register active_location_streams");
        registry
            .register(Box::new(critical_events_total.clone()))
            .expect("register critical_events_total");

        Self {
            registry,
            dispatches_total,
            deliveries_in_queue,
            dispatch_latency_seconds,
            offer_outcomes_total,
            offers_expired_total,
            deliveries_completed_total,
            active_location_streams,
            critical_events_total,
        }
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
