use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub orders_created_total: IntCounterVec,
    pub order_transitions_total: IntCounterVec,
    pub match_attempts_total: IntCounterVec,
    pub live_connections: IntGauge,
    pub hub_deliveries_total: IntCounterVec,
    pub scheduler_ticks_total: IntCounterVec,
    pub occurrences_materialized_total: IntCounter,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let orders_created_total = IntCounterVec::new(
            Opts::new("orders_created_total", "Orders created by initial status"),
            &["status"],
        )
        .expect("valid orders_created_total metric");

        let order_transitions_total = IntCounterVec::new(
            Opts::new("order_transitions_total", "Order status transitions by target status"),
            &["to"],
        )
        .expect("valid order_transitions_total metric");

        let match_attempts_total = IntCounterVec::new(
            Opts::new("match_attempts_total", "Driver match attempts by outcome"),
            &["outcome"],
        )
        .expect("valid match_attempts_total metric");

        let live_connections = IntGauge::new("live_connections", "Currently registered live connections")
            .expect("valid live_connections metric");

        let hub_deliveries_total = IntCounterVec::new(
            Opts::new("hub_deliveries_total", "Realtime frames by delivery outcome"),
            &["outcome"],
        )
        .expect("valid hub_deliveries_total metric");

        let scheduler_ticks_total = IntCounterVec::new(
            Opts::new("scheduler_ticks_total", "Recurrence scheduler ticks by outcome"),
            &["outcome"],
        )
        .expect("valid scheduler_ticks_total metric");

        let occurrences_materialized_total = IntCounter::new(
            "occurrences_materialized_total",
            "Recurring plan occurrences turned into orders",
        )
        .expect("valid occurrences_materialized_total metric");

        registry
            .register(Box::new(orders_created_total.clone()))
            .expect("register orders_created_total");
        registry
            .register(Box::new(order_transitions_total.clone()))
            .expect("register order_transitions_total");
        registry
            .register(Box::new(match_attempts_total.clone()))
            .expect("register match_attempts_total");
        registry
            .register(Box::new(live_connections.clone()))
            .expect("register live_connections");
        registry
            .register(Box::new(hub_deliveries_total.clone()))
            .expect("register hub_deliveries_total");
        registry
            .register(Box::new(scheduler_ticks_total.clone()))
            .expect("register scheduler_ticks_total");
        registry
            .register(Box::new(occurrences_materialized_total.clone()))
            .expect("register occurrences_materialized_total");

        Self {
            registry,
            orders_created_total,
            order_transitions_total,
            match_attempts_total,
            live_connections,
            hub_deliveries_total,
            scheduler_ticks_total,
            occurrences_materialized_total,
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
