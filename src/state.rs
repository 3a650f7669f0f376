use std::sync::Arc;

use crate::config::Config;
use crate::directory::InMemoryDriverDirectory;
use crate::engine::lifecycle::OrderService;
use crate::engine::scheduler::RecurrenceScheduler;
use crate::hub::RealtimeHub;
use crate::identity::{HeaderIdentity, IdentityResolver};
use crate::notify::LogEgress;
use crate::observability::metrics::Metrics;
use crate::store::InMemoryStore;

pub struct AppState {
    pub store: Arc<InMemoryStore>,
    pub drivers: Arc<InMemoryDriverDirectory>,
    pub hub: Arc<RealtimeHub>,
    pub orders: Arc<OrderService>,
    pub scheduler: Arc<RecurrenceScheduler>,
    pub identity: Arc<dyn IdentityResolver>,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(config: &Config) -> Self {
        let metrics = Metrics::new();
        let store = Arc::new(InMemoryStore::new());
        let drivers = Arc::new(InMemoryDriverDirectory::new());
        let hub = Arc::new(RealtimeHub::new(
            store.clone(),
            metrics.clone(),
            config.connection_buffer_size,
        ));

        let orders = Arc::new(OrderService::new(
            store.clone(),
            drivers.clone(),
            hub.clone(),
            Arc::new(LogEgress),
            config.pricing.clone(),
            metrics.clone(),
        ));
        let scheduler = Arc::new(RecurrenceScheduler::new(
            orders.clone(),
            config.scheduler_settings(),
            metrics.clone(),
        ));

        Self {
            store,
            drivers,
            hub,
            orders,
            scheduler,
            identity: Arc::new(HeaderIdentity),
            metrics,
        }
    }
}
