pub mod transport;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::geo::GeoPoint;
use crate::models::order::Order;
use crate::observability::metrics::Metrics;
use crate::store::OrderStore;

pub use transport::{Transport, TransportError, WsTransport};

pub mod events {
    pub const CAR_FINDING: &str = "carFinding";
    pub const CAR_FOUND: &str = "carFound";
    pub const ORDER_CANCELLED: &str = "orderCancelled";
    pub const TRIP_STARTED: &str = "tripStarted";
    pub const TRIP_COMPLETED: &str = "tripCompleted";
    pub const LOCATION: &str = "location";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Rider,
    Driver,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

#[derive(Debug, Serialize)]
struct EventFrame<'a> {
    event: &'a str,
    order_id: Uuid,
    data: &'a Value,
}

struct LiveConnection {
    id: ConnectionId,
    outbound: mpsc::Sender<String>,
}

/// One live connection per (actor, role). Delivery is best-effort and at-most-once.
pub struct RealtimeHub {
    connections: DashMap<(Uuid, Role), LiveConnection>,
    store: Arc<dyn OrderStore>,
    metrics: Metrics,
    buffer_size: usize,
    next_id: AtomicU64,
}

impl RealtimeHub {
    pub fn new(store: Arc<dyn OrderStore>, metrics: Metrics, buffer_size: usize) -> Self {
        Self {
            connections: DashMap::new(),
            store,
            metrics,
            buffer_size: buffer_size.max(1),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers `transport` as the current connection for the pair. A previous
    /// connection is swapped out in the same map operation and closed by its
    /// own writer task.
    pub fn connect<T: Transport>(&self, actor_id: Uuid, role: Role, transport: T) -> ConnectionId {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (outbound, rx) = mpsc::channel(self.buffer_size);

        tokio::spawn(run_writer(actor_id, role, transport, rx));

        let previous = self
            .connections
            .insert((actor_id, role), LiveConnection { id, outbound });

        match previous {
            Some(stale) => {
                debug!(actor_id = %actor_id, ?role, stale = stale.id.0, "replaced live connection");
            }
            None => self.metrics.live_connections.inc(),
        }

        info!(actor_id = %actor_id, ?role, connection = id.0, "live connection registered");
        id
    }

    /// Drops the pair's connection if `id` is still the current one.
    pub fn disconnect(&self, actor_id: Uuid, role: Role, id: ConnectionId) -> bool {
        let removed = self
            .connections
            .remove_if(&(actor_id, role), |_, conn| conn.id == id)
            .is_some();

        if removed {
            self.metrics.live_connections.dec();
            info!(actor_id = %actor_id, ?role, connection = id.0, "live connection closed");
        }
        removed
    }

    pub fn is_connected(&self, actor_id: Uuid, role: Role) -> bool {
        self.connections.contains_key(&(actor_id, role))
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Queues one frame; `false` when it was dropped.
    pub fn send_to(&self, actor_id: Uuid, role: Role, frame: String) -> bool {
        let Some(conn) = self.connections.get(&(actor_id, role)) else {
            self.metrics.hub_deliveries_total.with_label_values(&["offline"]).inc();
            return false;
        };

        match conn.outbound.try_send(frame) {
            Ok(()) => {
                self.metrics.hub_deliveries_total.with_label_values(&["queued"]).inc();
                true
            }
            Err(TrySendError::Full(_)) => {
                warn!(actor_id = %actor_id, ?role, "outbound queue full; frame dropped");
                self.metrics.hub_deliveries_total.with_label_values(&["dropped"]).inc();
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.metrics.hub_deliveries_total.with_label_values(&["dropped"]).inc();
                false
            }
        }
    }

    /// Delivers a lifecycle event to the order's rider and driver.
    pub async fn notify(&self, order_id: Uuid, event: &str, payload: Value) -> Result<usize, AppError> {
        let order = self
            .store
            .get_order(order_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("order {} not found", order_id)))?;

        Ok(self.notify_order(&order, event, &payload))
    }

    pub fn notify_order(&self, order: &Order, event: &str, payload: &Value) -> usize {
        let Some(frame) = encode_frame(event, order.id, payload) else {
            return 0;
        };

        let mut delivered = 0;
        if self.send_to(order.requester_id, Role::Rider, frame.clone()) {
            delivered += 1;
        }
        if let Some(driver_id) = order.driver_id {
            if self.send_to(driver_id, Role::Driver, frame) {
                delivered += 1;
            }
        }

        debug!(order_id = %order.id, event, delivered, "lifecycle event pushed");
        delivered
    }

    /// Pushes an event about `order_id` to a single connection.
    pub fn notify_actor(&self, actor_id: Uuid, role: Role, order_id: Uuid, event: &str, payload: &Value) -> bool {
        match encode_frame(event, order_id, payload) {
            Some(frame) => self.send_to(actor_id, role, frame),
            None => false,
        }
    }

    /// Relays a position to whichever party of the order did not send it.
    pub async fn broadcast_location(
        &self,
        order_id: Uuid,
        sender_id: Uuid,
        point: GeoPoint,
    ) -> Result<usize, AppError> {
        let order = self
            .store
            .get_order(order_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("order {} not found", order_id)))?;

        Ok(self.broadcast_location_for(&order, sender_id, point))
    }

    pub fn broadcast_location_for(&self, order: &Order, sender_id: Uuid, point: GeoPoint) -> usize {
        let recipient = if sender_id == order.requester_id {
            order.driver_id.map(|driver_id| (driver_id, Role::Driver))
        } else if Some(sender_id) == order.driver_id {
            Some((order.requester_id, Role::Rider))
        } else {
            None
        };

        let Some((actor_id, role)) = recipient else {
            return 0;
        };

        let payload = json!({ "lat": point.lat, "lng": point.lng, "from": sender_id });
        match encode_frame(events::LOCATION, order.id, &payload) {
            Some(frame) => usize::from(self.send_to(actor_id, role, frame)),
            None => 0,
        }
    }
}

fn encode_frame(event: &str, order_id: Uuid, data: &Value) -> Option<String> {
    match serde_json::to_string(&EventFrame { event, order_id, data }) {
        Ok(frame) => Some(frame),
        Err(err) => {
            warn!(order_id = %order_id, event, error = %err, "failed to encode hub frame");
            None
        }
    }
}

async fn run_writer<T: Transport>(actor_id: Uuid, role: Role, mut transport: T, mut rx: mpsc::Receiver<String>) {
    while let Some(frame) = rx.recv().await {
        if let Err(err) = transport.send(frame).await {
            debug!(actor_id = %actor_id, ?role, error = %err, "live connection send failed");
            break;
        }
    }
    transport.close().await;
}
