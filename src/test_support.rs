use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal_macros::dec;
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::directory::{DriverDirectory, DriverUpdate, InMemoryDriverDirectory, NewDriver};
use crate::engine::lifecycle::OrderService;
use crate::engine::pricing::PricingConfig;
use crate::error::AppError;
use crate::geo::GeoPoint;
use crate::hub::{RealtimeHub, Transport, TransportError};
use crate::models::driver::{Driver, DriverStatus};
use crate::models::order::{Estimate, Order, OrderAction, OrderDraft, OrderStatus, Tariff, VehicleClass};
use crate::notify::{LogEgress, NotificationEgress};
use crate::observability::metrics::Metrics;
use crate::store::InMemoryStore;

pub fn sample_order(requester_id: Uuid) -> Order {
    Order {
        id: Uuid::new_v4(),
        action: OrderAction::Ride,
        requester_id,
        driver_id: None,
        driver: None,
        pickup: GeoPoint::new(40.18, 44.51),
        pickup_address: Some("Home".to_string()),
        destination: GeoPoint::new(40.19, 44.52),
        destination_address: Some("Work".to_string()),
        stops: Vec::new(),
        vehicle_class: VehicleClass::new("car"),
        tariff: Tariff::Standard,
        pet: false,
        child_seat: false,
        payment_method: None,
        package_details: None,
        estimate: Estimate {
            distance_km: 1.4,
            eta_minutes: 3,
            price: dec!(800),
        },
        status: OrderStatus::Searching,
        scheduled_for: None,
        created_at: Utc::now(),
        completed_at: None,
        cancelled_at: None,
        cancel_reason: None,
        last_location: None,
        rating: None,
        review: None,
    }
}

pub fn assigned_order(rider_id: Uuid, driver_id: Uuid) -> Order {
    let driver = Driver {
        id: driver_id,
        ..sample_driver("Assigned")
    };
    Order {
        driver_id: Some(driver_id),
        driver: Some(driver.summary()),
        status: OrderStatus::Assigned,
        ..sample_order(rider_id)
    }
}

/// Approved and active.
pub fn sample_driver(name: &str) -> Driver {
    let now = Utc::now();
    Driver {
        id: Uuid::new_v4(),
        name: name.to_string(),
        phone: "+37400000000".to_string(),
        car: "Toyota Camry".to_string(),
        plate: "01 AA 001".to_string(),
        approved: true,
        status: DriverStatus::Active,
        location: Some(GeoPoint::new(40.18, 44.51)),
        registered_at: now,
        updated_at: now,
    }
}

pub fn draft() -> OrderDraft {
    OrderDraft {
        pickup: Some(GeoPoint::new(40.18, 44.51)),
        pickup_address: Some("Home".to_string()),
        destination: Some(GeoPoint::new(40.19, 44.52)),
        destination_address: Some("Work".to_string()),
        ..Default::default()
    }
}

pub async fn add_ready_driver(directory: &InMemoryDriverDirectory, name: &str) -> Driver {
    let driver = directory
        .register(NewDriver {
            id: None,
            name: name.to_string(),
            phone: "+37400000000".to_string(),
            car: "Kia Rio".to_string(),
            plate: "35 XY 350".to_string(),
            location: Some(GeoPoint::new(40.18, 44.51)),
        })
        .await
        .unwrap();

    directory
        .update(
            driver.id,
            DriverUpdate {
                approved: Some(true),
                status: Some(DriverStatus::Active),
                location: None,
            },
        )
        .await
        .unwrap()
}

/// Transport backed by a channel; closing drops the sender.
pub struct ChannelTransport {
    tx: Option<mpsc::UnboundedSender<String>>,
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&mut self, frame: String) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::Closed)?;
        tx.send(frame).map_err(|_| TransportError::Closed)
    }

    async fn close(&mut self) {
        self.tx = None;
    }
}

pub fn channel_transport() -> (ChannelTransport, mpsc::UnboundedReceiver<String>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChannelTransport { tx: Some(tx) }, rx)
}

pub async fn next_frame(rx: &mut mpsc::UnboundedReceiver<String>) -> Value {
    let frame = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("frame within timeout")
        .expect("connection still open");
    serde_json::from_str(&frame).expect("frame is json")
}

pub struct FailingEgress;

#[async_trait]
impl NotificationEgress for FailingEgress {
    async fn send(&self, _recipient: Uuid, _subject: &str, _body: &str) -> Result<(), AppError> {
        Err(AppError::UpstreamUnavailable("egress down".to_string()))
    }
}

pub struct Fixture {
    pub service: Arc<OrderService>,
    pub store: Arc<InMemoryStore>,
    pub drivers: Arc<InMemoryDriverDirectory>,
    pub hub: Arc<RealtimeHub>,
    pub metrics: Metrics,
}

pub fn fixture() -> Fixture {
    fixture_with_egress(Arc::new(LogEgress))
}

pub fn fixture_with_egress(egress: Arc<dyn NotificationEgress>) -> Fixture {
    let metrics = Metrics::new();
    let store = Arc::new(InMemoryStore::new());
    let drivers = Arc::new(InMemoryDriverDirectory::new());
    let hub = Arc::new(RealtimeHub::new(store.clone(), metrics.clone(), 16));
    let service = Arc::new(OrderService::new(
        store.clone(),
        drivers.clone(),
        hub.clone(),
        egress,
        PricingConfig::default(),
        metrics.clone(),
    ));

    Fixture {
        service,
        store,
        drivers,
        hub,
        metrics,
    }
}
