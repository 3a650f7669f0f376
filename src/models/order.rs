use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::geo::GeoPoint;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrderAction {
    #[default]
    Ride,
    Delivery,
    ScheduledRide,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Tariff {
    #[default]
    Standard,
    Premium,
}

/// Key into the fare table, e.g. `moto`, `car`, `van`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VehicleClass(String);

impl VehicleClass {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VehicleClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Scheduled,
    Searching,
    Assigned,
    OnTrip,
    Completed,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Scheduled => "scheduled",
            OrderStatus::Searching => "searching",
            OrderStatus::Assigned => "assigned",
            OrderStatus::OnTrip => "on_trip",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }

    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;

        match (self, next) {
            (Scheduled, Searching) => true,
            (Searching, Assigned) => true,
            (Assigned, OnTrip) => true,
            (OnTrip, Completed) => true,
            (from, Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stop {
    pub address: String,
    pub lat: f64,
    pub lng: f64,
}

impl Stop {
    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lng)
    }
}

/// Derived trip figures. Always produced together from one geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Estimate {
    pub distance_km: f64,
    pub eta_minutes: u32,
    pub price: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverSummary {
    pub id: Uuid,
    pub name: String,
    pub phone: String,
    pub car: String,
    pub plate: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub action: OrderAction,
    pub requester_id: Uuid,
    pub driver_id: Option<Uuid>,
    pub driver: Option<DriverSummary>,
    pub pickup: GeoPoint,
    pub pickup_address: Option<String>,
    pub destination: GeoPoint,
    pub destination_address: Option<String>,
    pub stops: Vec<Stop>,
    pub vehicle_class: VehicleClass,
    pub tariff: Tariff,
    pub pet: bool,
    pub child_seat: bool,
    pub payment_method: Option<String>,
    pub package_details: Option<String>,
    #[serde(flatten)]
    pub estimate: Estimate,
    pub status: OrderStatus,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancel_reason: Option<String>,
    pub last_location: Option<GeoPoint>,
    pub rating: Option<u8>,
    pub review: Option<String>,
}

impl Order {
    pub fn is_party(&self, actor_id: Uuid) -> bool {
        self.requester_id == actor_id || self.driver_id == Some(actor_id)
    }

    /// Moves along the lifecycle or fails without touching the order.
    pub fn transition(&mut self, next: OrderStatus) -> Result<(), AppError> {
        if !self.status.can_transition_to(next) {
            return Err(AppError::InvalidState(format!(
                "order {} cannot move from {} to {}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EstimateRequest {
    pub pickup: Option<GeoPoint>,
    pub destination: Option<GeoPoint>,
    pub vehicle_class: Option<VehicleClass>,
    pub tariff: Tariff,
    pub pet: bool,
    pub child_seat: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OrderDraft {
    pub action: OrderAction,
    pub pickup: Option<GeoPoint>,
    pub pickup_address: Option<String>,
    pub destination: Option<GeoPoint>,
    pub destination_address: Option<String>,
    pub stops: Vec<Stop>,
    pub vehicle_class: Option<VehicleClass>,
    pub tariff: Tariff,
    pub pet: bool,
    pub child_seat: bool,
    pub payment_method: Option<String>,
    pub package_details: Option<String>,
    pub scheduled_for: Option<DateTime<Utc>>,
}

impl OrderDraft {
    /// Destination is the last stop when stops are given.
    pub fn resolved_destination(&self) -> (Option<GeoPoint>, Option<String>) {
        match self.stops.last() {
            Some(last) => (Some(last.point()), Some(last.address.clone())),
            None => (self.destination, self.destination_address.clone()),
        }
    }
}

/// Finalized trip details submitted when the rider confirms the order.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AcceptOrder {
    pub from_lat: Option<f64>,
    pub from_lng: Option<f64>,
    pub stops: Vec<Stop>,
    pub payment_method: Option<String>,
    pub pet: bool,
    pub child_seat: bool,
    pub tariff: Tariff,
    pub vehicle_class: Option<VehicleClass>,
}
