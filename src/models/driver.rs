use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::GeoPoint;
use crate::models::order::DriverSummary;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DriverStatus {
    Active,
    Offline,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Driver {
    pub id: Uuid,
    pub name: String,
    pub phone: String,
    pub car: String,
    pub plate: String,
    pub approved: bool,
    pub status: DriverStatus,
    pub location: Option<GeoPoint>,
    pub registered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Driver {
    /// Approved profile and currently taking trips.
    pub fn is_candidate(&self) -> bool {
        self.approved && self.status == DriverStatus::Active
    }

    pub fn summary(&self) -> DriverSummary {
        DriverSummary {
            id: self.id,
            name: self.name.clone(),
            phone: self.phone.clone(),
            car: self.car.clone(),
            plate: self.plate.clone(),
        }
    }
}
