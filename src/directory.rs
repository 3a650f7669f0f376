use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::AppError;
use crate::geo::GeoPoint;
use crate::models::driver::{Driver, DriverStatus};

#[derive(Debug, Clone)]
pub struct NewDriver {
    pub id: Option<Uuid>,
    pub name: String,
    pub phone: String,
    pub car: String,
    pub plate: String,
    pub location: Option<GeoPoint>,
}

#[derive(Debug, Clone, Default)]
pub struct DriverUpdate {
    pub approved: Option<bool>,
    pub status: Option<DriverStatus>,
    pub location: Option<GeoPoint>,
}

#[async_trait]
pub trait DriverDirectory: Send + Sync {
    /// Snapshot of matchable drivers in a fixed enumeration order.
    async fn available_drivers(&self) -> Result<Vec<Driver>, AppError>;

    async fn list_drivers(&self) -> Result<Vec<Driver>, AppError>;

    async fn register(&self, driver: NewDriver) -> Result<Driver, AppError>;

    async fn update(&self, id: Uuid, update: DriverUpdate) -> Result<Driver, AppError>;
}

pub struct InMemoryDriverDirectory {
    drivers: DashMap<Uuid, Driver>,
    available: AtomicBool,
}

impl Default for InMemoryDriverDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDriverDirectory {
    pub fn new() -> Self {
        Self {
            drivers: DashMap::new(),
            available: AtomicBool::new(true),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> Result<(), AppError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AppError::UpstreamUnavailable("driver directory unavailable".to_string()))
        }
    }

    fn sorted(&self, keep: impl Fn(&Driver) -> bool) -> Vec<Driver> {
        let mut drivers: Vec<Driver> = self
            .drivers
            .iter()
            .filter(|entry| keep(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        drivers.sort_by(|a, b| a.registered_at.cmp(&b.registered_at).then(a.id.cmp(&b.id)));
        drivers
    }
}

#[async_trait]
impl DriverDirectory for InMemoryDriverDirectory {
    async fn available_drivers(&self) -> Result<Vec<Driver>, AppError> {
        self.ensure_available()?;
        Ok(self.sorted(Driver::is_candidate))
    }

    async fn list_drivers(&self) -> Result<Vec<Driver>, AppError> {
        self.ensure_available()?;
        Ok(self.sorted(|_| true))
    }

    async fn register(&self, driver: NewDriver) -> Result<Driver, AppError> {
        self.ensure_available()?;

        if driver.name.trim().is_empty() {
            return Err(AppError::InvalidInput("name cannot be empty".to_string()));
        }
        if let Some(location) = &driver.location {
            location.validate("location")?;
        }

        let now = Utc::now();
        let driver = Driver {
            id: driver.id.unwrap_or_else(Uuid::new_v4),
            name: driver.name,
            phone: driver.phone,
            car: driver.car,
            plate: driver.plate,
            approved: false,
            status: DriverStatus::Offline,
            location: driver.location,
            registered_at: now,
            updated_at: now,
        };

        match self.drivers.entry(driver.id) {
            Entry::Occupied(_) => Err(AppError::InvalidState(format!(
                "driver {} already registered",
                driver.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(driver.clone());
                Ok(driver)
            }
        }
    }

    async fn update(&self, id: Uuid, update: DriverUpdate) -> Result<Driver, AppError> {
        self.ensure_available()?;

        if let Some(location) = &update.location {
            location.validate("location")?;
        }

        let mut driver = self
            .drivers
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("driver {} not found", id)))?;

        if let Some(approved) = update.approved {
            driver.approved = approved;
        }
        if let Some(status) = update.status {
            driver.status = status;
        }
        if update.location.is_some() {
            driver.location = update.location;
        }
        driver.updated_at = Utc::now();

        Ok(driver.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::{DriverDirectory, DriverUpdate, InMemoryDriverDirectory, NewDriver};
    use crate::models::driver::DriverStatus;

    fn new_driver(name: &str) -> NewDriver {
        NewDriver {
            id: None,
            name: name.to_string(),
            phone: "+37491000000".to_string(),
            car: "Toyota Camry".to_string(),
            plate: "510ZR10".to_string(),
            location: None,
        }
    }

    #[tokio::test]
    async fn only_approved_active_drivers_are_available() {
        let directory = InMemoryDriverDirectory::new();
        let pending = directory.register(new_driver("Pending")).await.unwrap();
        let offline = directory.register(new_driver("Offline")).await.unwrap();
        let ready = directory.register(new_driver("Ready")).await.unwrap();

        directory
            .update(
                pending.id,
                DriverUpdate {
                    status: Some(DriverStatus::Active),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        directory
            .update(
                offline.id,
                DriverUpdate {
                    approved: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        directory
            .update(
                ready.id,
                DriverUpdate {
                    approved: Some(true),
                    status: Some(DriverStatus::Active),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let available = directory.available_drivers().await.unwrap();
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].id, ready.id);
    }

    #[tokio::test]
    async fn register_rejects_blank_name() {
        let directory = InMemoryDriverDirectory::new();
        assert!(directory.register(new_driver("  ")).await.is_err());
    }
}
