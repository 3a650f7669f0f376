use std::collections::BTreeMap;
use std::path::Path;

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::geo::{haversine_km, GeoPoint, ZoneBox};
use crate::models::order::{Estimate, Tariff, VehicleClass};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FareSchedule {
    pub base_fare: Decimal,
    pub per_km: Decimal,
    pub per_minute: Decimal,
    pub minimum: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingConfig {
    pub default_class: VehicleClass,
    pub classes: BTreeMap<VehicleClass, FareSchedule>,
    /// Applied to base, per-km and per-minute rates on the premium tariff.
    pub premium_multiplier: Decimal,
    pub pet_surcharge: Decimal,
    pub child_seat_surcharge: Decimal,
    pub city_zone: ZoneBox,
    pub city_zone_multiplier: Decimal,
    /// Average travel speed used for ETA (0.5 km/min = 30 km/h).
    pub km_per_minute: f64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        let mut classes = BTreeMap::new();
        classes.insert(
            VehicleClass::new("moto"),
            FareSchedule {
                base_fare: dec!(300),
                per_km: dec!(40),
                per_minute: dec!(15),
                minimum: dec!(500),
            },
        );
        classes.insert(
            VehicleClass::new("car"),
            FareSchedule {
                base_fare: dec!(400),
                per_km: dec!(60),
                per_minute: dec!(20),
                minimum: dec!(800),
            },
        );
        classes.insert(
            VehicleClass::new("van"),
            FareSchedule {
                base_fare: dec!(600),
                per_km: dec!(90),
                per_minute: dec!(25),
                minimum: dec!(1200),
            },
        );

        Self {
            default_class: VehicleClass::new("car"),
            classes,
            premium_multiplier: dec!(1.5),
            pet_surcharge: dec!(100),
            child_seat_surcharge: dec!(50),
            city_zone: ZoneBox {
                min_lat: 40.15,
                max_lat: 40.25,
                min_lng: 44.45,
                max_lng: 44.60,
            },
            city_zone_multiplier: dec!(1.10),
            km_per_minute: 0.5,
        }
    }
}

impl PricingConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|err| {
            AppError::Internal(format!("failed to read pricing config {}: {err}", path.display()))
        })?;
        let config: PricingConfig = serde_json::from_str(&raw).map_err(|err| {
            AppError::Internal(format!("invalid pricing config {}: {err}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if !self.classes.contains_key(&self.default_class) {
            return Err(AppError::Internal(format!(
                "default vehicle class {} has no fare schedule",
                self.default_class
            )));
        }
        if !(self.km_per_minute.is_finite() && self.km_per_minute > 0.0) {
            return Err(AppError::Internal("km_per_minute must be positive".to_string()));
        }
        Ok(())
    }

    /// Resolves an optional requested class against the table.
    pub fn resolve_class(&self, requested: Option<&VehicleClass>) -> Result<VehicleClass, AppError> {
        let class = requested.unwrap_or(&self.default_class);
        if self.classes.contains_key(class) {
            Ok(class.clone())
        } else {
            Err(AppError::InvalidInput(format!("unknown vehicle class {class}")))
        }
    }

    pub fn schedule(&self, class: &VehicleClass) -> Result<&FareSchedule, AppError> {
        self.classes
            .get(class)
            .ok_or_else(|| AppError::InvalidInput(format!("unknown vehicle class {class}")))
    }
}

/// Everything the fare depends on. Two equal quotes always price the same.
#[derive(Debug, Clone, PartialEq)]
pub struct Quote<'a> {
    pub pickup: GeoPoint,
    pub destination: GeoPoint,
    pub vehicle_class: &'a VehicleClass,
    pub tariff: Tariff,
    pub pet: bool,
    pub child_seat: bool,
}

pub fn eta_minutes(distance_km: f64, km_per_minute: f64) -> u32 {
    (distance_km / km_per_minute).ceil() as u32
}

pub fn estimate(config: &PricingConfig, quote: &Quote<'_>) -> Result<Estimate, AppError> {
    quote.pickup.validate("pickup")?;
    quote.destination.validate("destination")?;

    let distance_km = haversine_km(&quote.pickup, &quote.destination);
    let eta = eta_minutes(distance_km, config.km_per_minute);
    let price = fare(config, quote, distance_km, eta)?;

    Ok(Estimate {
        distance_km,
        eta_minutes: eta,
        price,
    })
}

fn fare(config: &PricingConfig, quote: &Quote<'_>, distance_km: f64, eta: u32) -> Result<Decimal, AppError> {
    let schedule = config.schedule(quote.vehicle_class)?;

    let tier = match quote.tariff {
        Tariff::Standard => Decimal::ONE,
        Tariff::Premium => config.premium_multiplier,
    };

    let distance = Decimal::try_from(distance_km)
        .map_err(|err| AppError::InvalidInput(format!("distance not representable: {err}")))?;

    let mut price = schedule.base_fare * tier
        + distance * schedule.per_km * tier
        + Decimal::from(eta) * schedule.per_minute * tier;

    if quote.pet {
        price += config.pet_surcharge;
    }
    if quote.child_seat {
        price += config.child_seat_surcharge;
    }

    if config.city_zone.contains(&quote.pickup) || config.city_zone.contains(&quote.destination) {
        price *= config.city_zone_multiplier;
    }

    if price < schedule.minimum {
        price = schedule.minimum;
    }

    Ok(price.round_dp_with_strategy(0, RoundingStrategy::MidpointNearestEven))
}
