use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{patch, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use crate::directory::{DriverDirectory, DriverUpdate, NewDriver};
use crate::error::AppError;
use crate::geo::GeoPoint;
use crate::models::driver::{Driver, DriverStatus};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/drivers", post(register_driver).get(list_drivers))
        .route("/drivers/:id/status", patch(update_driver_status))
}

#[derive(Deserialize)]
pub struct RegisterDriverRequest {
    pub id: Option<Uuid>,
    pub name: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub car: String,
    #[serde(default)]
    pub plate: String,
    pub location: Option<GeoPoint>,
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub approved: Option<bool>,
    pub status: Option<DriverStatus>,
    pub location: Option<GeoPoint>,
}

async fn register_driver(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterDriverRequest>,
) -> Result<Json<Driver>, AppError> {
    let driver = state
        .drivers
        .register(NewDriver {
            id: payload.id,
            name: payload.name,
            phone: payload.phone,
            car: payload.car,
            plate: payload.plate,
            location: payload.location,
        })
        .await?;

    Ok(Json(driver))
}

async fn list_drivers(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Driver>>, AppError> {
    Ok(Json(state.drivers.list_drivers().await?))
}

async fn update_driver_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<Json<Driver>, AppError> {
    let driver = state
        .drivers
        .update(
            id,
            DriverUpdate {
                approved: payload.approved,
                status: payload.status,
                location: payload.location,
            },
        )
        .await?;

    Ok(Json(driver))
}
