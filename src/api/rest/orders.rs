use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::lifecycle::RateOrder;
use crate::error::AppError;
use crate::geo::GeoPoint;
use crate::identity::Caller;
use crate::models::order::{AcceptOrder, Estimate, EstimateRequest, Order, OrderDraft};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders/estimate", post(estimate))
        .route("/orders", post(create_order))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/accept", post(accept_order))
        .route("/orders/:id/cancel", post(cancel_order))
        .route("/orders/:id/driver-accept", post(driver_accept))
        .route("/orders/:id/complete", post(complete_order))
        .route("/orders/:id/rate", post(rate_order))
        .route("/orders/:id/location", post(update_location))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CancelRequest {
    pub reason: Option<String>,
}

async fn estimate(
    State(state): State<Arc<AppState>>,
    Caller(_caller): Caller,
    Json(payload): Json<EstimateRequest>,
) -> Result<Json<Estimate>, AppError> {
    Ok(Json(state.orders.estimate(&payload)?))
}

async fn create_order(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Json(payload): Json<OrderDraft>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(state.orders.request_order(caller, payload).await?))
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(state.orders.get_order(id, caller).await?))
}

async fn accept_order(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Path(id): Path<Uuid>,
    Json(payload): Json<AcceptOrder>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(state.orders.accept_order(id, caller, payload).await?))
}

async fn cancel_order(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Path(id): Path<Uuid>,
    payload: Option<Json<CancelRequest>>,
) -> Result<Json<Order>, AppError> {
    let reason = payload.and_then(|Json(body)| body.reason);
    Ok(Json(state.orders.cancel_order(id, caller, reason).await?))
}

async fn driver_accept(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(state.orders.driver_accept(id, caller).await?))
}

async fn complete_order(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(state.orders.complete_order(id, caller).await?))
}

async fn rate_order(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Path(id): Path<Uuid>,
    Json(payload): Json<RateOrder>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(state.orders.rate_order(id, caller, payload).await?))
}

async fn update_location(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Path(id): Path<Uuid>,
    Json(payload): Json<GeoPoint>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(state.orders.update_live_location(id, caller, payload).await?))
}
