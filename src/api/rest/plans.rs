use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::Json;
use axum::Router;

use crate::error::AppError;
use crate::identity::Caller;
use crate::models::plan::{CreatePlanRequest, RecurringPlan};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/plans", post(create_plan).get(list_plans))
}

async fn create_plan(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Json(payload): Json<CreatePlanRequest>,
) -> Result<Json<RecurringPlan>, AppError> {
    Ok(Json(state.orders.create_plan(caller, payload).await?))
}

async fn list_plans(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
) -> Result<Json<Vec<RecurringPlan>>, AppError> {
    Ok(Json(state.orders.list_plans(caller).await?))
}
