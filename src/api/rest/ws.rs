use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures::StreamExt;
use serde::Deserialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::geo::GeoPoint;
use crate::hub::{Role, WsTransport};
use crate::identity::Caller;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    pub actor_id: Option<Uuid>,
    pub role: Role,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum InboundFrame {
    Location { order_id: Uuid, lat: f64, lng: f64 },
}

pub async fn ws_handler(
    Caller(caller): Caller,
    Query(params): Query<ConnectParams>,
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, AppError> {
    let actor_id = connecting_actor(caller, &params)?;
    let role = params.role;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, actor_id, role, state)))
}

/// The socket always belongs to the authenticated caller.
fn connecting_actor(caller: Uuid, params: &ConnectParams) -> Result<Uuid, AppError> {
    match params.actor_id {
        Some(claimed) if claimed != caller => Err(AppError::Forbidden(
            "actor_id does not match the authenticated caller".to_string(),
        )),
        _ => Ok(caller),
    }
}

async fn handle_socket(socket: WebSocket, actor_id: Uuid, role: Role, state: Arc<AppState>) {
    let (sender, mut receiver) = socket.split();
    let connection = state.hub.connect(actor_id, role, WsTransport::new(sender));

    while let Some(Ok(message)) = receiver.next().await {
        match message {
            Message::Text(text) => handle_frame(&state, actor_id, &text).await,
            Message::Close(_) => break,
            _ => {}
        }
    }

    state.hub.disconnect(actor_id, role, connection);
    info!(actor_id = %actor_id, ?role, "websocket client disconnected");
}

async fn handle_frame(state: &AppState, actor_id: Uuid, text: &str) {
    let frame = match serde_json::from_str::<InboundFrame>(text) {
        Ok(frame) => frame,
        Err(err) => {
            debug!(actor_id = %actor_id, error = %err, "ignoring unrecognised ws frame");
            return;
        }
    };

    match frame {
        InboundFrame::Location { order_id, lat, lng } => {
            if let Err(err) = state
                .orders
                .update_live_location(order_id, actor_id, GeoPoint::new(lat, lng))
                .await
            {
                warn!(actor_id = %actor_id, order_id = %order_id, error = %err, "live location rejected");
            }
        }
    }
}
