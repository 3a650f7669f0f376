use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::AppError;

#[async_trait]
pub trait NotificationEgress: Send + Sync {
    async fn send(&self, recipient: Uuid, subject: &str, body: &str) -> Result<(), AppError>;
}

/// Writes notifications to the log instead of a real provider.
#[derive(Debug, Default)]
pub struct LogEgress;

#[async_trait]
impl NotificationEgress for LogEgress {
    async fn send(&self, recipient: Uuid, subject: &str, body: &str) -> Result<(), AppError> {
        info!(recipient = %recipient, subject, body, "notification sent");
        Ok(())
    }
}

/// Sends in the background; failures are logged and dropped.
pub fn dispatch(egress: &Arc<dyn NotificationEgress>, recipient: Uuid, subject: String, body: String) {
    let egress = egress.clone();
    tokio::spawn(async move {
        if let Err(err) = egress.send(recipient, &subject, &body).await {
            warn!(recipient = %recipient, subject = %subject, error = %err, "notification egress failed");
        }
    });
}
