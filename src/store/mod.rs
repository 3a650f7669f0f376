pub mod memory;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::order::Order;
use crate::models::plan::{OccurrenceKey, PlanOccurrence, StoredPlan};

pub use memory::InMemoryStore;

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn insert_order(&self, order: Order) -> Result<Order, AppError>;

    async fn get_order(&self, id: Uuid) -> Result<Option<Order>, AppError>;

    /// Replaces an existing order. Fails with `NotFound` if it was never inserted.
    async fn update_order(&self, order: Order) -> Result<Order, AppError>;

    async fn count_orders(&self) -> Result<usize, AppError>;

    async fn insert_plan(&self, plan: StoredPlan) -> Result<StoredPlan, AppError>;

    async fn list_plans(&self) -> Result<Vec<StoredPlan>, AppError>;

    async fn list_plans_for_owner(&self, owner_id: Uuid) -> Result<Vec<StoredPlan>, AppError>;

    /// Inserts the occurrence unless its key already exists.
    /// Returns `false` when the key was already recorded.
    async fn record_occurrence(&self, occurrence: PlanOccurrence) -> Result<bool, AppError>;

    /// Removes the occurrence only if it still points at `order_id`.
    async fn release_occurrence(&self, key: &OccurrenceKey, order_id: Uuid) -> Result<bool, AppError>;

    async fn get_occurrence(&self, key: &OccurrenceKey) -> Result<Option<PlanOccurrence>, AppError>;

    async fn count_occurrences(&self) -> Result<usize, AppError>;
}
