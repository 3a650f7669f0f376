use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::order::Order;
use crate::models::plan::{OccurrenceKey, PlanOccurrence, StoredPlan};
use crate::store::OrderStore;

pub struct InMemoryStore {
    orders: DashMap<Uuid, Order>,
    plans: DashMap<Uuid, StoredPlan>,
    occurrences: DashMap<OccurrenceKey, PlanOccurrence>,
    available: AtomicBool,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            orders: DashMap::new(),
            plans: DashMap::new(),
            occurrences: DashMap::new(),
            available: AtomicBool::new(true),
        }
    }

    /// Simulates losing (or regaining) the backing storage.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> Result<(), AppError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AppError::UpstreamUnavailable("order store unavailable".to_string()))
        }
    }
}

fn sorted_plans(mut plans: Vec<StoredPlan>) -> Vec<StoredPlan> {
    plans.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
    plans
}

#[async_trait]
impl OrderStore for InMemoryStore {
    async fn insert_order(&self, order: Order) -> Result<Order, AppError> {
        self.ensure_available()?;

        match self.orders.entry(order.id) {
            Entry::Occupied(_) => Err(AppError::Internal(format!("order {} already exists", order.id))),
            Entry::Vacant(slot) => {
                slot.insert(order.clone());
                Ok(order)
            }
        }
    }

    async fn get_order(&self, id: Uuid) -> Result<Option<Order>, AppError> {
        self.ensure_available()?;
        Ok(self.orders.get(&id).map(|entry| entry.value().clone()))
    }

    async fn update_order(&self, order: Order) -> Result<Order, AppError> {
        self.ensure_available()?;

        let mut existing = self
            .orders
            .get_mut(&order.id)
            .ok_or_else(|| AppError::NotFound(format!("order {} not found", order.id)))?;
        *existing = order.clone();

        Ok(order)
    }

    async fn count_orders(&self) -> Result<usize, AppError> {
        self.ensure_available()?;
        Ok(self.orders.len())
    }

    async fn insert_plan(&self, plan: StoredPlan) -> Result<StoredPlan, AppError> {
        self.ensure_available()?;
        self.plans.insert(plan.id, plan.clone());
        Ok(plan)
    }

    async fn list_plans(&self) -> Result<Vec<StoredPlan>, AppError> {
        self.ensure_available()?;
        Ok(sorted_plans(
            self.plans.iter().map(|entry| entry.value().clone()).collect(),
        ))
    }

    async fn list_plans_for_owner(&self, owner_id: Uuid) -> Result<Vec<StoredPlan>, AppError> {
        self.ensure_available()?;
        Ok(sorted_plans(
            self.plans
                .iter()
                .filter(|entry| entry.value().owner_id == owner_id)
                .map(|entry| entry.value().clone())
                .collect(),
        ))
    }

    async fn record_occurrence(&self, occurrence: PlanOccurrence) -> Result<bool, AppError> {
        self.ensure_available()?;

        match self.occurrences.entry(occurrence.key) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(occurrence);
                Ok(true)
            }
        }
    }

    async fn release_occurrence(&self, key: &OccurrenceKey, order_id: Uuid) -> Result<bool, AppError> {
        self.ensure_available()?;
        Ok(self
            .occurrences
            .remove_if(key, |_, occurrence| occurrence.order_id == Some(order_id))
            .is_some())
    }

    async fn get_occurrence(&self, key: &OccurrenceKey) -> Result<Option<PlanOccurrence>, AppError> {
        self.ensure_available()?;
        Ok(self.occurrences.get(key).map(|entry| entry.value().clone()))
    }

    async fn count_occurrences(&self) -> Result<usize, AppError> {
        self.ensure_available()?;
        Ok(self.occurrences.len())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};
    use uuid::Uuid;

    use super::InMemoryStore;
    use crate::error::AppError;
    use crate::models::plan::{OccurrenceKey, PlanOccurrence};
    use crate::store::OrderStore;
    use crate::test_support::sample_order;

    fn occurrence(plan_id: Uuid) -> PlanOccurrence {
        PlanOccurrence {
            key: OccurrenceKey {
                plan_id,
                entry_index: 0,
                occurrence_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            },
            order_id: None,
            executed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn occurrence_key_is_recorded_once() {
        let store = InMemoryStore::new();
        let plan_id = Uuid::new_v4();

        assert!(store.record_occurrence(occurrence(plan_id)).await.unwrap());
        assert!(!store.record_occurrence(occurrence(plan_id)).await.unwrap());
        assert_eq!(store.count_occurrences().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn release_only_removes_matching_occurrence() {
        let store = InMemoryStore::new();
        let order_id = Uuid::new_v4();
        let mut recorded = occurrence(Uuid::new_v4());
        recorded.order_id = Some(order_id);
        let key = recorded.key;
        store.record_occurrence(recorded).await.unwrap();

        assert!(!store.release_occurrence(&key, Uuid::new_v4()).await.unwrap());
        assert_eq!(store.count_occurrences().await.unwrap(), 1);

        assert!(store.release_occurrence(&key, order_id).await.unwrap());
        assert!(store.get_occurrence(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_of_unknown_order_is_not_found() {
        let store = InMemoryStore::new();
        let err = store.update_order(sample_order(Uuid::new_v4())).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn unavailable_store_reports_retryable_failure() {
        let store = InMemoryStore::new();
        store.set_available(false);

        let err = store.get_order(Uuid::new_v4()).await.unwrap_err();
        assert!(err.is_retryable());

        store.set_available(true);
        assert!(store.get_order(Uuid::new_v4()).await.unwrap().is_none());
    }
}
