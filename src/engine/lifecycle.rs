use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::directory::DriverDirectory;
use crate::engine::locks::OrderLocks;
use crate::engine::matching::{FirstAvailable, MatchingPolicy};
use crate::engine::pricing::{self, PricingConfig, Quote};
use crate::error::AppError;
use crate::geo::GeoPoint;
use crate::hub::{events, RealtimeHub, Role};
use crate::models::driver::Driver;
use crate::models::order::{AcceptOrder, Estimate, EstimateRequest, Order, OrderDraft, OrderStatus};
use crate::models::plan::{CreatePlanRequest, RecurringPlan, StoredPlan};
use crate::notify::{self, NotificationEgress};
use crate::observability::metrics::Metrics;
use crate::store::OrderStore;

pub const MIN_RATING: u8 = 1;
pub const MAX_RATING: u8 = 5;

#[derive(Debug, Clone, Deserialize)]
pub struct RateOrder {
    pub rating: u8,
    #[serde(default)]
    pub review: Option<String>,
}

pub struct OrderService {
    store: Arc<dyn OrderStore>,
    drivers: Arc<dyn DriverDirectory>,
    hub: Arc<RealtimeHub>,
    egress: Arc<dyn NotificationEgress>,
    policy: Arc<dyn MatchingPolicy>,
    pricing: PricingConfig,
    locks: OrderLocks,
    metrics: Metrics,
}

impl OrderService {
    pub fn new(
        store: Arc<dyn OrderStore>,
        drivers: Arc<dyn DriverDirectory>,
        hub: Arc<RealtimeHub>,
        egress: Arc<dyn NotificationEgress>,
        pricing: PricingConfig,
        metrics: Metrics,
    ) -> Self {
        Self {
            store,
            drivers,
            hub,
            egress,
            policy: Arc::new(FirstAvailable),
            pricing,
            locks: OrderLocks::new(),
            metrics,
        }
    }

    pub fn store(&self) -> &Arc<dyn OrderStore> {
        &self.store
    }

    pub fn estimate(&self, request: &EstimateRequest) -> Result<Estimate, AppError> {
        let pickup = request
            .pickup
            .ok_or_else(|| AppError::InvalidInput("pickup coordinates required".to_string()))?;
        let destination = request
            .destination
            .ok_or_else(|| AppError::InvalidInput("destination coordinates required".to_string()))?;
        let vehicle_class = self.pricing.resolve_class(request.vehicle_class.as_ref())?;

        pricing::estimate(
            &self.pricing,
            &Quote {
                pickup,
                destination,
                vehicle_class: &vehicle_class,
                tariff: request.tariff,
                pet: request.pet,
                child_seat: request.child_seat,
            },
        )
    }

    pub async fn request_order(&self, requester_id: Uuid, draft: OrderDraft) -> Result<Order, AppError> {
        self.request_order_at(Uuid::new_v4(), requester_id, draft, Utc::now())
            .await
    }

    /// Creation path shared by interactive requests and the recurrence scheduler.
    pub async fn request_order_at(
        &self,
        order_id: Uuid,
        requester_id: Uuid,
        draft: OrderDraft,
        now: DateTime<Utc>,
    ) -> Result<Order, AppError> {
        let pickup = draft
            .pickup
            .ok_or_else(|| AppError::InvalidInput("pickup coordinates required".to_string()))?;
        let (destination, destination_address) = draft.resolved_destination();
        let destination =
            destination.ok_or_else(|| AppError::InvalidInput("destination coordinates required".to_string()))?;
        for stop in &draft.stops {
            stop.point().validate("stop")?;
        }

        let vehicle_class = self.pricing.resolve_class(draft.vehicle_class.as_ref())?;
        let estimate = pricing::estimate(
            &self.pricing,
            &Quote {
                pickup,
                destination,
                vehicle_class: &vehicle_class,
                tariff: draft.tariff,
                pet: draft.pet,
                child_seat: draft.child_seat,
            },
        )?;

        let deferred = draft.scheduled_for.is_some_and(|at| at > now);
        let order = Order {
            id: order_id,
            action: draft.action,
            requester_id,
            driver_id: None,
            driver: None,
            pickup,
            pickup_address: draft.pickup_address,
            destination,
            destination_address,
            stops: draft.stops,
            vehicle_class,
            tariff: draft.tariff,
            pet: draft.pet,
            child_seat: draft.child_seat,
            payment_method: draft.payment_method,
            package_details: draft.package_details,
            estimate,
            status: if deferred {
                OrderStatus::Scheduled
            } else {
                OrderStatus::Searching
            },
            scheduled_for: draft.scheduled_for,
            created_at: now,
            completed_at: None,
            cancelled_at: None,
            cancel_reason: None,
            last_location: None,
            rating: None,
            review: None,
        };

        let _guard = self.locks.acquire(order.id).await;

        if deferred {
            let order = self.store.insert_order(order).await?;
            self.record_created(&order);
            return Ok(order);
        }

        let candidates = self.drivers.available_drivers().await?;
        let order = self.store.insert_order(order).await?;
        self.record_created(&order);

        self.hub
            .notify_order(&order, events::CAR_FINDING, &json!({ "status": order.status }));

        self.attempt_match(order, &candidates).await
    }

    pub async fn get_order(&self, order_id: Uuid, caller_id: Uuid) -> Result<Order, AppError> {
        let order = self.load(order_id).await?;
        if !order.is_party(caller_id) {
            return Err(AppError::Forbidden(format!("order {} belongs to another rider", order_id)));
        }
        Ok(order)
    }

    /// Applies the rider's finalized geometry, re-prices and tries to match.
    pub async fn accept_order(
        &self,
        order_id: Uuid,
        caller_id: Uuid,
        accept: AcceptOrder,
    ) -> Result<Order, AppError> {
        let _guard = self.locks.acquire(order_id).await;
        let mut order = self.load(order_id).await?;

        if order.requester_id != caller_id {
            return Err(AppError::Forbidden(format!("order {} belongs to another rider", order_id)));
        }
        if !matches!(order.status, OrderStatus::Searching | OrderStatus::Assigned) {
            return Err(AppError::InvalidState(format!(
                "order {} cannot be accepted while {}",
                order_id, order.status
            )));
        }

        match (accept.from_lat, accept.from_lng) {
            (Some(lat), Some(lng)) => {
                let pickup = GeoPoint::new(lat, lng);
                pickup.validate("pickup")?;
                order.pickup = pickup;
            }
            (None, None) => {}
            _ => {
                return Err(AppError::InvalidInput(
                    "from_lat and from_lng must be given together".to_string(),
                ));
            }
        }

        if let Some(last) = accept.stops.last() {
            for stop in &accept.stops {
                stop.point().validate("stop")?;
            }
            order.destination = last.point();
            order.destination_address = Some(last.address.clone());
            order.stops = accept.stops.clone();
        }

        if let Some(class) = accept.vehicle_class.as_ref() {
            order.vehicle_class = self.pricing.resolve_class(Some(class))?;
        }
        if accept.payment_method.is_some() {
            order.payment_method = accept.payment_method;
        }
        order.pet = accept.pet;
        order.child_seat = accept.child_seat;
        order.tariff = accept.tariff;

        order.estimate = pricing::estimate(
            &self.pricing,
            &Quote {
                pickup: order.pickup,
                destination: order.destination,
                vehicle_class: &order.vehicle_class,
                tariff: order.tariff,
                pet: order.pet,
                child_seat: order.child_seat,
            },
        )?;

        let candidates = self.drivers.available_drivers().await?;
        let order = self.store.update_order(order).await?;

        info!(order_id = %order.id, price = %order.estimate.price, "order accepted");
        self.attempt_match(order, &candidates).await
    }

    /// Cancelling a completed or already cancelled order is rejected.
    pub async fn cancel_order(
        &self,
        order_id: Uuid,
        caller_id: Uuid,
        reason: Option<String>,
    ) -> Result<Order, AppError> {
        let _guard = self.locks.acquire(order_id).await;
        let mut order = self.load(order_id).await?;

        if !order.is_party(caller_id) {
            return Err(AppError::Forbidden(format!("order {} belongs to another rider", order_id)));
        }

        order.transition(OrderStatus::Cancelled)?;
        order.cancelled_at = Some(Utc::now());
        order.cancel_reason = reason;

        let order = self.store.update_order(order).await?;
        self.record_transition(&order);

        self.hub.notify_order(
            &order,
            events::ORDER_CANCELLED,
            &json!({ "reason": order.cancel_reason, "cancelled_by": caller_id }),
        );
        if let Some(driver_id) = order.driver_id.filter(|id| *id != caller_id) {
            notify::dispatch(
                &self.egress,
                driver_id,
                "Trip cancelled".to_string(),
                format!("Order {} was cancelled", order.id),
            );
        }

        Ok(order)
    }

    pub async fn driver_accept(&self, order_id: Uuid, caller_id: Uuid) -> Result<Order, AppError> {
        let _guard = self.locks.acquire(order_id).await;
        let mut order = self.load(order_id).await?;

        if order.status != OrderStatus::Assigned {
            return Err(AppError::InvalidState(format!(
                "order {} cannot start a trip while {}",
                order_id, order.status
            )));
        }
        if order.driver_id != Some(caller_id) {
            return Err(AppError::Forbidden(format!("order {} is assigned to another driver", order_id)));
        }

        order.transition(OrderStatus::OnTrip)?;
        let order = self.store.update_order(order).await?;
        self.record_transition(&order);

        self.hub
            .notify_order(&order, events::TRIP_STARTED, &json!({ "status": order.status }));
        Ok(order)
    }

    pub async fn complete_order(&self, order_id: Uuid, caller_id: Uuid) -> Result<Order, AppError> {
        let _guard = self.locks.acquire(order_id).await;
        let mut order = self.load(order_id).await?;

        if !order.is_party(caller_id) {
            return Err(AppError::Forbidden(format!("order {} belongs to another rider", order_id)));
        }

        order.transition(OrderStatus::Completed)?;
        order.completed_at = Some(Utc::now());

        let order = self.store.update_order(order).await?;
        self.record_transition(&order);

        self.hub.notify_order(
            &order,
            events::TRIP_COMPLETED,
            &json!({ "price": order.estimate.price, "completed_at": order.completed_at }),
        );
        Ok(order)
    }

    pub async fn rate_order(&self, order_id: Uuid, caller_id: Uuid, rate: RateOrder) -> Result<Order, AppError> {
        if !(MIN_RATING..=MAX_RATING).contains(&rate.rating) {
            return Err(AppError::InvalidInput(format!(
                "rating must be between {MIN_RATING} and {MAX_RATING}"
            )));
        }

        let _guard = self.locks.acquire(order_id).await;
        let mut order = self.load(order_id).await?;

        if order.requester_id != caller_id {
            return Err(AppError::Forbidden("only the rider can rate this order".to_string()));
        }
        if order.status != OrderStatus::Completed {
            return Err(AppError::InvalidState("can rate only completed orders".to_string()));
        }
        if order.rating.is_some() {
            return Err(AppError::InvalidState(format!("order {} is already rated", order_id)));
        }

        order.rating = Some(rate.rating);
        order.review = rate.review;
        self.store.update_order(order).await
    }

    /// Stores the last known position and relays it to the other party.
    pub async fn update_live_location(
        &self,
        order_id: Uuid,
        caller_id: Uuid,
        point: GeoPoint,
    ) -> Result<Order, AppError> {
        point.validate("location")?;

        let _guard = self.locks.acquire(order_id).await;
        let mut order = self.load(order_id).await?;

        if !order.is_party(caller_id) {
            return Err(AppError::Forbidden(format!("order {} belongs to another rider", order_id)));
        }
        if order.status.is_terminal() {
            return Err(AppError::InvalidState(format!(
                "order {} is {}; live location closed",
                order_id, order.status
            )));
        }

        order.last_location = Some(point);
        let order = self.store.update_order(order).await?;

        self.hub.broadcast_location_for(&order, caller_id, point);
        Ok(order)
    }

    pub async fn create_plan(&self, owner_id: Uuid, request: CreatePlanRequest) -> Result<RecurringPlan, AppError> {
        if request.entries.is_empty() {
            return Err(AppError::InvalidInput("entries required".to_string()));
        }
        for entry in &request.entries {
            entry.validate()?;
        }

        let plan = RecurringPlan {
            id: Uuid::new_v4(),
            owner_id,
            name: request.name,
            entries: request.entries,
            created_at: Utc::now(),
        };

        self.store.insert_plan(StoredPlan::encode(&plan)?).await?;
        info!(plan_id = %plan.id, owner_id = %owner_id, entries = plan.entries.len(), "recurring plan created");
        Ok(plan)
    }

    pub async fn list_plans(&self, owner_id: Uuid) -> Result<Vec<RecurringPlan>, AppError> {
        let stored = self.store.list_plans_for_owner(owner_id).await?;

        Ok(stored
            .iter()
            .filter_map(|plan| match plan.decode() {
                Ok(plan) => Some(plan),
                Err(err) => {
                    warn!(plan_id = %plan.id, error = %err, "skipping unreadable plan");
                    None
                }
            })
            .collect())
    }

    async fn load(&self, order_id: Uuid) -> Result<Order, AppError> {
        self.store
            .get_order(order_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("order {} not found", order_id)))
    }

    async fn attempt_match(&self, order: Order, candidates: &[Driver]) -> Result<Order, AppError> {
        match self.policy.select(&order, candidates).cloned() {
            Some(driver) => self.assign(order, &driver).await,
            None => {
                self.metrics
                    .match_attempts_total
                    .with_label_values(&["no_driver"])
                    .inc();
                info!(order_id = %order.id, status = %order.status, "no driver available");
                Ok(order)
            }
        }
    }

    async fn assign(&self, mut order: Order, driver: &Driver) -> Result<Order, AppError> {
        let newly_assigned = order.driver_id != Some(driver.id);
        let displaced = order.driver_id.filter(|id| *id != driver.id);
        let was_searching = order.status == OrderStatus::Searching;

        if was_searching {
            order.transition(OrderStatus::Assigned)?;
        }
        order.driver_id = Some(driver.id);
        order.driver = Some(driver.summary());

        let order = self.store.update_order(order).await?;
        self.metrics
            .match_attempts_total
            .with_label_values(&["matched"])
            .inc();

        if was_searching {
            self.record_transition(&order);
        }
        if let Some(previous) = displaced {
            info!(order_id = %order.id, driver_id = %previous, "driver released from reassigned order");
            self.hub.notify_actor(
                previous,
                Role::Driver,
                order.id,
                events::ORDER_CANCELLED,
                &json!({ "reason": "reassigned", "cancelled_by": order.requester_id }),
            );
            notify::dispatch(
                &self.egress,
                previous,
                "Trip reassigned".to_string(),
                format!("Order {} was given to another driver", order.id),
            );
        }

        if newly_assigned {
            info!(order_id = %order.id, driver_id = %driver.id, "order assigned");

            self.hub
                .notify_order(&order, events::CAR_FOUND, &json!({ "driver": order.driver }));
            notify::dispatch(
                &self.egress,
                driver.id,
                "New trip".to_string(),
                format!("You have been assigned order {}", order.id),
            );
        }

        Ok(order)
    }

    fn record_created(&self, order: &Order) {
        self.metrics
            .orders_created_total
            .with_label_values(&[order.status.as_str()])
            .inc();
        info!(
            order_id = %order.id,
            requester_id = %order.requester_id,
            status = %order.status,
            price = %order.estimate.price,
            "order created"
        );
    }

    fn record_transition(&self, order: &Order) {
        self.metrics
            .order_transitions_total
            .with_label_values(&[order.status.as_str()])
            .inc();
    }
}
