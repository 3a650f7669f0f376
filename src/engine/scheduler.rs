use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Utc, Weekday};
use futures::FutureExt;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::engine::lifecycle::OrderService;
use crate::error::AppError;
use crate::models::order::{OrderAction, OrderDraft};
use crate::models::plan::{OccurrenceKey, PlanEntry, PlanOccurrence, RecurringPlan, StoredPlan};
use crate::observability::metrics::Metrics;

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub interval: StdDuration,
    /// How far ahead of its time an occurrence may fire.
    pub lookahead: Duration,
    /// How long after its time an occurrence may still fire.
    pub grace: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            interval: StdDuration::from_secs(30),
            lookahead: Duration::seconds(60),
            grace: Duration::seconds(120),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub plans: usize,
    pub materialized: usize,
    pub already_fired: usize,
    pub failed: usize,
}

enum EntryOutcome {
    NotDue,
    AlreadyFired,
    Materialized,
}

/// First `day`/`time` instant at or after `not_before`.
pub fn next_occurrence(day: Weekday, time: NaiveTime, not_before: DateTime<Utc>) -> DateTime<Utc> {
    let days_ahead = (i64::from(day.num_days_from_monday())
        - i64::from(not_before.weekday().num_days_from_monday()))
    .rem_euclid(7);
    let date = not_before.date_naive() + Duration::days(days_ahead);

    let candidate = Utc.from_utc_datetime(&date.and_time(time));
    if candidate < not_before {
        candidate + Duration::days(7)
    } else {
        candidate
    }
}

/// The occurrence inside `[now - grace, now + lookahead]`, if any.
pub fn due_occurrence(
    day: Weekday,
    time: NaiveTime,
    now: DateTime<Utc>,
    grace: Duration,
    lookahead: Duration,
) -> Option<DateTime<Utc>> {
    let next = next_occurrence(day, time, now - grace);
    (next <= now + lookahead).then_some(next)
}

pub struct RecurrenceScheduler {
    service: Arc<OrderService>,
    settings: SchedulerSettings,
    metrics: Metrics,
}

impl RecurrenceScheduler {
    pub fn new(service: Arc<OrderService>, settings: SchedulerSettings, metrics: Metrics) -> Self {
        Self {
            service,
            settings,
            metrics,
        }
    }

    /// Ticks until `shutdown` flips to `true` or its sender is dropped.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.settings.interval.as_secs(), "recurrence scheduler started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.tick(Utc::now()).await {
                Ok(report) => {
                    self.metrics.scheduler_ticks_total.with_label_values(&["ok"]).inc();
                    if report.materialized > 0 || report.failed > 0 {
                        info!(
                            plans = report.plans,
                            materialized = report.materialized,
                            failed = report.failed,
                            "scheduler tick finished"
                        );
                    } else {
                        debug!(plans = report.plans, "scheduler tick finished");
                    }
                }
                Err(err) => {
                    self.metrics.scheduler_ticks_total.with_label_values(&["error"]).inc();
                    error!(error = %err, retryable = err.is_retryable(), "scheduler tick failed");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.settings.interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("recurrence scheduler stopped");
    }

    /// One pass over all plans as of `now`. Fails only if plans cannot be loaded.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickReport, AppError> {
        let plans = self.service.store().list_plans().await?;
        let mut report = TickReport {
            plans: plans.len(),
            ..Default::default()
        };

        for stored in &plans {
            let outcome = AssertUnwindSafe(self.process_plan(stored, now, &mut report))
                .catch_unwind()
                .await;

            if outcome.is_err() {
                report.failed += 1;
                error!(plan_id = %stored.id, "plan processing panicked; continuing");
            }
        }

        Ok(report)
    }

    async fn process_plan(&self, stored: &StoredPlan, now: DateTime<Utc>, report: &mut TickReport) {
        let plan = match stored.decode() {
            Ok(plan) => plan,
            Err(err) => {
                report.failed += 1;
                warn!(plan_id = %stored.id, error = %err, "skipping undecodable plan");
                return;
            }
        };

        for (index, entry) in plan.entries.iter().enumerate() {
            match self.process_entry(&plan, index, entry, now).await {
                Ok(EntryOutcome::NotDue) => {}
                Ok(EntryOutcome::AlreadyFired) => report.already_fired += 1,
                Ok(EntryOutcome::Materialized) => report.materialized += 1,
                Err(err) => {
                    report.failed += 1;
                    warn!(plan_id = %plan.id, entry_index = index, error = %err, "plan entry failed");
                }
            }
        }
    }

    async fn process_entry(
        &self,
        plan: &RecurringPlan,
        index: usize,
        entry: &PlanEntry,
        now: DateTime<Utc>,
    ) -> Result<EntryOutcome, AppError> {
        let time = entry.time_of_day()?;
        let Some(occurrence) = due_occurrence(entry.day, time, now, self.settings.grace, self.settings.lookahead)
        else {
            return Ok(EntryOutcome::NotDue);
        };

        let order_id = Uuid::new_v4();
        let key = OccurrenceKey {
            plan_id: plan.id,
            entry_index: index,
            occurrence_date: occurrence.date_naive(),
        };

        let recorded = self
            .service
            .store()
            .record_occurrence(PlanOccurrence {
                key,
                order_id: Some(order_id),
                executed_at: now,
            })
            .await?;
        if !recorded {
            return Ok(EntryOutcome::AlreadyFired);
        }

        let draft = OrderDraft {
            action: OrderAction::ScheduledRide,
            pickup: Some(entry.point()),
            pickup_address: Some(entry.address.clone()),
            destination: Some(entry.point()),
            destination_address: Some(entry.address.clone()),
            ..Default::default()
        };

        // Guard goes in before the order; a failed creation hands the slot back.
        let order = match self
            .service
            .request_order_at(order_id, plan.owner_id, draft, now)
            .await
        {
            Ok(order) => order,
            Err(err) => {
                self.release_unless_created(&key, order_id).await;
                return Err(err);
            }
        };

        self.metrics.occurrences_materialized_total.inc();
        info!(
            plan_id = %plan.id,
            entry_index = index,
            occurrence = %occurrence,
            order_id = %order.id,
            status = %order.status,
            "recurring occurrence materialized"
        );

        Ok(EntryOutcome::Materialized)
    }

    async fn release_unless_created(&self, key: &OccurrenceKey, order_id: Uuid) {
        let store = self.service.store();
        match store.get_order(order_id).await {
            Ok(Some(_)) => {}
            Ok(None) => match store.release_occurrence(key, order_id).await {
                Ok(_) => debug!(plan_id = %key.plan_id, entry_index = key.entry_index, "occurrence released for retry"),
                Err(err) => {
                    warn!(plan_id = %key.plan_id, entry_index = key.entry_index, error = %err, "failed to release occurrence")
                }
            },
            Err(err) => {
                warn!(plan_id = %key.plan_id, entry_index = key.entry_index, error = %err, "failed to check occurrence order")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration as StdDuration;

    use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
    use serde_json::Value;
    use tokio::sync::watch;
    use uuid::Uuid;

    use super::{due_occurrence, next_occurrence, RecurrenceScheduler, SchedulerSettings};
    use crate::hub::Role;
    use crate::models::order::OrderStatus;
    use crate::models::plan::{CreatePlanRequest, OccurrenceKey, PlanEntry, StoredPlan};
    use crate::observability::metrics::Metrics;
    use crate::store::OrderStore;
    use crate::test_support::{add_ready_driver, channel_transport, fixture, next_frame, Fixture};

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, s).unwrap()
    }

    fn monday_entry(time: &str) -> PlanEntry {
        PlanEntry {
            name: Some("office".to_string()),
            address: "Republic Square".to_string(),
            lat: 40.1777,
            lng: 44.5126,
            day: Weekday::Mon,
            time: time.to_string(),
        }
    }

    fn scheduler(fx: &Fixture) -> RecurrenceScheduler {
        RecurrenceScheduler::new(fx.service.clone(), SchedulerSettings::default(), Metrics::new())
    }

    async fn commute_plan(fx: &Fixture, owner: Uuid) -> Uuid {
        fx.service
            .create_plan(
                owner,
                CreatePlanRequest {
                    name: Some("commute".to_string()),
                    entries: vec![monday_entry("08:00")],
                },
            )
            .await
            .unwrap()
            .id
    }

    #[test]
    fn next_occurrence_rolls_to_following_week_once_passed() {
        let eight = NaiveTime::from_hms_opt(8, 0, 0).unwrap();

        // 2024-01-01 is a Monday.
        assert_eq!(next_occurrence(Weekday::Mon, eight, at(2024, 1, 1, 7, 0, 0)), at(2024, 1, 1, 8, 0, 0));
        assert_eq!(next_occurrence(Weekday::Mon, eight, at(2024, 1, 1, 8, 0, 0)), at(2024, 1, 1, 8, 0, 0));
        assert_eq!(next_occurrence(Weekday::Mon, eight, at(2024, 1, 1, 8, 0, 1)), at(2024, 1, 8, 8, 0, 0));
        assert_eq!(next_occurrence(Weekday::Wed, eight, at(2024, 1, 1, 9, 0, 0)), at(2024, 1, 3, 8, 0, 0));
        assert_eq!(next_occurrence(Weekday::Sun, eight, at(2024, 1, 1, 9, 0, 0)), at(2024, 1, 7, 8, 0, 0));
    }

    #[test]
    fn due_window_covers_grace_and_lookahead() {
        let eight = NaiveTime::from_hms_opt(8, 0, 0).unwrap();
        let grace = Duration::seconds(120);
        let lookahead = Duration::seconds(60);
        let due = |now| due_occurrence(Weekday::Mon, eight, now, grace, lookahead);

        assert_eq!(due(at(2024, 1, 1, 7, 59, 30)), Some(at(2024, 1, 1, 8, 0, 0)));
        assert_eq!(due(at(2024, 1, 1, 8, 0, 30)), Some(at(2024, 1, 1, 8, 0, 0)));
        assert_eq!(due(at(2024, 1, 1, 7, 58, 0)), None);
        assert_eq!(due(at(2024, 1, 1, 8, 5, 0)), None);
        assert_eq!(due(at(2024, 1, 2, 8, 0, 0)), None);
    }

    #[tokio::test]
    async fn due_entry_fires_exactly_once() {
        let fx = fixture();
        let owner = Uuid::new_v4();
        let plan_id = commute_plan(&fx, owner).await;
        let scheduler = scheduler(&fx);

        let report = scheduler.tick(at(2024, 1, 1, 8, 0, 30)).await.unwrap();
        assert_eq!(report.materialized, 1);
        assert_eq!(fx.store.count_orders().await.unwrap(), 1);
        assert_eq!(fx.store.count_occurrences().await.unwrap(), 1);

        let report = scheduler.tick(at(2024, 1, 1, 8, 0, 31)).await.unwrap();
        assert_eq!(report.materialized, 0);
        assert_eq!(report.already_fired, 1);
        assert_eq!(fx.store.count_orders().await.unwrap(), 1);
        assert_eq!(fx.store.count_occurrences().await.unwrap(), 1);

        let key = OccurrenceKey {
            plan_id,
            entry_index: 0,
            occurrence_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        };
        let occurrence = fx.store.get_occurrence(&key).await.unwrap().unwrap();
        let order = fx
            .store
            .get_order(occurrence.order_id.unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(order.requester_id, owner);
        assert_eq!(order.status, OrderStatus::Searching);
    }

    #[tokio::test]
    async fn entry_outside_window_does_nothing() {
        let fx = fixture();
        commute_plan(&fx, Uuid::new_v4()).await;

        let report = scheduler(&fx).tick(at(2024, 1, 2, 8, 0, 0)).await.unwrap();
        assert_eq!(report.materialized, 0);
        assert_eq!(fx.store.count_orders().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn materialized_order_is_matched_and_announced() {
        let fx = fixture();
        let driver = add_ready_driver(&fx.drivers, "Morning").await;
        let owner = Uuid::new_v4();
        commute_plan(&fx, owner).await;

        let (transport, mut frames) = channel_transport();
        fx.hub.connect(owner, Role::Rider, transport);

        scheduler(&fx).tick(at(2024, 1, 1, 7, 59, 45)).await.unwrap();

        let finding: Value = next_frame(&mut frames).await;
        assert_eq!(finding["event"], "carFinding");
        let found: Value = next_frame(&mut frames).await;
        assert_eq!(found["event"], "carFound");
        assert_eq!(found["data"]["driver"]["id"], driver.id.to_string());
    }

    #[tokio::test]
    async fn broken_plan_does_not_block_others() {
        let fx = fixture();
        fx.store
            .insert_plan(StoredPlan {
                id: Uuid::new_v4(),
                owner_id: Uuid::new_v4(),
                name: None,
                entries_json: "[{\"broken\":".to_string(),
                created_at: Utc::now() - Duration::days(1),
            })
            .await
            .unwrap();

        let mut bad_time = monday_entry("08:00");
        bad_time.time = "eight".to_string();
        let mixed = crate::models::plan::RecurringPlan {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            name: None,
            entries: vec![bad_time, monday_entry("08:00")],
            created_at: Utc::now(),
        };
        fx.store.insert_plan(StoredPlan::encode(&mixed).unwrap()).await.unwrap();
        commute_plan(&fx, Uuid::new_v4()).await;

        let report = scheduler(&fx).tick(at(2024, 1, 1, 8, 0, 0)).await.unwrap();
        assert_eq!(report.plans, 3);
        assert_eq!(report.failed, 2);
        assert_eq!(report.materialized, 2);
    }

    #[tokio::test]
    async fn store_outage_fails_tick_and_next_tick_recovers() {
        let fx = fixture();
        commute_plan(&fx, Uuid::new_v4()).await;
        let scheduler = scheduler(&fx);

        fx.store.set_available(false);
        assert!(scheduler.tick(at(2024, 1, 1, 8, 0, 0)).await.is_err());

        fx.store.set_available(true);
        let report = scheduler.tick(at(2024, 1, 1, 8, 0, 30)).await.unwrap();
        assert_eq!(report.materialized, 1);
    }

    #[tokio::test]
    async fn directory_outage_is_retried_on_next_tick() {
        let fx = fixture();
        commute_plan(&fx, Uuid::new_v4()).await;
        let scheduler = scheduler(&fx);

        fx.drivers.set_available(false);
        let report = scheduler.tick(at(2024, 1, 1, 8, 0, 0)).await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(fx.store.count_orders().await.unwrap(), 0);
        assert_eq!(fx.store.count_occurrences().await.unwrap(), 0);

        fx.drivers.set_available(true);
        let report = scheduler.tick(at(2024, 1, 1, 8, 0, 30)).await.unwrap();
        assert_eq!(report.materialized, 1);
        assert_eq!(report.already_fired, 0);
        assert_eq!(fx.store.count_orders().await.unwrap(), 1);
        assert_eq!(fx.store.count_occurrences().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn run_loop_stops_on_shutdown() {
        let fx = fixture();
        let scheduler = Arc::new(RecurrenceScheduler::new(
            fx.service.clone(),
            SchedulerSettings {
                interval: StdDuration::from_millis(10),
                ..Default::default()
            },
            Metrics::new(),
        ));
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(scheduler.run(rx));
        tokio::time::sleep(StdDuration::from_millis(50)).await;
        tx.send(true).unwrap();

        tokio::time::timeout(StdDuration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
