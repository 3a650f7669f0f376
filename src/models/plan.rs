use chrono::{DateTime, NaiveDate, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::geo::GeoPoint;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanEntry {
    #[serde(default)]
    pub name: Option<String>,
    pub address: String,
    pub lat: f64,
    pub lng: f64,
    pub day: Weekday,
    /// Wall-clock time in UTC, `HH:MM` or `HH:MM:SS`.
    pub time: String,
}

impl PlanEntry {
    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lng)
    }

    pub fn time_of_day(&self) -> Result<NaiveTime, AppError> {
        NaiveTime::parse_from_str(&self.time, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(&self.time, "%H:%M:%S"))
            .map_err(|err| AppError::InvalidInput(format!("invalid time {:?}: {err}", self.time)))
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.address.trim().is_empty() {
            return Err(AppError::InvalidInput("entry address cannot be empty".to_string()));
        }
        self.point().validate("entry")?;
        self.time_of_day()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecurringPlan {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: Option<String>,
    pub entries: Vec<PlanEntry>,
    pub created_at: DateTime<Utc>,
}

/// Plan row as persisted: entries live in a single JSON column.
#[derive(Debug, Clone)]
pub struct StoredPlan {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: Option<String>,
    pub entries_json: String,
    pub created_at: DateTime<Utc>,
}

impl StoredPlan {
    pub fn encode(plan: &RecurringPlan) -> Result<Self, AppError> {
        let entries_json = serde_json::to_string(&plan.entries)
            .map_err(|err| AppError::Internal(format!("failed to encode plan entries: {err}")))?;

        Ok(Self {
            id: plan.id,
            owner_id: plan.owner_id,
            name: plan.name.clone(),
            entries_json,
            created_at: plan.created_at,
        })
    }

    pub fn decode(&self) -> Result<RecurringPlan, AppError> {
        let entries: Vec<PlanEntry> = serde_json::from_str(&self.entries_json).map_err(|err| {
            AppError::Internal(format!("plan {} has unreadable entries: {err}", self.id))
        })?;

        Ok(RecurringPlan {
            id: self.id,
            owner_id: self.owner_id,
            name: self.name.clone(),
            entries,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OccurrenceKey {
    pub plan_id: Uuid,
    pub entry_index: usize,
    pub occurrence_date: NaiveDate,
}

/// Record that a plan entry fired for a given date. Written once, never updated.
#[derive(Debug, Clone)]
pub struct PlanOccurrence {
    pub key: OccurrenceKey,
    pub order_id: Option<Uuid>,
    pub executed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatePlanRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub entries: Vec<PlanEntry>,
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveTime, Utc, Weekday};
    use uuid::Uuid;

    use super::{PlanEntry, RecurringPlan, StoredPlan};

    fn entry(time: &str) -> PlanEntry {
        PlanEntry {
            name: Some("work".to_string()),
            address: "Northern Ave 1".to_string(),
            lat: 40.18,
            lng: 44.51,
            day: Weekday::Mon,
            time: time.to_string(),
        }
    }

    #[test]
    fn time_of_day_accepts_minutes_and_seconds() {
        assert_eq!(
            entry("08:00").time_of_day().unwrap(),
            NaiveTime::from_hms_opt(8, 0, 0).unwrap()
        );
        assert_eq!(
            entry("17:45:30").time_of_day().unwrap(),
            NaiveTime::from_hms_opt(17, 45, 30).unwrap()
        );
        assert!(entry("8am").time_of_day().is_err());
    }

    #[test]
    fn stored_plan_decodes_what_it_encoded() {
        let plan = RecurringPlan {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            name: Some("commute".to_string()),
            entries: vec![entry("08:00"), entry("18:30")],
            created_at: Utc::now(),
        };

        let decoded = StoredPlan::encode(&plan).unwrap().decode().unwrap();
        assert_eq!(decoded.entries, plan.entries);
        assert_eq!(decoded.owner_id, plan.owner_id);
    }

    #[test]
    fn corrupt_entries_column_fails_to_decode() {
        let stored = StoredPlan {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            name: None,
            entries_json: "{not json".to_string(),
            created_at: Utc::now(),
        };
        assert!(stored.decode().is_err());
    }
}
