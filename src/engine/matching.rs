use crate::models::driver::Driver;
use crate::models::order::Order;

/// Picks a driver for a pending order from a directory snapshot.
pub trait MatchingPolicy: Send + Sync {
    fn select<'a>(&self, order: &Order, candidates: &'a [Driver]) -> Option<&'a Driver>;
}

/// First approved, active driver in directory order. No ranking.
#[derive(Debug, Default)]
pub struct FirstAvailable;

impl MatchingPolicy for FirstAvailable {
    fn select<'a>(&self, _order: &Order, candidates: &'a [Driver]) -> Option<&'a Driver> {
        candidates.iter().find(|driver| driver.is_candidate())
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::{FirstAvailable, MatchingPolicy};
    use crate::models::driver::DriverStatus;
    use crate::test_support::{sample_driver, sample_order};

    #[test]
    fn picks_first_candidate_in_snapshot_order() {
        let order = sample_order(Uuid::new_v4());
        let mut unapproved = sample_driver("Unapproved");
        unapproved.approved = false;
        let first = sample_driver("First");
        let second = sample_driver("Second");

        let snapshot = vec![unapproved, first.clone(), second];
        let chosen = FirstAvailable.select(&order, &snapshot).unwrap();
        assert_eq!(chosen.id, first.id);
    }

    #[test]
    fn no_candidates_means_no_match() {
        let order = sample_order(Uuid::new_v4());
        let mut offline = sample_driver("Offline");
        offline.status = DriverStatus::Offline;

        assert!(FirstAvailable.select(&order, &[]).is_none());
        assert!(FirstAvailable.select(&order, &[offline]).is_none());
    }
}
