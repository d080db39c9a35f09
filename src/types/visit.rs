//! Planned calendar visits.

use chrono::{Duration, NaiveDateTime};
use std::fmt;

use super::{Address, Location};

/// Stable identifier of a calendar visit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VisitId(pub i64);

impl fmt::Display for VisitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A planned appointment for a service user.
///
/// The preferred start is `datetime`; the solver may schedule the visit
/// anywhere inside the symmetric window `[datetime - w, datetime + w)`.
#[derive(Debug, Clone, PartialEq)]
pub struct CalendarVisit {
    id: VisitId,
    service_user: i64,
    address: Address,
    location: Option<Location>,
    datetime: NaiveDateTime,
    duration: Duration,
    carer_count: usize,
    tasks: Vec<i64>,
}

impl CalendarVisit {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: VisitId,
        service_user: i64,
        address: Address,
        location: Option<Location>,
        datetime: NaiveDateTime,
        duration: Duration,
        carer_count: usize,
        mut tasks: Vec<i64>,
    ) -> Self {
        tasks.sort_unstable();
        tasks.dedup();
        Self {
            id,
            service_user,
            address,
            location,
            datetime,
            duration,
            carer_count,
            tasks,
        }
    }

    pub fn id(&self) -> VisitId {
        self.id
    }

    pub fn service_user(&self) -> i64 {
        self.service_user
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn location(&self) -> Option<Location> {
        self.location
    }

    /// Attach a resolved location; the loader calls this once the owning
    /// service user is known.
    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    pub fn datetime(&self) -> NaiveDateTime {
        self.datetime
    }

    pub fn with_datetime(mut self, datetime: NaiveDateTime) -> Self {
        self.datetime = datetime;
        self
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn carer_count(&self) -> usize {
        self.carer_count
    }

    /// Override the slot count; the team stage downgrades two-carer visits
    /// to single slots scheduled against merged team diaries.
    pub fn with_carer_count(mut self, carer_count: usize) -> Self {
        self.carer_count = carer_count;
        self
    }

    pub fn tasks(&self) -> &[i64] {
        &self.tasks
    }

    /// The symmetric time window around the preferred start.
    pub fn time_window(&self, width: Duration) -> (NaiveDateTime, NaiveDateTime) {
        (self.datetime - width, self.datetime + width)
    }
}

impl fmt::Display for CalendarVisit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "visit {} for user {} at {}",
            self.id, self.service_user, self.datetime
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn visit() -> CalendarVisit {
        CalendarVisit::new(
            VisitId(42),
            7,
            Address::default(),
            None,
            NaiveDate::from_ymd_opt(2017, 2, 1)
                .unwrap()
                .and_hms_opt(10, 0, 0)
                .unwrap(),
            Duration::minutes(30),
            1,
            vec![2, 1, 2],
        )
    }

    #[test]
    fn test_time_window_is_symmetric() {
        let v = visit();
        let (begin, end) = v.time_window(Duration::minutes(90));
        assert_eq!(v.datetime() - begin, Duration::minutes(90));
        assert_eq!(end - v.datetime(), Duration::minutes(90));
    }

    #[test]
    fn test_tasks_sorted_and_deduplicated() {
        assert_eq!(visit().tasks(), &[1, 2]);
    }

    #[test]
    fn test_with_carer_count_roundtrip() {
        let v = visit().with_carer_count(2);
        assert_eq!(v.carer_count(), 2);
        let single = v.with_carer_count(1);
        assert_eq!(single.carer_count(), 1);
    }
}
