//! Visits as they appear in a produced or imported schedule.

use chrono::{Duration, NaiveDateTime};
use std::fmt;

use super::{CalendarVisit, Carer, Location};

/// Lifecycle state of a scheduled visit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduledVisitKind {
    Unknown,
    Ok,
    Cancelled,
    /// The underlying calendar visit changed time or place since the
    /// schedule was produced.
    Moved,
    Invalid,
}

impl ScheduledVisitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Ok => "ok",
            Self::Cancelled => "cancelled",
            Self::Moved => "moved",
            Self::Invalid => "invalid",
        }
    }
}

/// A visit placed in a schedule: which carer, when, and for how long.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledVisit {
    kind: ScheduledVisitKind,
    carer: Option<Carer>,
    datetime: NaiveDateTime,
    duration: Duration,
    check_in: Option<NaiveDateTime>,
    check_out: Option<NaiveDateTime>,
    calendar_visit: Option<CalendarVisit>,
}

impl ScheduledVisit {
    pub fn new(
        kind: ScheduledVisitKind,
        carer: Option<Carer>,
        calendar_visit: CalendarVisit,
    ) -> Self {
        Self {
            kind,
            carer,
            datetime: calendar_visit.datetime(),
            duration: calendar_visit.duration(),
            check_in: None,
            check_out: None,
            calendar_visit: Some(calendar_visit),
        }
    }

    /// A scheduled visit reconstructed from a solution file, possibly
    /// without a matching calendar visit.
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        kind: ScheduledVisitKind,
        carer: Option<Carer>,
        datetime: NaiveDateTime,
        duration: Duration,
        check_in: Option<NaiveDateTime>,
        check_out: Option<NaiveDateTime>,
        calendar_visit: Option<CalendarVisit>,
    ) -> Self {
        Self {
            kind,
            carer,
            datetime,
            duration,
            check_in,
            check_out,
            calendar_visit,
        }
    }

    pub fn kind(&self) -> ScheduledVisitKind {
        self.kind
    }

    pub fn set_kind(&mut self, kind: ScheduledVisitKind) {
        self.kind = kind;
    }

    pub fn carer(&self) -> Option<&Carer> {
        self.carer.as_ref()
    }

    /// Detach the carer; the repair loop releases visits this way before
    /// re-solving.
    pub fn release_carer(&mut self) {
        self.carer = None;
    }

    pub fn datetime(&self) -> NaiveDateTime {
        self.datetime
    }

    pub fn set_datetime(&mut self, datetime: NaiveDateTime) {
        self.datetime = datetime;
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn check_in(&self) -> Option<NaiveDateTime> {
        self.check_in
    }

    pub fn check_out(&self) -> Option<NaiveDateTime> {
        self.check_out
    }

    pub fn calendar_visit(&self) -> Option<&CalendarVisit> {
        self.calendar_visit.as_ref()
    }

    pub fn set_calendar_visit(&mut self, visit: CalendarVisit) {
        self.calendar_visit = Some(visit);
    }

    pub fn location(&self) -> Option<Location> {
        self.calendar_visit.as_ref().and_then(CalendarVisit::location)
    }

    pub fn service_user(&self) -> Option<i64> {
        self.calendar_visit.as_ref().map(CalendarVisit::service_user)
    }

    pub fn carer_count(&self) -> usize {
        self.calendar_visit
            .as_ref()
            .map(CalendarVisit::carer_count)
            .unwrap_or(1)
    }
}

impl fmt::Display for ScheduledVisit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.calendar_visit, &self.carer) {
            (Some(visit), Some(carer)) => {
                write!(f, "{} ({}) assigned to {}", visit, self.kind.as_str(), carer)
            }
            (Some(visit), None) => write!(f, "{} ({}) unassigned", visit, self.kind.as_str()),
            _ => write!(f, "visit at {} ({})", self.datetime, self.kind.as_str()),
        }
    }
}
