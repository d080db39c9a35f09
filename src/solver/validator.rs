//! Schedule validation independent of the routing engine, plus the repair
//! loop that turns stale schedules into usable warm starts.

use chrono::Duration;
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

use crate::services::location_cache::LocationCache;
use crate::types::{
    Problem, Route, ScheduledVisit, ScheduledVisitKind, Solution, VisitId,
};

/// The canonical vocabulary of hard failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    MissingInfo,
    AbsentCarer,
    BreakViolation,
    LateArrival,
    TooManyCarers,
    NotEnoughCarers,
    Moved,
    Orphaned,
}

/// One validation finding, attributed to a visit and carer when known.
#[derive(Debug, Clone, Error)]
#[error("{code:?} (visit {visit:?}, carer {carer:?}): {message}")]
pub struct ValidationError {
    pub code: ErrorCode,
    pub visit: Option<VisitId>,
    pub carer: Option<String>,
    pub message: String,
}

impl ValidationError {
    fn new(
        code: ErrorCode,
        visit: Option<VisitId>,
        carer: Option<&str>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            code,
            visit,
            carer: carer.map(str::to_string),
            message: message.into(),
        }
    }
}

/// Checks finished or imported schedules against the hard constraints.
pub struct RouteValidator {
    adjustment: Duration,
    /// A planned start further than this from the visit's preferred time
    /// is inconsistent with the problem and reported as moved.
    visit_time_window: Duration,
}

impl RouteValidator {
    pub fn new(adjustment: Duration, visit_time_window: Duration) -> Self {
        Self {
            adjustment,
            visit_time_window,
        }
    }

    fn is_assigned_and_active(visit: &ScheduledVisit) -> bool {
        visit.carer().is_some() && visit.kind() != ScheduledVisitKind::Cancelled
    }

    /// All violations in the given routes. An empty result means the
    /// schedule satisfies every hard constraint.
    pub fn validate(
        &self,
        routes: &[Route],
        problem: &Problem,
        cache: &LocationCache,
    ) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // Visit multiplicity across routes.
        let mut serving_routes: HashMap<VisitId, Vec<&Route>> = HashMap::new();
        for route in routes {
            for visit in route.visits() {
                if !Self::is_assigned_and_active(visit) {
                    continue;
                }
                if let Some(calendar) = visit.calendar_visit() {
                    let entry = serving_routes.entry(calendar.id()).or_default();
                    if !entry
                        .iter()
                        .any(|known| known.carer() == route.carer())
                    {
                        entry.push(route);
                    }
                }
            }
        }
        for (visit_id, serving) in &serving_routes {
            let Some(calendar) = problem.visit(*visit_id) else {
                continue;
            };
            if serving.len() > calendar.carer_count() {
                for route in serving.iter().skip(calendar.carer_count()) {
                    errors.push(ValidationError::new(
                        ErrorCode::TooManyCarers,
                        Some(*visit_id),
                        Some(route.carer().sap_number()),
                        format!(
                            "visit requires {} carers but {} routes serve it",
                            calendar.carer_count(),
                            serving.len()
                        ),
                    ));
                }
            } else if calendar.carer_count() == 2 && serving.len() == 1 {
                errors.push(ValidationError::new(
                    ErrorCode::NotEnoughCarers,
                    Some(*visit_id),
                    Some(serving[0].carer().sap_number()),
                    "two-carer visit appears in a single route",
                ));
            }
        }

        for route in routes {
            self.validate_route(route, problem, cache, &mut errors);
        }
        errors
    }

    fn validate_route(
        &self,
        route: &Route,
        problem: &Problem,
        cache: &LocationCache,
        errors: &mut Vec<ValidationError>,
    ) {
        let carer = route.carer();
        let mut previous: Option<&ScheduledVisit> = None;

        for visit in route.visits() {
            if !Self::is_assigned_and_active(visit) {
                continue;
            }
            let visit_id = visit.calendar_visit().map(|calendar| calendar.id());

            if visit.kind() == ScheduledVisitKind::Invalid {
                errors.push(ValidationError::new(
                    ErrorCode::Orphaned,
                    visit_id,
                    Some(carer.sap_number()),
                    "assigned visit no longer exists in the problem",
                ));
                continue;
            }

            let Some(calendar) = visit.calendar_visit() else {
                errors.push(ValidationError::new(
                    ErrorCode::MissingInfo,
                    visit_id,
                    Some(carer.sap_number()),
                    "scheduled visit lacks its calendar entry",
                ));
                continue;
            };
            if visit.location().is_none() {
                errors.push(ValidationError::new(
                    ErrorCode::MissingInfo,
                    Some(calendar.id()),
                    Some(carer.sap_number()),
                    "scheduled visit lacks a resolved location",
                ));
                continue;
            }

            let drift = (visit.datetime() - calendar.datetime()).abs();
            if drift > self.visit_time_window {
                errors.push(ValidationError::new(
                    ErrorCode::Moved,
                    Some(calendar.id()),
                    Some(carer.sap_number()),
                    format!(
                        "planned at {} but the visit moved to {}",
                        visit.datetime(),
                        calendar.datetime()
                    ),
                ));
                continue;
            }

            let start = visit.datetime();
            let finish = start + visit.duration();
            match problem.diary(carer, start.date()) {
                None => {
                    errors.push(ValidationError::new(
                        ErrorCode::AbsentCarer,
                        Some(calendar.id()),
                        Some(carer.sap_number()),
                        "carer has no diary for the visit day",
                    ));
                    continue;
                }
                Some(diary) => {
                    let covering = diary.events().iter().find(|event| {
                        event.begin() - self.adjustment <= start
                            && start < event.end() + self.adjustment
                    });
                    match covering {
                        None => {
                            errors.push(ValidationError::new(
                                ErrorCode::AbsentCarer,
                                Some(calendar.id()),
                                Some(carer.sap_number()),
                                "no diary event covers the visit start",
                            ));
                            continue;
                        }
                        Some(event) => {
                            if finish > event.end() + self.adjustment {
                                errors.push(ValidationError::new(
                                    ErrorCode::BreakViolation,
                                    Some(calendar.id()),
                                    Some(carer.sap_number()),
                                    "service runs into the carer's break",
                                ));
                                continue;
                            }
                        }
                    }
                }
            }

            if let Some(prev) = previous {
                let travel = match (prev.location(), visit.location()) {
                    (Some(from), Some(to)) => cache.distance(from, to),
                    _ => 0,
                };
                let arrival = prev.datetime() + prev.duration() + Duration::seconds(travel);
                if arrival > start {
                    errors.push(ValidationError::new(
                        ErrorCode::LateArrival,
                        Some(calendar.id()),
                        Some(carer.sap_number()),
                        format!("earliest arrival {} is after the start {}", arrival, start),
                    ));
                    continue;
                }
            }
            previous = Some(visit);
        }
    }

    /// Validate and fail fast; the refinement stage accepts no defects.
    pub fn validate_full(
        &self,
        routes: &[Route],
        problem: &Problem,
        cache: &LocationCache,
    ) -> Result<(), Vec<ValidationError>> {
        let errors = self.validate(routes, problem, cache);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Warm-start repair: release or demote the offending visits until the
    /// schedule validates cleanly. Returns the number of repair passes.
    ///
    /// The loop is monotone (every pass only releases assignments or fixes
    /// stale fields), so a repaired schedule re-validates with no errors
    /// and a second application changes nothing.
    pub fn repair(
        &self,
        solution: &mut Solution,
        problem: &Problem,
        cache: &LocationCache,
    ) -> usize {
        solution.update_from(problem);

        let mut passes = 0;
        let max_passes = solution.visits().len() + 1;
        loop {
            let routes = solution.to_routes(problem);
            let errors = self.validate(&routes, problem, cache);
            if errors.is_empty() || passes >= max_passes {
                break;
            }
            passes += 1;
            debug!(pass = passes, errors = errors.len(), "repairing schedule");

            for error in errors {
                let target = solution.visits_mut().iter_mut().find(|visit| {
                    visit.calendar_visit().map(|calendar| calendar.id()) == error.visit
                        && match (&error.carer, visit.carer()) {
                            (Some(expected), Some(actual)) => {
                                expected == actual.sap_number()
                            }
                            (None, _) => true,
                            (Some(_), None) => false,
                        }
                });
                let Some(visit) = target else {
                    continue;
                };
                match error.code {
                    ErrorCode::Moved => {
                        if let Some(datetime) =
                            visit.calendar_visit().map(|calendar| calendar.datetime())
                        {
                            visit.set_datetime(datetime);
                        }
                        visit.set_kind(ScheduledVisitKind::Moved);
                        visit.release_carer();
                    }
                    ErrorCode::Orphaned | ErrorCode::MissingInfo => {
                        visit.set_kind(ScheduledVisitKind::Invalid);
                        visit.release_carer();
                    }
                    ErrorCode::AbsentCarer
                    | ErrorCode::BreakViolation
                    | ErrorCode::LateArrival
                    | ErrorCode::TooManyCarers
                    | ErrorCode::NotEnoughCarers => {
                        visit.release_carer();
                    }
                }
            }
        }
        passes
    }
}
