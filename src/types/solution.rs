//! Daily schedules and their JSON representation.

use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::{
    CalendarVisit, Carer, Problem, Route, ScheduledVisit, ScheduledVisitKind, Transport, VisitId,
};

/// An ordered list of scheduled visits covering one day.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Solution {
    visits: Vec<ScheduledVisit>,
}

impl Solution {
    pub fn new(visits: Vec<ScheduledVisit>) -> Self {
        Self { visits }
    }

    pub fn visits(&self) -> &[ScheduledVisit] {
        &self.visits
    }

    pub fn visits_mut(&mut self) -> &mut Vec<ScheduledVisit> {
        &mut self.visits
    }

    pub fn is_empty(&self) -> bool {
        self.visits.is_empty()
    }

    /// Project the solution into one route per carer of the problem, in the
    /// problem's carer order. Unassigned visits do not appear in any route.
    pub fn to_routes(&self, problem: &Problem) -> Vec<Route> {
        let mut routes: Vec<Route> = problem
            .carers()
            .iter()
            .map(|(carer, _)| Route::empty(carer.clone()))
            .collect();
        let index: HashMap<&str, usize> = problem
            .carers()
            .iter()
            .enumerate()
            .map(|(position, (carer, _))| (carer.sap_number(), position))
            .collect();

        for visit in &self.visits {
            let Some(carer) = visit.carer() else {
                continue;
            };
            if let Some(&position) = index.get(carer.sap_number()) {
                routes[position].visits_mut().push(visit.clone());
            }
        }

        for route in &mut routes {
            route.visits_mut().sort_by_key(ScheduledVisit::datetime);
        }
        routes
    }

    /// Re-resolve every scheduled visit against `problem`.
    ///
    /// Visits whose calendar entry disappeared are marked invalid for the
    /// validator to flag; visits whose entry moved in time keep the stale
    /// planned start so the validator can report them as moved. Matching is
    /// by visit id.
    pub fn update_from(&mut self, problem: &Problem) {
        let by_id: HashMap<VisitId, &CalendarVisit> = problem
            .visits()
            .iter()
            .map(|visit| (visit.id(), visit))
            .collect();

        for scheduled in &mut self.visits {
            let Some(id) = scheduled.calendar_visit().map(CalendarVisit::id) else {
                continue;
            };
            match by_id.get(&id) {
                Some(current) => scheduled.set_calendar_visit((*current).clone()),
                None => scheduled.set_kind(ScheduledVisitKind::Invalid),
            }
        }
    }

    /// Count of visits per lifecycle kind; used in progress logs.
    pub fn debug_status(&self) -> HashMap<&'static str, usize> {
        let mut counts = HashMap::new();
        for visit in &self.visits {
            *counts.entry(visit.kind().as_str()).or_insert(0) += 1;
        }
        counts
    }

    /// Parse a solution file in the planner exchange shape.
    pub fn from_json(raw: &str) -> Result<Self> {
        let file: SolutionFile = serde_json::from_str(raw).context("malformed solution file")?;

        let mut visits = Vec::with_capacity(file.visits.len());
        for entry in file.visits {
            let date: NaiveDate = entry
                .date
                .parse()
                .with_context(|| format!("invalid visit date {:?}", entry.date))?;
            let time: NaiveTime = entry
                .time
                .parse()
                .with_context(|| format!("invalid visit time {:?}", entry.time))?;
            let duration_seconds: i64 = entry
                .duration
                .trim()
                .parse()
                .with_context(|| format!("invalid visit duration {:?}", entry.duration))?;

            let kind = if entry.cancelled.unwrap_or(false) {
                ScheduledVisitKind::Cancelled
            } else {
                ScheduledVisitKind::Unknown
            };
            let carer = entry
                .carer
                .map(|carer| Carer::new(carer.sap_number, Transport::Foot, Vec::new()));
            let check_in = entry.check_in.as_deref().and_then(parse_timestamp);
            let check_out = entry.check_out.as_deref().and_then(parse_timestamp);

            // A skeleton calendar entry keeps the visit key; update_from
            // swaps in the problem's real entry when one still exists.
            let calendar_visit = entry.visit.map(|key| {
                CalendarVisit::new(
                    VisitId(key),
                    0,
                    crate::types::Address::default(),
                    None,
                    date.and_time(time),
                    Duration::seconds(duration_seconds),
                    1,
                    Vec::new(),
                )
            });

            visits.push(ScheduledVisit::from_parts(
                kind,
                carer,
                date.and_time(time),
                Duration::seconds(duration_seconds),
                check_in,
                check_out,
                calendar_visit,
            ));
        }

        Ok(Self { visits })
    }

    /// Serialise in the same exchange shape written back for planners.
    pub fn to_json(&self) -> Result<String> {
        let visits = self
            .visits
            .iter()
            .map(|visit| SolutionVisit {
                cancelled: match visit.kind() {
                    ScheduledVisitKind::Cancelled => Some(true),
                    _ => None,
                },
                carer: visit.carer().map(|carer| CarerRef {
                    sap_number: carer.sap_number().to_string(),
                }),
                check_in: visit.check_in().map(|t| t.to_string()),
                check_out: visit.check_out().map(|t| t.to_string()),
                date: visit.datetime().date().to_string(),
                time: visit.datetime().time().to_string(),
                duration: visit.duration().num_seconds().to_string(),
                visit: visit.calendar_visit().map(|v| v.id().0),
            })
            .collect();
        serde_json::to_string_pretty(&SolutionFile { visits }).context("serialising solution")
    }
}

fn parse_timestamp(raw: &str) -> Option<chrono::NaiveDateTime> {
    chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S"))
        .ok()
}

#[derive(Debug, Serialize, Deserialize)]
struct SolutionFile {
    visits: Vec<SolutionVisit>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SolutionVisit {
    #[serde(skip_serializing_if = "Option::is_none")]
    cancelled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    carer: Option<CarerRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    check_in: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    check_out: Option<String>,
    date: String,
    time: String,
    duration: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    visit: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CarerRef {
    sap_number: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "visits": [
            {
                "carer": {"sap_number": "100001"},
                "date": "2017-02-01",
                "time": "10:00:00",
                "duration": "1800",
                "visit": 7
            },
            {
                "cancelled": true,
                "date": "2017-02-01",
                "time": "14:00:00",
                "duration": "3600"
            }
        ]
    }"#;

    #[test]
    fn test_from_json_parses_carers_and_kinds() {
        let solution = Solution::from_json(SAMPLE).unwrap();
        assert_eq!(solution.visits().len(), 2);

        let first = &solution.visits()[0];
        assert_eq!(first.carer().unwrap().sap_number(), "100001");
        assert_eq!(first.duration(), Duration::minutes(30));
        assert_eq!(first.kind(), ScheduledVisitKind::Unknown);
        assert_eq!(
            first.calendar_visit().map(|calendar| calendar.id()),
            Some(VisitId(7))
        );

        let second = &solution.visits()[1];
        assert!(second.carer().is_none());
        assert_eq!(second.kind(), ScheduledVisitKind::Cancelled);
    }

    #[test]
    fn test_from_json_rejects_bad_duration() {
        let raw = r#"{"visits": [{"date": "2017-02-01", "time": "10:00:00", "duration": "soon"}]}"#;
        assert!(Solution::from_json(raw).is_err());
    }

    #[test]
    fn test_debug_status_counts_kinds() {
        let solution = Solution::from_json(SAMPLE).unwrap();
        let status = solution.debug_status();
        assert_eq!(status.get("unknown"), Some(&1));
        assert_eq!(status.get("cancelled"), Some(&1));
    }
}
