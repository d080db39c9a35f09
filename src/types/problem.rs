//! Problem definition and the JSON problem-file loader.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::Deserialize;
use std::collections::HashMap;
use thiserror::Error;
use tracing::warn;

use super::{
    Address, CalendarVisit, Carer, Diary, Event, ExtendedServiceUser, Location, ServiceUser,
    Transport, VisitId,
};

/// Errors raised while reading a problem file.
#[derive(Debug, Error)]
pub enum ProblemError {
    #[error("malformed problem file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid {field} value {value:?}")]
    InvalidField { field: &'static str, value: String },

    #[error("problem contains no visits")]
    NoVisits,

    #[error("visit {0} references unknown service user {1}")]
    UnknownServiceUser(VisitId, i64),
}

/// A full scheduling problem: who needs visits, who can serve them, when.
#[derive(Debug, Clone, Default)]
pub struct Problem {
    service_users: Vec<ExtendedServiceUser>,
    visits: Vec<CalendarVisit>,
    carers: Vec<(Carer, Vec<Diary>)>,
}

impl Problem {
    pub fn new(
        service_users: Vec<ExtendedServiceUser>,
        visits: Vec<CalendarVisit>,
        carers: Vec<(Carer, Vec<Diary>)>,
    ) -> Self {
        Self {
            service_users,
            visits,
            carers,
        }
    }

    pub fn service_users(&self) -> &[ExtendedServiceUser] {
        &self.service_users
    }

    pub fn visits(&self) -> &[CalendarVisit] {
        &self.visits
    }

    pub fn carers(&self) -> &[(Carer, Vec<Diary>)] {
        &self.carers
    }

    pub fn service_user(&self, key: i64) -> Option<&ExtendedServiceUser> {
        self.service_users.iter().find(|user| user.key() == key)
    }

    pub fn visit(&self, id: VisitId) -> Option<&CalendarVisit> {
        self.visits.iter().find(|visit| visit.id() == id)
    }

    /// The diary of `carer` on `date`, if one was supplied.
    pub fn diary(&self, carer: &Carer, date: NaiveDate) -> Option<&Diary> {
        self.carers
            .iter()
            .find(|(candidate, _)| candidate == carer)
            .and_then(|(_, diaries)| diaries.iter().find(|diary| diary.date() == date))
    }

    /// The date being scheduled, taken from the first visit.
    pub fn schedule_date(&self) -> Option<NaiveDate> {
        self.visits.first().map(|visit| visit.datetime().date())
    }

    /// Restrict the problem to a single date: visits on that day and the
    /// matching diaries only.
    pub fn for_date(&self, date: NaiveDate) -> Problem {
        let visits = self
            .visits
            .iter()
            .filter(|visit| visit.datetime().date() == date)
            .cloned()
            .collect();
        let carers = self
            .carers
            .iter()
            .map(|(carer, diaries)| {
                (
                    carer.clone(),
                    diaries
                        .iter()
                        .filter(|diary| diary.date() == date)
                        .cloned()
                        .collect(),
                )
            })
            .collect();
        Problem {
            service_users: self.service_users.clone(),
            visits,
            carers,
        }
    }

    /// Compare the total visit workload against available carer hours and
    /// log a warning when demand clearly exceeds supply. A fully dropped
    /// plan is still a valid answer, so this never fails the load.
    pub fn check_admissibility(&self, date: NaiveDate) {
        let demand: Duration = self
            .visits
            .iter()
            .filter(|visit| visit.datetime().date() == date)
            .fold(Duration::zero(), |acc, visit| {
                acc + visit.duration() * visit.carer_count() as i32
            });
        let supply: Duration = self
            .carers
            .iter()
            .filter_map(|(carer, _)| self.diary(carer, date))
            .fold(Duration::zero(), |acc, diary| acc + diary.duration());

        if demand > supply {
            warn!(
                date = %date,
                demand_hours = demand.num_minutes() as f64 / 60.0,
                supply_hours = supply.num_minutes() as f64 / 60.0,
                "visit workload exceeds available carer hours; some visits will be dropped"
            );
        }
    }

    /// Parse a problem file.
    pub fn from_json(raw: &str) -> Result<Self, ProblemError> {
        let file: ProblemFile = serde_json::from_str(raw)?;

        let mut service_users = Vec::with_capacity(file.service_users.len());
        for raw_user in file.service_users {
            let latitude = raw_user.location.latitude.parse_f64();
            let longitude = raw_user.location.longitude.parse_f64();
            let location = match (latitude, longitude) {
                (Some(lat), Some(lng)) => Location::from_degrees(lat, lng),
                _ => {
                    return Err(ProblemError::InvalidField {
                        field: "location",
                        value: format!("{:?}", raw_user.location),
                    })
                }
            };
            let preference = raw_user
                .carer_preference
                .into_iter()
                .map(|(carer, weight)| (carer.into_string(), weight))
                .collect();
            service_users.push(ExtendedServiceUser::new(
                ServiceUser::new(raw_user.key, raw_user.address, location),
                preference,
            ));
        }

        let user_locations: HashMap<i64, Location> = service_users
            .iter()
            .map(|user| (user.key(), user.location()))
            .collect();
        let user_addresses: HashMap<i64, Address> = service_users
            .iter()
            .map(|user| (user.key(), user.user().address().clone()))
            .collect();

        let mut visits = Vec::new();
        for group in file.visits {
            for raw_visit in group.visits {
                let id = VisitId(raw_visit.key);
                let location = user_locations
                    .get(&group.service_user)
                    .copied()
                    .ok_or(ProblemError::UnknownServiceUser(id, group.service_user))?;
                let address = user_addresses
                    .get(&group.service_user)
                    .cloned()
                    .unwrap_or_default();
                let date = parse_date(&raw_visit.date)?;
                let time = parse_time(&raw_visit.time)?;
                let duration_seconds =
                    raw_visit
                        .duration
                        .parse_i64()
                        .ok_or_else(|| ProblemError::InvalidField {
                            field: "duration",
                            value: raw_visit.duration.as_str().to_string(),
                        })?;
                visits.push(
                    CalendarVisit::new(
                        id,
                        group.service_user,
                        address,
                        None,
                        date.and_time(time),
                        Duration::seconds(duration_seconds),
                        raw_visit.carer_count.unwrap_or(1).max(1),
                        raw_visit.tasks.unwrap_or_default(),
                    )
                    .with_location(location),
                );
            }
        }
        if visits.is_empty() {
            return Err(ProblemError::NoVisits);
        }

        let mut carers = Vec::with_capacity(file.carers.len());
        for raw_group in file.carers {
            let transport = match raw_group.carer.mobility.as_deref() {
                Some("vehicle") | Some("car") => Transport::Vehicle,
                _ => Transport::Foot,
            };
            let carer = Carer::new(
                raw_group.carer.sap_number.into_string(),
                transport,
                raw_group.carer.skills.unwrap_or_default(),
            );

            let mut diaries = Vec::with_capacity(raw_group.diaries.len());
            for raw_diary in raw_group.diaries {
                let date = parse_date(&raw_diary.date)?;
                let mut events = Vec::with_capacity(raw_diary.events.len());
                for raw_event in raw_diary.events {
                    events.push(Event::new(
                        parse_datetime(&raw_event.begin)?,
                        parse_datetime(&raw_event.end)?,
                    ));
                }
                diaries.push(Diary::new(date, events));
            }
            carers.push((carer, diaries));
        }

        Ok(Self::new(service_users, visits, carers))
    }
}

fn parse_date(raw: &str) -> Result<NaiveDate, ProblemError> {
    raw.parse().map_err(|_| ProblemError::InvalidField {
        field: "date",
        value: raw.to_string(),
    })
}

fn parse_time(raw: &str) -> Result<NaiveTime, ProblemError> {
    NaiveTime::parse_from_str(raw, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
        .map_err(|_| ProblemError::InvalidField {
            field: "time",
            value: raw.to_string(),
        })
}

fn parse_datetime(raw: &str) -> Result<NaiveDateTime, ProblemError> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S"))
        .map_err(|_| ProblemError::InvalidField {
            field: "datetime",
            value: raw.to_string(),
        })
}

// Problem files produced by different exports disagree on whether numeric
// fields are numbers or strings; accept both.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Loose {
    Text(String),
    Integer(i64),
    Float(f64),
}

impl Loose {
    fn as_str(&self) -> &str {
        match self {
            Loose::Text(text) => text,
            _ => "",
        }
    }

    fn parse_f64(&self) -> Option<f64> {
        match self {
            Loose::Text(text) => text.trim().parse().ok(),
            Loose::Integer(value) => Some(*value as f64),
            Loose::Float(value) => Some(*value),
        }
    }

    fn into_string(self) -> String {
        match self {
            Loose::Text(text) => text,
            Loose::Integer(value) => value.to_string(),
            Loose::Float(value) => value.to_string(),
        }
    }

    fn parse_i64(&self) -> Option<i64> {
        match self {
            Loose::Text(text) => text.trim().parse().ok(),
            Loose::Integer(value) => Some(*value),
            Loose::Float(value) => Some(*value as i64),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProblemFile {
    #[serde(default)]
    service_users: Vec<RawServiceUser>,
    #[serde(default)]
    visits: Vec<RawVisitGroup>,
    #[serde(default)]
    carers: Vec<RawCarerGroup>,
}

#[derive(Debug, Deserialize)]
struct RawServiceUser {
    key: i64,
    #[serde(default)]
    address: Address,
    location: RawLocation,
    #[serde(default)]
    carer_preference: Vec<(Loose, f64)>,
}

#[derive(Debug, Deserialize)]
struct RawLocation {
    latitude: Loose,
    longitude: Loose,
}

#[derive(Debug, Deserialize)]
struct RawVisitGroup {
    service_user: i64,
    visits: Vec<RawVisit>,
}

#[derive(Debug, Deserialize)]
struct RawVisit {
    key: i64,
    date: String,
    time: String,
    duration: Loose,
    carer_count: Option<usize>,
    tasks: Option<Vec<i64>>,
}

#[derive(Debug, Deserialize)]
struct RawCarerGroup {
    carer: RawCarer,
    #[serde(default)]
    diaries: Vec<RawDiary>,
}

#[derive(Debug, Deserialize)]
struct RawCarer {
    sap_number: Loose,
    #[serde(default)]
    mobility: Option<String>,
    #[serde(default)]
    skills: Option<Vec<i64>>,
}

#[derive(Debug, Deserialize)]
struct RawDiary {
    date: String,
    #[serde(default)]
    events: Vec<RawEvent>,
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    begin: String,
    end: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "service_users": [
            {
                "key": 7,
                "address": {"road": "High Street", "house_number": "12", "city": "Sheffield", "post_code": "S1 1AA"},
                "location": {"latitude": "53.430252", "longitude": "-1.354444"},
                "carer_preference": [["100001", 0.8]]
            }
        ],
        "visits": [
            {
                "service_user": 7,
                "visits": [
                    {"key": 1, "date": "2017-02-01", "time": "10:00:00", "duration": "1800"},
                    {"key": 2, "date": "2017-02-01", "time": "18:00:00", "duration": "3600", "carer_count": 2, "tasks": [5]}
                ]
            }
        ],
        "carers": [
            {
                "carer": {"sap_number": "100001", "skills": [5]},
                "diaries": [
                    {
                        "date": "2017-02-01",
                        "events": [{"begin": "2017-02-01T08:00:00", "end": "2017-02-01T16:00:00"}]
                    }
                ]
            }
        ]
    }"#;

    #[test]
    fn test_load_sample_problem() {
        let problem = Problem::from_json(SAMPLE).unwrap();

        assert_eq!(problem.service_users().len(), 1);
        assert_eq!(problem.visits().len(), 2);
        assert_eq!(problem.carers().len(), 1);

        let first = problem.visit(VisitId(1)).unwrap();
        assert_eq!(first.duration(), Duration::minutes(30));
        assert_eq!(first.carer_count(), 1);
        assert!(first.location().is_some());

        let second = problem.visit(VisitId(2)).unwrap();
        assert_eq!(second.carer_count(), 2);
        assert_eq!(second.tasks(), &[5]);
    }

    #[test]
    fn test_load_resolves_diary() {
        let problem = Problem::from_json(SAMPLE).unwrap();
        let (carer, _) = &problem.carers()[0];
        assert_eq!(carer.sap_number(), "100001");
        assert!(carer.has_skills(&[5]));

        let date = NaiveDate::from_ymd_opt(2017, 2, 1).unwrap();
        let diary = problem.diary(carer, date).unwrap();
        assert_eq!(diary.duration(), Duration::hours(8));
        assert!(problem
            .diary(carer, NaiveDate::from_ymd_opt(2017, 2, 2).unwrap())
            .is_none());
    }

    #[test]
    fn test_load_rejects_empty_visit_list() {
        let raw = r#"{"service_users": [], "visits": [], "carers": []}"#;
        assert!(matches!(
            Problem::from_json(raw),
            Err(ProblemError::NoVisits)
        ));
    }

    #[test]
    fn test_load_rejects_unknown_service_user() {
        let raw = r#"{
            "service_users": [],
            "visits": [{"service_user": 9, "visits": [{"key": 1, "date": "2017-02-01", "time": "10:00:00", "duration": "60"}]}],
            "carers": []
        }"#;
        assert!(matches!(
            Problem::from_json(raw),
            Err(ProblemError::UnknownServiceUser(VisitId(1), 9))
        ));
    }

    #[test]
    fn test_schedule_date_from_first_visit() {
        let problem = Problem::from_json(SAMPLE).unwrap();
        assert_eq!(
            problem.schedule_date(),
            Some(NaiveDate::from_ymd_opt(2017, 2, 1).unwrap())
        );
    }
}
