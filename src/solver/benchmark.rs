//! Synthetic benchmark problems for solver comparisons.

use chrono::{Duration, NaiveDate};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::types::{
    Address, CalendarVisit, Carer, Diary, Event, ExtendedServiceUser, Location, Problem,
    ServiceUser, Transport, VisitId,
};

/// Shape of a generated benchmark instance.
#[derive(Debug, Clone)]
pub struct BenchmarkSpec {
    pub service_users: usize,
    pub visits: usize,
    pub carers: usize,
    /// Fraction of visits requiring two carers.
    pub double_visit_share: f64,
    pub date: NaiveDate,
    pub seed: u64,
}

impl Default for BenchmarkSpec {
    fn default() -> Self {
        Self {
            service_users: 20,
            visits: 40,
            carers: 8,
            double_visit_share: 0.15,
            date: NaiveDate::from_ymd_opt(2017, 2, 1).expect("valid date"),
            seed: 1,
        }
    }
}

/// Generate a random but reproducible problem: homes scattered around a
/// city centre, morning-to-evening diaries, visits spread over the day.
pub fn generate_problem(spec: &BenchmarkSpec) -> Problem {
    let mut rng = StdRng::seed_from_u64(spec.seed);
    let centre = (53.4, -1.45);

    let mut users = Vec::with_capacity(spec.service_users);
    for key in 0..spec.service_users as i64 {
        let location = Location::from_degrees(
            centre.0 + rng.gen_range(-0.05..0.05),
            centre.1 + rng.gen_range(-0.08..0.08),
        );
        users.push(ExtendedServiceUser::new(
            ServiceUser::new(key + 1, Address::default(), location),
            vec![],
        ));
    }

    let mut visits = Vec::with_capacity(spec.visits);
    for key in 0..spec.visits as i64 {
        let user = &users[rng.gen_range(0..users.len())];
        let hour = rng.gen_range(7..20);
        let minute = [0, 15, 30, 45][rng.gen_range(0..4)];
        let duration = Duration::minutes([30, 45, 60][rng.gen_range(0..3)]);
        let carer_count = if rng.gen_bool(spec.double_visit_share) {
            2
        } else {
            1
        };
        visits.push(CalendarVisit::new(
            VisitId(key + 1),
            user.key(),
            Address::default(),
            Some(user.location()),
            spec.date
                .and_hms_opt(hour, minute, 0)
                .expect("valid benchmark time"),
            duration,
            carer_count,
            vec![],
        ));
    }

    let mut carers = Vec::with_capacity(spec.carers);
    for index in 0..spec.carers {
        let start_hour = rng.gen_range(7..10);
        let shift_hours = rng.gen_range(6..10);
        let diary = Diary::new(
            spec.date,
            vec![Event::new(
                spec.date
                    .and_hms_opt(start_hour, 0, 0)
                    .expect("valid shift start"),
                spec.date
                    .and_hms_opt((start_hour + shift_hours).min(23), 0, 0)
                    .expect("valid shift end"),
            )],
        );
        carers.push((
            Carer::new(format!("9{:05}", index + 1), Transport::Foot, vec![]),
            vec![diary],
        ));
    }

    Problem::new(users, visits, carers)
}
