//! Solver-facing view of a problem: routing nodes, the scheduling horizon
//! and travel/service time lookups.

use anyhow::{bail, Result};
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::HashMap;

use crate::engine::{NodeIndex, VehicleIndex};
use crate::services::location_cache::{LocationCache, INFINITE_DISTANCE};
use crate::types::{CalendarVisit, Carer, Diary, Problem, VisitId};

/// Length of the scheduling horizon: one day plus a margin for shifts that
/// run past midnight.
pub const HORIZON_SECONDS: i64 = 26 * 3600;

/// Derived, immutable view shared by every solver in the pipeline.
///
/// Node 0 is the depot; each visit owns one node per required carer, so a
/// two-carer visit is represented twice. All solver times are seconds from
/// `horizon_start` (midnight of the scheduled day).
pub struct ProblemData {
    problem: Problem,
    schedule_date: NaiveDate,
    horizon_start: NaiveDateTime,
    node_visits: Vec<Option<VisitId>>,
    visit_nodes: HashMap<VisitId, Vec<NodeIndex>>,
    cache: LocationCache,
    dropped_visit_penalty: i64,
}

impl ProblemData {
    /// Build the node space over `problem`. The location cache must already
    /// cover every visit location; travel lookups never touch the routing
    /// engine again.
    pub fn new(problem: Problem, cache: LocationCache) -> Result<Self> {
        let Some(schedule_date) = problem.schedule_date() else {
            bail!("problem contains no visits");
        };
        if problem
            .visits()
            .iter()
            .any(|visit| visit.datetime().date() != schedule_date)
        {
            bail!("visits span across multiple days");
        }

        let mut node_visits: Vec<Option<VisitId>> = vec![None];
        let mut visit_nodes: HashMap<VisitId, Vec<NodeIndex>> = HashMap::new();
        for visit in problem.visits() {
            let mut nodes = Vec::with_capacity(visit.carer_count());
            for _ in 0..visit.carer_count() {
                nodes.push(NodeIndex(node_visits.len()));
                node_visits.push(Some(visit.id()));
            }
            visit_nodes.insert(visit.id(), nodes);
        }

        let largest = cache.largest_distances(3);
        let sum: i64 = largest.iter().sum();
        let dropped_visit_penalty = if sum > 0 { sum } else { 1 };

        let horizon_start = schedule_date
            .and_hms_opt(0, 0, 0)
            .expect("midnight is always a valid time");

        Ok(Self {
            problem,
            schedule_date,
            horizon_start,
            node_visits,
            visit_nodes,
            cache,
            dropped_visit_penalty,
        })
    }

    pub fn problem(&self) -> &Problem {
        &self.problem
    }

    pub fn cache(&self) -> &LocationCache {
        &self.cache
    }

    pub fn schedule_date(&self) -> NaiveDate {
        self.schedule_date
    }

    pub fn horizon_start(&self) -> NaiveDateTime {
        self.horizon_start
    }

    pub fn horizon(&self) -> i64 {
        HORIZON_SECONDS
    }

    /// Visit nodes plus the depot.
    pub fn node_count(&self) -> usize {
        self.node_visits.len()
    }

    pub fn vehicle_count(&self) -> usize {
        self.problem.carers().len()
    }

    pub fn carer(&self, vehicle: VehicleIndex) -> &Carer {
        &self.problem.carers()[vehicle.0].0
    }

    pub fn vehicle_of_carer(&self, carer: &Carer) -> Option<VehicleIndex> {
        self.problem
            .carers()
            .iter()
            .position(|(candidate, _)| candidate.sap_number() == carer.sap_number())
            .map(VehicleIndex)
    }

    pub fn diary(&self, vehicle: VehicleIndex) -> Option<&Diary> {
        self.problem
            .diary(self.carer(vehicle), self.schedule_date)
    }

    /// The visit a node stands for; the depot has none.
    pub fn visit_of_node(&self, node: NodeIndex) -> Option<&CalendarVisit> {
        self.node_visits[node.0]
            .and_then(|id| self.problem.visit(id))
    }

    pub fn visit_id_of_node(&self, node: NodeIndex) -> Option<VisitId> {
        self.node_visits[node.0]
    }

    /// All nodes of a visit; length equals the visit's carer count.
    pub fn nodes_of_visit(&self, id: VisitId) -> &[NodeIndex] {
        self.visit_nodes
            .get(&id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn seconds_from_horizon(&self, instant: NaiveDateTime) -> i64 {
        (instant - self.horizon_start).num_seconds()
    }

    pub fn time_from_seconds(&self, seconds: i64) -> NaiveDateTime {
        self.horizon_start + chrono::Duration::seconds(seconds)
    }

    /// Service duration of a node in seconds; zero at the depot.
    pub fn service_time(&self, node: NodeIndex) -> i64 {
        self.visit_of_node(node)
            .map(|visit| visit.duration().num_seconds())
            .unwrap_or(0)
    }

    /// Road travel time between two nodes. The depot is a synthetic route
    /// anchor with zero travel to and from every node.
    pub fn travel_time(&self, from: NodeIndex, to: NodeIndex) -> i64 {
        if from.is_depot() || to.is_depot() || from == to {
            return 0;
        }
        let from_location = self.visit_of_node(from).and_then(CalendarVisit::location);
        let to_location = self.visit_of_node(to).and_then(CalendarVisit::location);
        match (from_location, to_location) {
            (Some(a), Some(b)) if a == b => 0,
            (Some(a), Some(b)) => self.cache.distance(a, b),
            _ => INFINITE_DISTANCE,
        }
    }

    /// Penalty for leaving a visit unscheduled: the sum of the three
    /// largest travel times in the matrix, so one extra visit always beats
    /// saving a few detours.
    pub fn dropped_visit_penalty(&self) -> i64 {
        self.dropped_visit_penalty
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::routing::HaversineRouting;
    use crate::types::{
        Address, Diary, Event, ExtendedServiceUser, Location, ServiceUser, Transport,
    };
    use chrono::Duration;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2017, 2, 1).unwrap()
    }

    fn build_problem() -> (Problem, LocationCache) {
        let home_a = Location::from_degrees(53.43, -1.35);
        let home_b = Location::from_degrees(53.38, -1.47);
        let users = vec![
            ExtendedServiceUser::new(ServiceUser::new(1, Address::default(), home_a), vec![]),
            ExtendedServiceUser::new(ServiceUser::new(2, Address::default(), home_b), vec![]),
        ];
        let visits = vec![
            CalendarVisit::new(
                VisitId(10),
                1,
                Address::default(),
                Some(home_a),
                date().and_hms_opt(10, 0, 0).unwrap(),
                Duration::minutes(30),
                1,
                vec![],
            ),
            CalendarVisit::new(
                VisitId(11),
                2,
                Address::default(),
                Some(home_b),
                date().and_hms_opt(14, 0, 0).unwrap(),
                Duration::minutes(60),
                2,
                vec![],
            ),
        ];
        let carer = Carer::new("100001", Transport::Foot, vec![]);
        let diary = Diary::new(
            date(),
            vec![Event::new(
                date().and_hms_opt(8, 0, 0).unwrap(),
                date().and_hms_opt(18, 0, 0).unwrap(),
            )],
        );
        let problem = Problem::new(users, visits, vec![(carer, vec![diary])]);
        let cache = LocationCache::new(vec![home_a, home_b]);
        (problem, cache)
    }

    async fn build_data() -> ProblemData {
        let (problem, mut cache) = build_problem();
        cache.compute_all(&HaversineRouting::new()).await.unwrap();
        ProblemData::new(problem, cache).unwrap()
    }

    #[tokio::test]
    async fn test_two_carer_visit_gets_two_nodes() {
        let data = build_data().await;
        // Depot plus one node for the single visit, two for the double.
        assert_eq!(data.node_count(), 4);
        assert_eq!(data.nodes_of_visit(VisitId(10)).len(), 1);
        assert_eq!(data.nodes_of_visit(VisitId(11)).len(), 2);

        for &node in data.nodes_of_visit(VisitId(11)) {
            assert_eq!(data.visit_id_of_node(node), Some(VisitId(11)));
        }
    }

    #[tokio::test]
    async fn test_depot_has_no_visit_and_zero_times(){
        let data = build_data().await;
        assert!(data.visit_of_node(NodeIndex::DEPOT).is_none());
        assert_eq!(data.service_time(NodeIndex::DEPOT), 0);
        assert_eq!(data.travel_time(NodeIndex::DEPOT, NodeIndex(1)), 0);
        assert_eq!(data.travel_time(NodeIndex(1), NodeIndex::DEPOT), 0);
    }

    #[tokio::test]
    async fn test_travel_time_between_visit_nodes() {
        let data = build_data().await;
        let single = data.nodes_of_visit(VisitId(10))[0];
        let double = data.nodes_of_visit(VisitId(11))[0];
        assert!(data.travel_time(single, double) > 0);
        assert_eq!(
            data.travel_time(single, double),
            data.travel_time(double, single)
        );

        // Sibling nodes share a location.
        let pair = data.nodes_of_visit(VisitId(11));
        assert_eq!(data.travel_time(pair[0], pair[1]), 0);
    }

    #[tokio::test]
    async fn test_seconds_conversion_round_trips() {
        let data = build_data().await;
        let instant = date().and_hms_opt(10, 30, 0).unwrap();
        let seconds = data.seconds_from_horizon(instant);
        assert_eq!(seconds, 10 * 3600 + 30 * 60);
        assert_eq!(data.time_from_seconds(seconds), instant);
        assert_eq!(data.horizon(), 26 * 3600);
    }

    #[tokio::test]
    async fn test_dropped_visit_penalty_positive() {
        let data = build_data().await;
        assert!(data.dropped_visit_penalty() > 0);
    }

    #[test]
    fn test_rejects_multi_day_problems() {
        let (problem, cache) = build_problem();
        let mut visits = problem.visits().to_vec();
        visits[1] = visits[1]
            .clone()
            .with_datetime(date().succ_opt().unwrap().and_hms_opt(9, 0, 0).unwrap());
        let spanning = Problem::new(
            problem.service_users().to_vec(),
            visits,
            problem.carers().to_vec(),
        );
        assert!(ProblemData::new(spanning, cache).is_err());
    }
}
