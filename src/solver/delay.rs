//! Probabilistic lateness model: sampled service durations, per-node delay
//! tracking and the risk measures derived from them.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::debug;

use super::problem_data::ProblemData;
use crate::engine::{Assignment, NodeIndex};
use crate::types::VisitId;

/// Observed service durations per visit, in seconds.
#[derive(Debug, Clone, Default)]
pub struct VisitHistory {
    observations: HashMap<VisitId, Vec<i64>>,
}

impl VisitHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, visit: VisitId, duration_seconds: i64) {
        self.observations
            .entry(visit)
            .or_default()
            .push(duration_seconds);
    }

    pub fn observations(&self, visit: VisitId) -> &[i64] {
        self.observations
            .get(&visit)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }
}

/// Tracks, for every scenario and node, the lateness of the node relative
/// to its committed start when sampled service durations replace the
/// planned ones.
///
/// Delay vectors are recomputed lazily per committed path set and cached by
/// a signature of the route node sequences.
pub struct DelayTracker {
    /// `scenarios[s][node]` is the sampled service duration of `node`.
    scenarios: Vec<Vec<i64>>,
    travel: Vec<Vec<i64>>,
    cache: Mutex<HashMap<u64, Arc<DelayEstimate>>>,
}

/// Per-node delays across scenarios for one committed path set.
#[derive(Debug)]
pub struct DelayEstimate {
    /// `delays[node][s]` is the lateness of `node` in scenario `s`.
    delays: Vec<Vec<i64>>,
}

impl DelayEstimate {
    pub fn delays_of(&self, node: NodeIndex) -> &[i64] {
        &self.delays[node.0]
    }

    /// Probability, in percent, that the given node starts late.
    pub fn delay_probability(&self, node: NodeIndex) -> i64 {
        let samples = &self.delays[node.0];
        if samples.is_empty() {
            return 0;
        }
        let late = samples.iter().filter(|&&delay| delay > 0).count();
        (late as i64 * 100) / samples.len() as i64
    }

    /// The worst per-node delay probability over the given nodes.
    pub fn worst_delay_probability(&self, nodes: impl Iterator<Item = NodeIndex>) -> i64 {
        nodes
            .map(|node| self.delay_probability(node))
            .max()
            .unwrap_or(0)
    }

    /// Sum of positive delays across all nodes and scenarios.
    pub fn total_positive_delay(&self) -> i64 {
        self.delays
            .iter()
            .flat_map(|samples| samples.iter())
            .filter(|&&delay| delay > 0)
            .sum()
    }
}

impl DelayTracker {
    /// Sample `scenario_count` duration scenarios. Visits with recorded
    /// history draw uniformly from their observations; others keep the
    /// planned duration.
    pub fn new(
        data: &ProblemData,
        history: &VisitHistory,
        scenario_count: usize,
        seed: u64,
    ) -> Self {
        let node_count = data.node_count();
        let mut rng = StdRng::seed_from_u64(seed);

        let mut scenarios = Vec::with_capacity(scenario_count);
        for _ in 0..scenario_count {
            let mut durations = vec![0i64; node_count];
            for node in 1..node_count {
                let node = NodeIndex(node);
                let planned = data.service_time(node);
                durations[node.0] = match data.visit_id_of_node(node) {
                    Some(id) => {
                        let observed = history.observations(id);
                        if observed.is_empty() {
                            planned
                        } else {
                            observed[rng.gen_range(0..observed.len())]
                        }
                    }
                    None => planned,
                };
            }
            scenarios.push(durations);
        }

        let mut travel = vec![vec![0i64; node_count]; node_count];
        for from in 0..node_count {
            for to in 0..node_count {
                travel[from][to] = data.travel_time(NodeIndex(from), NodeIndex(to));
            }
        }

        Self {
            scenarios,
            travel,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn scenario_count(&self) -> usize {
        self.scenarios.len()
    }

    fn signature(assignment: &Assignment) -> u64 {
        let mut hasher = DefaultHasher::new();
        for route in &assignment.routes {
            route.len().hash(&mut hasher);
            for node in route {
                node.0.hash(&mut hasher);
            }
        }
        hasher.finish()
    }

    /// Delays of the committed assignment, computed once per path set.
    pub fn estimate(&self, assignment: &Assignment) -> Arc<DelayEstimate> {
        let signature = Self::signature(assignment);
        if let Some(cached) = self.cache.lock().get(&signature) {
            return Arc::clone(cached);
        }

        let node_count = self.travel.len();
        let scenario_count = self.scenarios.len();
        let mut delays = vec![vec![0i64; scenario_count]; node_count];

        for (vehicle, route) in assignment.routes.iter().enumerate() {
            if route.is_empty() {
                continue;
            }
            let schedule = &assignment.schedules[vehicle];
            for (s, durations) in self.scenarios.iter().enumerate() {
                let mut simulated_finish: Option<(NodeIndex, i64)> = None;
                for (position, &node) in route.iter().enumerate() {
                    let planned_start = schedule.starts[position];
                    let simulated_start = match simulated_finish {
                        None => planned_start,
                        Some((previous, finish)) => {
                            planned_start.max(finish + self.travel[previous.0][node.0])
                        }
                    };
                    delays[node.0][s] = simulated_start - planned_start;
                    simulated_finish = Some((node, simulated_start + durations[node.0]));
                }
            }
        }

        let estimate = Arc::new(DelayEstimate { delays });
        debug!(signature, "delay estimate computed");
        self.cache
            .lock()
            .insert(signature, Arc::clone(&estimate));
        estimate
    }
}

/// Exposes the worst per-node probability of a late start, in `[0, 100]`.
pub struct DelayProbabilityConstraint {
    tracker: Arc<DelayTracker>,
}

impl DelayProbabilityConstraint {
    pub fn new(tracker: Arc<DelayTracker>) -> Self {
        Self { tracker }
    }

    pub fn worst_delay_probability(&self, assignment: &Assignment) -> i64 {
        let estimate = self.tracker.estimate(assignment);
        let visited = assignment
            .routes
            .iter()
            .flat_map(|route| route.iter().copied());
        estimate.worst_delay_probability(visited)
    }
}

/// Scalar riskiness index: dropped visits weigh a thousand times a second
/// of expected lateness.
pub struct DelayRiskinessConstraint {
    tracker: Arc<DelayTracker>,
}

const DROPPED_VISIT_WEIGHT: i64 = 1000;

impl DelayRiskinessConstraint {
    pub fn new(tracker: Arc<DelayTracker>) -> Self {
        Self { tracker }
    }

    pub fn riskiness(&self, assignment: &Assignment) -> i64 {
        let estimate = self.tracker.estimate(assignment);
        DROPPED_VISIT_WEIGHT * assignment.dropped.len() as i64
            + estimate.total_positive_delay()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::location_cache::LocationCache;
    use crate::services::routing::HaversineRouting;
    use crate::types::{
        Address, CalendarVisit, Carer, Diary, Event, ExtendedServiceUser, Location, Problem,
        ServiceUser, Transport,
    };
    use chrono::{Duration, NaiveDate};

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2017, 2, 1).unwrap()
    }

    async fn build_data() -> ProblemData {
        let home = Location::from_degrees(53.43, -1.35);
        let away = Location::from_degrees(53.38, -1.47);
        let users = vec![
            ExtendedServiceUser::new(ServiceUser::new(1, Address::default(), home), vec![]),
            ExtendedServiceUser::new(ServiceUser::new(2, Address::default(), away), vec![]),
        ];
        let visits = vec![
            CalendarVisit::new(
                VisitId(1),
                1,
                Address::default(),
                Some(home),
                date().and_hms_opt(9, 0, 0).unwrap(),
                Duration::minutes(30),
                1,
                vec![],
            ),
            CalendarVisit::new(
                VisitId(2),
                2,
                Address::default(),
                Some(away),
                date().and_hms_opt(10, 0, 0).unwrap(),
                Duration::minutes(30),
                1,
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
        let mut cache = LocationCache::new(vec![home, away]);
        cache.compute_all(&HaversineRouting::new()).await.unwrap();
        ProblemData::new(problem, cache).unwrap()
    }

    fn tight_assignment(data: &ProblemData) -> Assignment {
        use crate::engine::RouteSchedule;

        // Visit 1 at 9:00 for 30 minutes, visit 2 right at the earliest
        // reachable instant, so any duration overrun delays it.
        let node_a = data.nodes_of_visit(VisitId(1))[0];
        let node_b = data.nodes_of_visit(VisitId(2))[0];
        let start_a = 9 * 3600;
        let start_b = start_a + 1800 + data.travel_time(node_a, node_b);
        Assignment {
            routes: vec![vec![node_a, node_b]],
            schedules: vec![RouteSchedule {
                nodes: vec![node_a, node_b],
                starts: vec![start_a, start_b],
                latest: vec![start_a, start_b],
                shift_start: 8 * 3600,
                shift_end: start_b + 1800,
                breaks: vec![],
                travel_cost: data.travel_time(node_a, node_b),
            }],
            dropped: vec![],
            cost: 0,
            travel_cost: 0,
            penalty_cost: 0,
            link_penalty_cost: 0,
            fixed_cost: 0,
        }
    }

    #[tokio::test]
    async fn test_no_history_means_no_delay() {
        let data = build_data().await;
        let tracker = DelayTracker::new(&data, &VisitHistory::new(), 20, 7);
        let assignment = tight_assignment(&data);

        let estimate = tracker.estimate(&assignment);
        let node_b = data.nodes_of_visit(VisitId(2))[0];
        assert_eq!(estimate.delay_probability(node_b), 0);
        assert_eq!(estimate.total_positive_delay(), 0);
    }

    #[tokio::test]
    async fn test_overrunning_history_delays_downstream_visit() {
        let data = build_data().await;
        let mut history = VisitHistory::new();
        // Visit 1 always overran by 10 minutes.
        history.record(VisitId(1), 2400);
        let tracker = DelayTracker::new(&data, &history, 20, 7);
        let assignment = tight_assignment(&data);

        let estimate = tracker.estimate(&assignment);
        let node_a = data.nodes_of_visit(VisitId(1))[0];
        let node_b = data.nodes_of_visit(VisitId(2))[0];

        // The first visit starts on time; the second is pushed 600s in
        // every scenario.
        assert_eq!(estimate.delay_probability(node_a), 0);
        assert_eq!(estimate.delay_probability(node_b), 100);
        assert_eq!(estimate.delays_of(node_b), vec![600; 20].as_slice());
    }

    #[tokio::test]
    async fn test_estimate_cached_by_path_signature() {
        let data = build_data().await;
        let tracker = DelayTracker::new(&data, &VisitHistory::new(), 5, 7);
        let assignment = tight_assignment(&data);

        let first = tracker.estimate(&assignment);
        let second = tracker.estimate(&assignment);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_worst_delay_probability_constraint() {
        let data = build_data().await;
        let mut history = VisitHistory::new();
        history.record(VisitId(1), 2400);
        history.record(VisitId(1), 1800);
        let tracker = Arc::new(DelayTracker::new(&data, &history, 40, 3));
        let constraint = DelayProbabilityConstraint::new(Arc::clone(&tracker));

        let assignment = tight_assignment(&data);
        let probability = constraint.worst_delay_probability(&assignment);
        // Half the observations overrun, so the downstream visit is late
        // in roughly half the scenarios.
        assert!(probability > 0 && probability < 100);
    }

    #[tokio::test]
    async fn test_riskiness_weighs_dropped_visits() {
        let data = build_data().await;
        let tracker = Arc::new(DelayTracker::new(&data, &VisitHistory::new(), 10, 7));
        let constraint = DelayRiskinessConstraint::new(Arc::clone(&tracker));

        let mut assignment = tight_assignment(&data);
        assert_eq!(constraint.riskiness(&assignment), 0);

        let node_b = data.nodes_of_visit(VisitId(2))[0];
        assignment.routes[0].pop();
        assignment.schedules[0].nodes.pop();
        assignment.schedules[0].starts.pop();
        assignment.schedules[0].latest.pop();
        assignment.dropped = vec![node_b];
        assert_eq!(constraint.riskiness(&assignment), 1000);
    }
}
