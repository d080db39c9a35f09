//! Assembly of the routing model from a problem: travel callbacks, visit
//! windows, skills, carer shifts with breaks, and dropped-visit handling.

use tracing::debug;

use super::break_constraint::BreakConstraint;
use super::problem_data::{ProblemData, HORIZON_SECONDS};
use crate::config::SolverConfig;
use crate::engine::{
    Assignment, BreakWindow, LinkKind, NodeIndex, RoutingModel, VehicleIndex, VisitLink,
};
use crate::types::Event;

/// The closed model plus the builder by-products solvers report on.
pub struct BuiltModel {
    pub model: RoutingModel,
    /// Preference score per node and vehicle, present when continuity of
    /// care was requested.
    pub care_continuity: Option<Vec<Vec<i64>>>,
}

/// Step-by-step construction of a [`RoutingModel`] over a problem.
///
/// Solvers compose the `add_*` operations they need and finish with
/// [`RoutingModelBuilder::build`], which closes the model.
pub struct RoutingModelBuilder<'a> {
    data: &'a ProblemData,
    config: &'a SolverConfig,
    model: RoutingModel,
    sync_mode: LinkKind,
    care_continuity: Option<Vec<Vec<i64>>>,
}

impl<'a> RoutingModelBuilder<'a> {
    pub fn new(data: &'a ProblemData, config: &'a SolverConfig) -> Self {
        Self {
            data,
            config,
            model: RoutingModel::new(data.node_count(), data.vehicle_count(), HORIZON_SECONDS),
            sync_mode: LinkKind::Synchronized,
            care_continuity: None,
        }
    }

    /// The standard composition shared by every solver: travel, windows,
    /// skills, continuity bookkeeping, shifts with breaks, and droppable
    /// visits at the derived penalty.
    pub fn base(data: &'a ProblemData, config: &'a SolverConfig) -> Self {
        let mut builder = Self::new(data, config);
        builder.add_travel_time();
        builder.add_visits_handling();
        builder.add_skill_handling();
        builder.add_continuity_of_care();
        builder.add_carer_handling();
        builder.add_dropped_visits_handling(data.dropped_visit_penalty());
        builder
    }

    pub fn model_mut(&mut self) -> &mut RoutingModel {
        &mut self.model
    }

    /// Two-carer visits become soft pairs: start drift is charged instead
    /// of forbidden. Must precede [`Self::add_visits_handling`].
    pub fn set_soft_sync(&mut self, penalty_per_second: i64) {
        self.sync_mode = LinkKind::Soft { penalty_per_second };
    }

    /// Register the arc-cost and service-plus-travel callbacks and open the
    /// depot's window over the whole horizon.
    pub fn add_travel_time(&mut self) {
        let n = self.data.node_count();
        let mut travel = vec![vec![0i64; n]; n];
        let mut service = vec![0i64; n];
        for from in 0..n {
            service[from] = self.data.service_time(NodeIndex(from));
            for to in 0..n {
                travel[from][to] = self.data.travel_time(NodeIndex(from), NodeIndex(to));
            }
        }

        let arc_travel = travel.clone();
        self.model
            .set_arc_cost(Box::new(move |from, to| arc_travel[from.0][to.0]));
        let transit_service = service.clone();
        self.model.set_transit(Box::new(move |from, to| {
            transit_service[from.0] + travel[from.0][to.0]
        }));

        for node in 0..n {
            self.model.set_service_time(NodeIndex(node), service[node]);
        }
        self.model
            .set_node_window(NodeIndex::DEPOT, 0, HORIZON_SECONDS);
    }

    /// Time windows for every visit node, plus the pairing constraints of
    /// two-carer visits.
    pub fn add_visits_handling(&mut self) {
        let window = self.config.visit_time_window_seconds();
        for visit in self.data.problem().visits() {
            let preferred = self.data.seconds_from_horizon(visit.datetime());
            let (begin, end) = if window > 0 {
                (begin_window(preferred, window), end_window(preferred, window))
            } else {
                (preferred, preferred)
            };

            let nodes = self.data.nodes_of_visit(visit.id()).to_vec();
            for &node in &nodes {
                self.model.set_node_window(node, begin, end);
            }
            if let [first, second] = nodes[..] {
                self.model.add_link(VisitLink {
                    visit: visit.id(),
                    first: first.min(second),
                    second: first.max(second),
                    kind: self.sync_mode,
                });
            }
        }
    }

    /// Restrict each skilled visit's nodes to carers holding the skills.
    pub fn add_skill_handling(&mut self) {
        for visit in self.data.problem().visits() {
            if visit.tasks().is_empty() {
                continue;
            }
            let allowed: Vec<VehicleIndex> = (0..self.data.vehicle_count())
                .map(VehicleIndex)
                .filter(|&vehicle| self.data.carer(vehicle).has_skills(visit.tasks()))
                .collect();
            for &node in self.data.nodes_of_visit(visit.id()) {
                self.model.set_allowed_vehicles(node, allowed.clone());
            }
        }
    }

    /// Tabulate per-node carer preference scores for reporting.
    pub fn add_continuity_of_care(&mut self) {
        let has_preferences = self
            .data
            .problem()
            .service_users()
            .iter()
            .any(|user| user.has_preferences());
        if !has_preferences {
            return;
        }

        let n = self.data.node_count();
        let vehicles = self.data.vehicle_count();
        let mut scores = vec![vec![0i64; vehicles]; n];
        for node in 1..n {
            let Some(visit) = self.data.visit_of_node(NodeIndex(node)) else {
                continue;
            };
            let Some(user) = self.data.problem().service_user(visit.service_user()) else {
                continue;
            };
            for vehicle in 0..vehicles {
                scores[node][vehicle] =
                    user.preference_score(self.data.carer(VehicleIndex(vehicle)).sap_number());
            }
        }
        self.care_continuity = Some(scores);
    }

    /// Shift windows with boundary slack, break intervals, and one break
    /// constraint per vehicle that has a diary.
    pub fn add_carer_handling(&mut self) {
        let adjustment = self.config.shift_adjustment_seconds();
        let break_window = self.config.break_time_window_seconds();
        let horizon = Event::new(
            self.data.horizon_start(),
            self.data.horizon_start() + chrono::Duration::seconds(HORIZON_SECONDS),
        );

        for vehicle in 0..self.data.vehicle_count() {
            let vehicle = VehicleIndex(vehicle);
            let diary = match self.data.diary(vehicle) {
                Some(diary) if !diary.is_empty() => diary.clone(),
                _ => {
                    // No availability; pin the vehicle to an empty route.
                    self.model.set_vehicle_start_window(vehicle, 0, 0);
                    self.model.set_vehicle_end_window(vehicle, 0, 0);
                    continue;
                }
            };

            let begin = self
                .data
                .seconds_from_horizon(diary.begin_time().expect("non-empty diary"));
            let end = self
                .data
                .seconds_from_horizon(diary.end_time().expect("non-empty diary"));
            let adjusted_begin = (begin - adjustment).max(0);
            let adjusted_end = (end + adjustment).min(HORIZON_SECONDS);

            self.model
                .set_vehicle_start_window(vehicle, adjusted_begin, end);
            self.model
                .set_vehicle_end_window(vehicle, begin, adjusted_end);

            let mut breaks = Vec::new();
            for gap in diary.breaks(horizon) {
                let gap_begin = self.data.seconds_from_horizon(gap.begin()).max(0);
                let gap_end = self
                    .data
                    .seconds_from_horizon(gap.end())
                    .min(HORIZON_SECONDS);
                if gap_begin >= gap_end {
                    continue;
                }

                if gap_begin <= 0 {
                    // Off-duty until the shift opens; the boundary slack is
                    // carved out of the pinned interval.
                    if adjusted_begin > 0 {
                        breaks.push(BreakWindow {
                            start_min: 0,
                            start_max: 0,
                            duration: adjusted_begin,
                            pinned: true,
                        });
                    }
                } else if gap_end >= HORIZON_SECONDS {
                    if adjusted_end < HORIZON_SECONDS {
                        breaks.push(BreakWindow {
                            start_min: adjusted_end,
                            start_max: adjusted_end,
                            duration: HORIZON_SECONDS - adjusted_end,
                            pinned: true,
                        });
                    }
                } else {
                    breaks.push(BreakWindow {
                        start_min: (gap_begin - break_window).max(0),
                        start_max: (gap_begin + break_window).min(HORIZON_SECONDS),
                        duration: gap_end - gap_begin,
                        pinned: false,
                    });
                }
            }

            debug!(
                vehicle = vehicle.0,
                breaks = breaks.len(),
                "attaching break constraint"
            );
            self.model.set_vehicle_breaks(vehicle, breaks);
            self.model
                .add_constraint(Box::new(BreakConstraint::new(vehicle)));
        }
    }

    /// Let the search drop whole visits at `penalty` per visit.
    pub fn add_dropped_visits_handling(&mut self, penalty: i64) {
        for visit in self.data.problem().visits() {
            let nodes = self.data.nodes_of_visit(visit.id()).to_vec();
            let cardinality = nodes.len();
            self.model.add_disjunction(nodes, penalty, cardinality);
        }
    }

    /// Cap the number of dropped nodes; zero makes every visit mandatory.
    pub fn limit_dropped_visits(&mut self, limit: usize) {
        self.model.set_max_dropped_nodes(limit);
    }

    /// Charge each used vehicle its diary duration, steering the search
    /// towards plans with fewer carers.
    pub fn add_vehicle_usage_costs(&mut self) {
        for vehicle in 0..self.data.vehicle_count() {
            let vehicle = VehicleIndex(vehicle);
            let cost = self
                .data
                .diary(vehicle)
                .map(|diary| diary.duration().num_seconds())
                .unwrap_or(0);
            self.model.set_vehicle_fixed_cost(vehicle, cost);
        }
    }

    pub fn build(mut self) -> BuiltModel {
        self.model.close();
        BuiltModel {
            model: self.model,
            care_continuity: self.care_continuity,
        }
    }
}

fn begin_window(preferred: i64, width: i64) -> i64 {
    (preferred - width).max(0)
}

fn end_window(preferred: i64, width: i64) -> i64 {
    (preferred + width).min(HORIZON_SECONDS)
}

/// Continuity-of-care satisfaction per service user under an assignment:
/// the summed preference score of the carers actually serving the user.
pub fn care_continuity(data: &ProblemData, assignment: &Assignment) -> Vec<(i64, i64)> {
    let mut scores: Vec<(i64, i64)> = Vec::new();
    for user in data.problem().service_users() {
        if !user.has_preferences() {
            continue;
        }
        let mut score = 0i64;
        for visit in data.problem().visits() {
            if visit.service_user() != user.key() {
                continue;
            }
            for &node in data.nodes_of_visit(visit.id()) {
                if let Some(vehicle) = assignment.vehicle_of(node) {
                    score += user.preference_score(data.carer(vehicle).sap_number());
                }
            }
        }
        scores.push((user.key(), score));
    }
    scores
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::location_cache::LocationCache;
    use crate::services::routing::HaversineRouting;
    use crate::types::{
        Address, CalendarVisit, Carer, Diary, Event, ExtendedServiceUser, Location, Problem,
        ServiceUser, Transport, VisitId,
    };
    use chrono::{Duration, NaiveDate};

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2017, 2, 1).unwrap()
    }

    fn at(hour: u32, minute: u32) -> chrono::NaiveDateTime {
        date().and_hms_opt(hour, minute, 0).unwrap()
    }

    async fn build_data() -> ProblemData {
        let home = Location::from_degrees(53.43, -1.35);
        let away = Location::from_degrees(53.38, -1.47);
        let users = vec![
            ExtendedServiceUser::new(
                ServiceUser::new(1, Address::default(), home),
                vec![("100001".to_string(), 1.0)],
            ),
            ExtendedServiceUser::new(ServiceUser::new(2, Address::default(), away), vec![]),
        ];
        let visits = vec![
            CalendarVisit::new(
                VisitId(1),
                1,
                Address::default(),
                Some(home),
                at(10, 0),
                Duration::minutes(30),
                1,
                vec![],
            ),
            CalendarVisit::new(
                VisitId(2),
                2,
                Address::default(),
                Some(away),
                at(14, 0),
                Duration::minutes(60),
                2,
                vec![7],
            ),
        ];
        let skilled = Carer::new("100001", Transport::Foot, vec![7]);
        let unskilled = Carer::new("100002", Transport::Foot, vec![]);
        let diary = |carer_begin: (u32, u32), lunch: bool| {
            let mut events = vec![Event::new(at(carer_begin.0, carer_begin.1), at(12, 0))];
            if lunch {
                events.push(Event::new(at(12, 30), at(18, 0)));
            } else {
                events = vec![Event::new(at(carer_begin.0, carer_begin.1), at(18, 0))];
            }
            Diary::new(date(), events)
        };
        let problem = Problem::new(
            users,
            visits,
            vec![
                (skilled, vec![diary((8, 0), true)]),
                (unskilled, vec![diary((9, 0), false)]),
            ],
        );
        let mut cache = LocationCache::new(vec![home, away]);
        cache.compute_all(&HaversineRouting::new()).await.unwrap();
        ProblemData::new(problem, cache).unwrap()
    }

    #[tokio::test]
    async fn test_base_build_closes_model() {
        let data = build_data().await;
        let config = SolverConfig::default();
        let built = RoutingModelBuilder::base(&data, &config).build();
        assert!(built.model.is_closed());
        assert_eq!(built.model.node_count(), 4);
        assert_eq!(built.model.vehicle_count(), 2);
    }

    #[tokio::test]
    async fn test_visit_windows_widen_symmetrically() {
        let data = build_data().await;
        let config = SolverConfig {
            visit_time_window: Duration::minutes(30),
            ..Default::default()
        };
        let built = RoutingModelBuilder::base(&data, &config).build();

        let node = data.nodes_of_visit(VisitId(1))[0];
        let (begin, end) = built.model.node_window(node);
        let preferred = data.seconds_from_horizon(at(10, 0));
        assert_eq!(begin, preferred - 1800);
        assert_eq!(end, preferred + 1800);
        assert_eq!((begin + end) / 2, preferred);
    }

    #[tokio::test]
    async fn test_two_carer_visit_is_linked() {
        let data = build_data().await;
        let config = SolverConfig::default();
        let built = RoutingModelBuilder::base(&data, &config).build();

        let nodes = data.nodes_of_visit(VisitId(2));
        let link = built.model.link_of(nodes[0]).unwrap();
        assert_eq!(link.kind, LinkKind::Synchronized);
        assert!(link.first < link.second);
    }

    #[tokio::test]
    async fn test_soft_sync_mode_changes_link_kind() {
        let data = build_data().await;
        let config = SolverConfig::default();
        let mut builder = RoutingModelBuilder::new(&data, &config);
        builder.add_travel_time();
        builder.set_soft_sync(3);
        builder.add_visits_handling();
        builder.add_carer_handling();
        builder.add_dropped_visits_handling(data.dropped_visit_penalty());
        let built = builder.build();

        let nodes = data.nodes_of_visit(VisitId(2));
        assert_eq!(
            built.model.link_of(nodes[0]).unwrap().kind,
            LinkKind::Soft {
                penalty_per_second: 3
            }
        );
    }

    #[tokio::test]
    async fn test_skill_handling_restricts_vehicles() {
        let data = build_data().await;
        let config = SolverConfig::default();
        let built = RoutingModelBuilder::base(&data, &config).build();

        for &node in data.nodes_of_visit(VisitId(2)) {
            assert!(built.model.is_vehicle_allowed(node, VehicleIndex(0)));
            assert!(!built.model.is_vehicle_allowed(node, VehicleIndex(1)));
        }
        let unskilled_node = data.nodes_of_visit(VisitId(1))[0];
        assert!(built.model.is_vehicle_allowed(unskilled_node, VehicleIndex(1)));
    }

    #[tokio::test]
    async fn test_carer_shift_windows_carry_adjustment() {
        let data = build_data().await;
        let config = SolverConfig {
            shift_adjustment: Duration::minutes(10),
            ..Default::default()
        };
        let built = RoutingModelBuilder::base(&data, &config).build();

        let begin = data.seconds_from_horizon(at(8, 0));
        let end = data.seconds_from_horizon(at(18, 0));
        let (start_min, start_max) = built.model.vehicle_start_window(VehicleIndex(0));
        let (end_min, end_max) = built.model.vehicle_end_window(VehicleIndex(0));
        assert_eq!(start_min, begin - 600);
        assert_eq!(start_max, end);
        assert_eq!(end_min, begin);
        assert_eq!(end_max, end + 600);
    }

    #[tokio::test]
    async fn test_break_intervals_classified() {
        let data = build_data().await;
        let config = SolverConfig {
            shift_adjustment: Duration::zero(),
            break_time_window: Duration::minutes(15),
            ..Default::default()
        };
        let built = RoutingModelBuilder::base(&data, &config).build();

        // Carer 0 works 8-12 and 12:30-18: a pinned pre-shift gap, one
        // floating lunch break, and a pinned post-shift gap.
        let breaks = built.model.vehicle_breaks(VehicleIndex(0));
        assert_eq!(breaks.len(), 3);

        assert!(breaks[0].pinned);
        assert_eq!(breaks[0].start_min, 0);
        assert_eq!(breaks[0].duration, data.seconds_from_horizon(at(8, 0)));

        let lunch = &breaks[1];
        assert!(!lunch.pinned);
        let lunch_start = data.seconds_from_horizon(at(12, 0));
        assert_eq!(lunch.start_min, lunch_start - 900);
        assert_eq!(lunch.start_max, lunch_start + 900);
        assert_eq!(lunch.duration, 1800);

        assert!(breaks[2].pinned);
        assert_eq!(breaks[2].start_min, data.seconds_from_horizon(at(18, 0)));
    }

    #[tokio::test]
    async fn test_vehicle_usage_costs_follow_diary_duration() {
        let data = build_data().await;
        let config = SolverConfig::default();
        let mut builder = RoutingModelBuilder::base(&data, &config);
        builder.add_vehicle_usage_costs();
        let built = builder.build();

        // Carer 0: 8-12 plus 12:30-18 is 9.5 hours.
        assert_eq!(
            built.model.vehicle_fixed_cost(VehicleIndex(0)),
            (9 * 3600) + 1800
        );
        // Carer 1: 9-18 straight.
        assert_eq!(built.model.vehicle_fixed_cost(VehicleIndex(1)), 9 * 3600);
    }

    #[tokio::test]
    async fn test_continuity_scores_recorded() {
        let data = build_data().await;
        let config = SolverConfig::default();
        let built = RoutingModelBuilder::base(&data, &config).build();

        let scores = built.care_continuity.unwrap();
        let node = data.nodes_of_visit(VisitId(1))[0];
        assert_eq!(scores[node.0][0], 100);
        assert_eq!(scores[node.0][1], 0);
    }
}
