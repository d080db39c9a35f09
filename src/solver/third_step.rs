//! Refinement solvers: polish a finished plan under guided local search,
//! minimising travel, carer usage, or lateness risk.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use super::delay::{DelayRiskinessConstraint, DelayTracker};
use super::problem_data::ProblemData;
use super::wrapper::{BuiltModel, RoutingModelBuilder};
use crate::config::SolverConfig;
use crate::engine::{
    Assignment, FirstSolutionStrategy, Metaheuristic, NodeIndex, OperatorSet, SearchParameters,
};

/// Objective variant of the third stage.
pub enum ThirdStepVariant {
    /// Travel time alone.
    Distance,
    /// Travel time plus a per-vehicle usage cost equal to the vehicle's
    /// diary duration, favouring plans with fewer carers.
    VehicleReduction,
    /// Riskiness of the plan under sampled service durations.
    DelayReduction(Arc<DelayTracker>),
}

pub struct ThirdStepSolver {
    variant: ThirdStepVariant,
    /// Dropped-node budget inherited from the seeding stage; the
    /// refinement must not lose further visits.
    allowed_dropped_nodes: usize,
}

impl ThirdStepSolver {
    pub fn new(variant: ThirdStepVariant, allowed_dropped_nodes: usize) -> Self {
        Self {
            variant,
            allowed_dropped_nodes,
        }
    }

    pub fn build_model(&self, data: &ProblemData, config: &SolverConfig) -> BuiltModel {
        let mut builder = RoutingModelBuilder::base(data, config);
        builder.limit_dropped_visits(self.allowed_dropped_nodes);
        match &self.variant {
            ThirdStepVariant::Distance => {}
            ThirdStepVariant::VehicleReduction => builder.add_vehicle_usage_costs(),
            ThirdStepVariant::DelayReduction(tracker) => {
                let riskiness = DelayRiskinessConstraint::new(Arc::clone(tracker));
                builder
                    .model_mut()
                    .set_cost_override(Box::new(move |assignment| {
                        riskiness.riskiness(assignment)
                    }));
            }
        }
        builder.build()
    }

    pub fn search_parameters(&self, config: &SolverConfig) -> SearchParameters {
        SearchParameters {
            first_solution: FirstSolutionStrategy::ParallelCheapestInsertion,
            metaheuristic: Metaheuristic::GuidedLocalSearch,
            operators: OperatorSet::extended(),
            time_limit: config.post_opt_time_limit.or(config.opt_time_limit),
            seed: config.seed,
            ..Default::default()
        }
    }

    pub fn solve(
        &self,
        data: &ProblemData,
        config: &SolverConfig,
        seed: Option<&[Vec<NodeIndex>]>,
        cancel: Arc<AtomicBool>,
    ) -> Option<Assignment> {
        let built = self.build_model(data, config);
        let params = self.search_parameters(config);
        super::run_solver(&built, &params, seed, cancel, config, "third-step", &mut [])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::location_cache::LocationCache;
    use crate::services::routing::HaversineRouting;
    use crate::solver::delay::VisitHistory;
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
        let mut visits = Vec::new();
        let mut users = Vec::new();
        let mut locations = Vec::new();
        for index in 0..3i64 {
            let location = Location::from_degrees(53.40 + index as f64 * 0.02, -1.40);
            locations.push(location);
            users.push(ExtendedServiceUser::new(
                ServiceUser::new(index + 1, Address::default(), location),
                vec![],
            ));
            visits.push(CalendarVisit::new(
                VisitId(index + 1),
                index + 1,
                Address::default(),
                Some(location),
                at(9 + index as u32 * 3, 0),
                Duration::minutes(30),
                1,
                vec![],
            ));
        }
        let carers = vec![
            (
                Carer::new("100001", Transport::Foot, vec![]),
                vec![Diary::new(date(), vec![Event::new(at(8, 0), at(18, 0))])],
            ),
            (
                Carer::new("100002", Transport::Foot, vec![]),
                vec![Diary::new(date(), vec![Event::new(at(8, 0), at(18, 0))])],
            ),
        ];
        let problem = Problem::new(users, visits, carers);
        let mut cache = LocationCache::new(locations);
        cache.compute_all(&HaversineRouting::new()).await.unwrap();
        ProblemData::new(problem, cache).unwrap()
    }

    #[tokio::test]
    async fn test_distance_variant_serves_everything() {
        let data = build_data().await;
        let config = SolverConfig::default();
        let solver = ThirdStepSolver::new(ThirdStepVariant::Distance, 0);

        let assignment = solver
            .solve(&data, &config, None, Arc::new(AtomicBool::new(false)))
            .unwrap();
        assert!(assignment.dropped.is_empty());
    }

    #[tokio::test]
    async fn test_vehicle_reduction_prefers_single_carer() {
        let data = build_data().await;
        let config = SolverConfig::default();
        let solver = ThirdStepSolver::new(ThirdStepVariant::VehicleReduction, 0);

        let assignment = solver
            .solve(&data, &config, None, Arc::new(AtomicBool::new(false)))
            .unwrap();

        // The visits fit one diary comfortably; paying a second usage cost
        // would only lose.
        let used = (0..data.vehicle_count())
            .filter(|&vehicle| assignment.is_vehicle_used(crate::engine::VehicleIndex(vehicle)))
            .count();
        assert_eq!(used, 1);
        assert!(assignment.dropped.is_empty());
    }

    #[tokio::test]
    async fn test_delay_reduction_uses_riskiness_objective() {
        let data = build_data().await;
        let config = SolverConfig::default();
        let tracker = Arc::new(DelayTracker::new(&data, &VisitHistory::new(), 10, 1));
        let solver = ThirdStepSolver::new(ThirdStepVariant::DelayReduction(tracker.clone()), 0);

        let assignment = solver
            .solve(&data, &config, None, Arc::new(AtomicBool::new(false)))
            .unwrap();
        // Without history there is no expected delay and nothing dropped,
        // so the overridden objective sits at zero.
        assert_eq!(assignment.cost, 0);
        assert!(assignment.dropped.is_empty());
    }

    #[tokio::test]
    async fn test_dropped_budget_enforced() {
        let data = build_data().await;
        let config = SolverConfig::default();
        let solver = ThirdStepSolver::new(ThirdStepVariant::Distance, 1);

        let assignment = solver
            .solve(&data, &config, None, Arc::new(AtomicBool::new(false)))
            .unwrap();
        assert!(assignment.dropped.len() <= 1);
    }
}
