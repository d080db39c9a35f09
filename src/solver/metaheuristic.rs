//! Metaheuristic solver with model hooks, and the soft-synchronisation
//! variant used for multi-carer experiments.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use super::problem_data::ProblemData;
use super::wrapper::{BuiltModel, RoutingModelBuilder};
use crate::config::SolverConfig;
use crate::engine::{
    Assignment, FirstSolutionStrategy, Metaheuristic, NodeIndex, OperatorSet, SearchParameters,
};

/// Hook run on the builder before the model closes.
pub type BeforeCloseHook = Box<dyn Fn(&mut RoutingModelBuilder<'_>) + Send + Sync>;
/// Hook run on the built model right after closing.
pub type AfterCloseHook = Box<dyn Fn(&mut BuiltModel) + Send + Sync>;

/// Guided-local-search solver with customisation points for derived
/// configurations.
pub struct MetaheuristicSolver {
    soft_sync_penalty: Option<i64>,
    before_close: Option<BeforeCloseHook>,
    after_close: Option<AfterCloseHook>,
    metaheuristic: Metaheuristic,
}

impl MetaheuristicSolver {
    pub fn new() -> Self {
        Self {
            soft_sync_penalty: None,
            before_close: None,
            after_close: None,
            metaheuristic: Metaheuristic::GuidedLocalSearch,
        }
    }

    /// Soft-synchronisation variant: two-carer visits may start apart at a
    /// price per second of drift.
    pub fn multi_carer(penalty_per_second: i64) -> Self {
        Self {
            soft_sync_penalty: Some(penalty_per_second),
            ..Self::new()
        }
    }

    pub fn with_tabu_search(mut self) -> Self {
        self.metaheuristic = Metaheuristic::TabuSearch;
        self
    }

    pub fn on_before_close(mut self, hook: BeforeCloseHook) -> Self {
        self.before_close = Some(hook);
        self
    }

    pub fn on_after_close(mut self, hook: AfterCloseHook) -> Self {
        self.after_close = Some(hook);
        self
    }

    pub fn build_model(&self, data: &ProblemData, config: &SolverConfig) -> BuiltModel {
        let mut builder = RoutingModelBuilder::new(data, config);
        builder.add_travel_time();
        if let Some(penalty) = self.soft_sync_penalty {
            builder.set_soft_sync(penalty);
        }
        builder.add_visits_handling();
        builder.add_skill_handling();
        builder.add_continuity_of_care();
        builder.add_carer_handling();
        builder.add_dropped_visits_handling(data.dropped_visit_penalty());

        if let Some(hook) = &self.before_close {
            hook(&mut builder);
        }
        let mut built = builder.build();
        if let Some(hook) = &self.after_close {
            hook(&mut built);
        }
        built
    }

    pub fn search_parameters(&self, config: &SolverConfig) -> SearchParameters {
        SearchParameters {
            first_solution: FirstSolutionStrategy::ParallelCheapestInsertion,
            metaheuristic: self.metaheuristic,
            operators: OperatorSet::extended(),
            time_limit: config.opt_time_limit,
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
        super::run_solver(&built, &params, seed, cancel, config, "metaheuristic", &mut [])
    }
}

impl Default for MetaheuristicSolver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::LinkKind;
    use crate::services::location_cache::LocationCache;
    use crate::services::routing::HaversineRouting;
    use crate::types::{
        Address, CalendarVisit, Carer, Diary, Event, ExtendedServiceUser, Location, Problem,
        ServiceUser, Transport, VisitId,
    };
    use chrono::{Duration, NaiveDate};
    use std::sync::atomic::Ordering;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2017, 2, 1).unwrap()
    }

    fn at(hour: u32, minute: u32) -> chrono::NaiveDateTime {
        date().and_hms_opt(hour, minute, 0).unwrap()
    }

    async fn build_data() -> ProblemData {
        let home = Location::from_degrees(53.43, -1.35);
        let users = vec![ExtendedServiceUser::new(
            ServiceUser::new(1, Address::default(), home),
            vec![],
        )];
        let visits = vec![CalendarVisit::new(
            VisitId(1),
            1,
            Address::default(),
            Some(home),
            at(10, 0),
            Duration::minutes(60),
            2,
            vec![],
        )];
        let carers = vec![
            (
                Carer::new("100001", Transport::Foot, vec![]),
                vec![Diary::new(date(), vec![Event::new(at(8, 0), at(16, 0))])],
            ),
            (
                Carer::new("100002", Transport::Foot, vec![]),
                vec![Diary::new(date(), vec![Event::new(at(9, 0), at(17, 0))])],
            ),
        ];
        let problem = Problem::new(users, visits, carers);
        let mut cache = LocationCache::new(vec![home]);
        cache.compute_all(&HaversineRouting::new()).await.unwrap();
        ProblemData::new(problem, cache).unwrap()
    }

    #[tokio::test]
    async fn test_multi_carer_builds_soft_links() {
        let data = build_data().await;
        let config = SolverConfig::default();
        let solver = MetaheuristicSolver::multi_carer(5);
        let built = solver.build_model(&data, &config);

        let nodes = data.nodes_of_visit(VisitId(1));
        assert_eq!(
            built.model.link_of(nodes[0]).unwrap().kind,
            LinkKind::Soft {
                penalty_per_second: 5
            }
        );
    }

    #[tokio::test]
    async fn test_tabu_variant_changes_parameters() {
        let config = SolverConfig::default();
        let solver = MetaheuristicSolver::new().with_tabu_search();
        let params = solver.search_parameters(&config);
        assert_eq!(params.metaheuristic, crate::engine::Metaheuristic::TabuSearch);
    }

    #[tokio::test]
    async fn test_hooks_run_around_close() {
        let data = build_data().await;
        let config = SolverConfig::default();
        let before = Arc::new(AtomicBool::new(false));
        let after = Arc::new(AtomicBool::new(false));

        let before_flag = before.clone();
        let after_flag = after.clone();
        let solver = MetaheuristicSolver::new()
            .on_before_close(Box::new(move |_builder| {
                before_flag.store(true, Ordering::Relaxed);
            }))
            .on_after_close(Box::new(move |built| {
                assert!(built.model.is_closed());
                after_flag.store(true, Ordering::Relaxed);
            }));

        let built = solver.build_model(&data, &config);
        assert!(built.model.is_closed());
        assert!(before.load(Ordering::Relaxed));
        assert!(after.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn test_soft_sync_still_serves_pair_on_two_carers() {
        let data = build_data().await;
        let config = SolverConfig::default();
        let solver = MetaheuristicSolver::multi_carer(10);

        let assignment = solver
            .solve(&data, &config, None, Arc::new(AtomicBool::new(false)))
            .unwrap();
        let nodes = data.nodes_of_visit(VisitId(1));
        let vehicle_a = assignment.vehicle_of(nodes[0]);
        let vehicle_b = assignment.vehicle_of(nodes[1]);
        assert!(vehicle_a.is_some());
        assert!(vehicle_b.is_some());
        assert_ne!(vehicle_a, vehicle_b);
    }
}
