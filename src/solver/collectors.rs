//! Solution collectors: the shared repository, the lexicographic
//! best-solution collector, the plateau monitor and the progress printer.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::info;

use crate::engine::{Assignment, NodeIndex, RoutingModel, SearchMonitor, SearchStats};

/// A captured route set together with its quality.
#[derive(Debug, Clone)]
pub struct StoredSolution {
    pub routes: Vec<Vec<NodeIndex>>,
    pub dropped_visits: usize,
    pub cost: i64,
}

/// Append-only store of improving route sets, shared between the engine
/// callbacks and the orchestrator.
#[derive(Clone, Default)]
pub struct SolutionRepository {
    inner: Arc<Mutex<Vec<StoredSolution>>>,
}

impl SolutionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep `solution` if it improves on the best stored one: fewer dropped
    /// visits, or equally many at a lower cost.
    pub fn store(&self, solution: StoredSolution) {
        let mut solutions = self.inner.lock();
        let improving = match solutions.last() {
            None => true,
            Some(best) => {
                solution.dropped_visits < best.dropped_visits
                    || (solution.dropped_visits == best.dropped_visits
                        && solution.cost < best.cost)
            }
        };
        if improving {
            solutions.push(solution);
        }
    }

    /// The best route set stored so far.
    pub fn best(&self) -> Option<StoredSolution> {
        self.inner.lock().last().cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

/// Retains the single best solution seen, ordered by dropped-visit count
/// first and objective second.
pub struct MinDroppedVisitsCollector {
    best: Option<Assignment>,
    min_dropped_visits: usize,
    min_cost: i64,
}

impl MinDroppedVisitsCollector {
    pub fn new() -> Self {
        Self {
            best: None,
            min_dropped_visits: usize::MAX,
            min_cost: i64::MAX,
        }
    }

    pub fn best(&self) -> Option<&Assignment> {
        self.best.as_ref()
    }

    pub fn into_best(self) -> Option<Assignment> {
        self.best
    }
}

impl Default for MinDroppedVisitsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl SearchMonitor for MinDroppedVisitsCollector {
    fn enter_search(&mut self) {
        self.best = None;
        self.min_dropped_visits = usize::MAX;
        self.min_cost = i64::MAX;
    }

    fn at_solution(&mut self, assignment: &Assignment, model: &RoutingModel, _stats: &SearchStats) {
        let dropped = assignment.dropped_visit_count(model);
        let improved = dropped < self.min_dropped_visits
            || (dropped == self.min_dropped_visits && assignment.cost < self.min_cost);
        if improved {
            self.min_dropped_visits = dropped;
            self.min_cost = assignment.cost;
            self.best = Some(assignment.clone());
        }
    }
}

/// Watches the dropped-visit counts of recent solutions and gives up on a
/// plateau: stop when the running minimum has not reappeared within the
/// last `CUT_OFF_THRESHOLD` positions of the window.
pub struct SolutionLogMonitor {
    repository: SolutionRepository,
    min_dropped_visits: usize,
    buffer: VecDeque<usize>,
    stop_search: bool,
}

const BUFFER_SIZE: usize = 5;
const CUT_OFF_THRESHOLD: usize = 2;

impl SolutionLogMonitor {
    pub fn new(repository: SolutionRepository) -> Self {
        Self {
            repository,
            min_dropped_visits: usize::MAX,
            buffer: VecDeque::with_capacity(BUFFER_SIZE),
            stop_search: false,
        }
    }
}

impl SearchMonitor for SolutionLogMonitor {
    fn enter_search(&mut self) {
        self.min_dropped_visits = usize::MAX;
        self.buffer.clear();
        self.stop_search = false;
    }

    fn at_solution(&mut self, assignment: &Assignment, model: &RoutingModel, _stats: &SearchStats) {
        let dropped = assignment.dropped_visit_count(model);
        if dropped <= self.min_dropped_visits {
            self.min_dropped_visits = dropped;
            self.repository.store(StoredSolution {
                routes: assignment.routes.clone(),
                dropped_visits: dropped,
                cost: assignment.cost,
            });
        }

        if self.buffer.len() == BUFFER_SIZE {
            self.buffer.pop_front();
        }
        self.buffer.push_back(dropped);

        if *self.buffer.back().expect("buffer never empty here") == self.min_dropped_visits {
            return;
        }
        let distance_from_back = self
            .buffer
            .iter()
            .rev()
            .position(|&count| count == self.min_dropped_visits);
        self.stop_search = match distance_from_back {
            None => true,
            Some(distance) => distance > CUT_OFF_THRESHOLD,
        };
    }

    fn should_stop(&self) -> bool {
        self.stop_search
    }
}

/// Emits one log line per improving solution.
pub struct ProgressPrinter {
    stage: &'static str,
}

impl ProgressPrinter {
    pub fn new(stage: &'static str) -> Self {
        Self { stage }
    }
}

impl SearchMonitor for ProgressPrinter {
    fn at_solution(&mut self, assignment: &Assignment, model: &RoutingModel, stats: &SearchStats) {
        info!(
            stage = self.stage,
            cost = assignment.cost,
            travel = assignment.travel_cost,
            dropped_visits = assignment.dropped_visit_count(model),
            branches = stats.branches,
            wall_time_ms = stats.wall_time.as_millis() as u64,
            "solution found"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model_with_disjunctions(visits: usize) -> RoutingModel {
        let mut model = RoutingModel::new(visits + 1, 1, 86_400);
        model.set_arc_cost(Box::new(|_, _| 0));
        model.set_transit(Box::new(|_, _| 0));
        for node in 1..=visits {
            model.add_disjunction(vec![NodeIndex(node)], 1000, 1);
        }
        model
    }

    fn assignment(routes: Vec<Vec<NodeIndex>>, dropped: Vec<NodeIndex>, cost: i64) -> Assignment {
        Assignment {
            routes,
            dropped,
            cost,
            ..Default::default()
        }
    }

    #[test]
    fn test_repository_keeps_improving_sequence() {
        let repository = SolutionRepository::new();
        repository.store(StoredSolution {
            routes: vec![],
            dropped_visits: 3,
            cost: 100,
        });
        repository.store(StoredSolution {
            routes: vec![],
            dropped_visits: 3,
            cost: 200,
        });
        repository.store(StoredSolution {
            routes: vec![],
            dropped_visits: 2,
            cost: 500,
        });

        assert_eq!(repository.len(), 2);
        let best = repository.best().unwrap();
        assert_eq!(best.dropped_visits, 2);
        assert_eq!(best.cost, 500);
    }

    #[test]
    fn test_repository_shared_between_clones() {
        let repository = SolutionRepository::new();
        let handle = repository.clone();
        handle.store(StoredSolution {
            routes: vec![],
            dropped_visits: 0,
            cost: 10,
        });
        assert_eq!(repository.len(), 1);
    }

    #[test]
    fn test_collector_prefers_fewer_dropped_visits() {
        let model = model_with_disjunctions(2);
        let mut collector = MinDroppedVisitsCollector::new();
        collector.enter_search();

        collector.at_solution(
            &assignment(vec![vec![NodeIndex(1)]], vec![NodeIndex(2)], 50),
            &model,
            &SearchStats::default(),
        );
        collector.at_solution(
            &assignment(
                vec![vec![NodeIndex(1), NodeIndex(2)]],
                vec![],
                500,
            ),
            &model,
            &SearchStats::default(),
        );

        // The complete plan wins despite its higher cost.
        let best = collector.best().unwrap();
        assert!(best.dropped.is_empty());
        assert_eq!(best.cost, 500);
    }

    #[test]
    fn test_collector_breaks_ties_by_cost() {
        let model = model_with_disjunctions(2);
        let mut collector = MinDroppedVisitsCollector::new();
        collector.enter_search();

        collector.at_solution(
            &assignment(vec![vec![NodeIndex(1), NodeIndex(2)]], vec![], 500),
            &model,
            &SearchStats::default(),
        );
        collector.at_solution(
            &assignment(vec![vec![NodeIndex(2), NodeIndex(1)]], vec![], 400),
            &model,
            &SearchStats::default(),
        );
        collector.at_solution(
            &assignment(vec![vec![NodeIndex(1), NodeIndex(2)]], vec![], 450),
            &model,
            &SearchStats::default(),
        );

        assert_eq!(collector.best().unwrap().cost, 400);
    }

    #[test]
    fn test_log_monitor_stops_on_plateau() {
        let model = model_with_disjunctions(5);
        let repository = SolutionRepository::new();
        let mut monitor = SolutionLogMonitor::new(repository.clone());
        monitor.enter_search();

        let solution = |dropped_nodes: Vec<NodeIndex>, cost| {
            assignment(vec![vec![]], dropped_nodes, cost)
        };

        // Minimum of one dropped visit, then a drift upwards.
        monitor.at_solution(&solution(vec![NodeIndex(1)], 10), &model, &SearchStats::default());
        assert!(!monitor.should_stop());
        monitor.at_solution(
            &solution(vec![NodeIndex(1), NodeIndex(2)], 9),
            &model,
            &SearchStats::default(),
        );
        assert!(!monitor.should_stop());
        monitor.at_solution(
            &solution(vec![NodeIndex(1), NodeIndex(2)], 8),
            &model,
            &SearchStats::default(),
        );
        assert!(!monitor.should_stop());
        monitor.at_solution(
            &solution(vec![NodeIndex(1), NodeIndex(2)], 7),
            &model,
            &SearchStats::default(),
        );
        // The minimum is now three positions behind the window's back.
        assert!(monitor.should_stop());
    }

    #[test]
    fn test_log_monitor_stores_improving_solutions() {
        let model = model_with_disjunctions(3);
        let repository = SolutionRepository::new();
        let mut monitor = SolutionLogMonitor::new(repository.clone());
        monitor.enter_search();

        monitor.at_solution(
            &assignment(vec![vec![NodeIndex(1)]], vec![NodeIndex(2), NodeIndex(3)], 30),
            &model,
            &SearchStats::default(),
        );
        monitor.at_solution(
            &assignment(
                vec![vec![NodeIndex(1), NodeIndex(2)]],
                vec![NodeIndex(3)],
                40,
            ),
            &model,
            &SearchStats::default(),
        );

        assert_eq!(repository.len(), 2);
        assert_eq!(repository.best().unwrap().dropped_visits, 1);
    }
}
