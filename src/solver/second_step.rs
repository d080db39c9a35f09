//! The default solver: the base composition plus the solution repository,
//! the plateau monitor and a variable store for risk propagation.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::debug;

use super::collectors::{SolutionLogMonitor, SolutionRepository};
use super::problem_data::ProblemData;
use super::wrapper::{care_continuity, BuiltModel, RoutingModelBuilder};
use crate::config::SolverConfig;
use crate::engine::{
    Assignment, BreakIntervalVar, FirstSolutionStrategy, NodeIndex, SearchMonitor,
    SearchParameters,
};

/// Snapshot of the solver variables of one assignment: node start times,
/// node slack and the resolved break intervals per vehicle. The risk
/// constraints read their inputs from here.
#[derive(Debug, Clone, Default)]
pub struct RoutingVariablesStore {
    pub times: Vec<Option<i64>>,
    pub slacks: Vec<Option<i64>>,
    pub breaks: Vec<Vec<BreakIntervalVar>>,
}

impl RoutingVariablesStore {
    pub fn capture(node_count: usize, assignment: &Assignment) -> Self {
        let mut times = vec![None; node_count];
        let mut slacks = vec![None; node_count];
        let mut breaks = Vec::with_capacity(assignment.schedules.len());

        for schedule in &assignment.schedules {
            for (position, &node) in schedule.nodes.iter().enumerate() {
                times[node.0] = Some(schedule.starts[position]);
                slacks[node.0] = Some(schedule.latest[position] - schedule.starts[position]);
            }
            breaks.push(schedule.breaks.clone());
        }

        Self {
            times,
            slacks,
            breaks,
        }
    }
}

/// Output of a second-stage solve.
pub struct SecondStepOutcome {
    pub assignment: Assignment,
    pub variables: RoutingVariablesStore,
}

pub struct SecondStepSolver {
    repository: SolutionRepository,
}

impl SecondStepSolver {
    pub fn new(repository: SolutionRepository) -> Self {
        Self { repository }
    }

    pub fn repository(&self) -> &SolutionRepository {
        &self.repository
    }

    pub fn build_model(data: &ProblemData, config: &SolverConfig) -> BuiltModel {
        RoutingModelBuilder::base(data, config).build()
    }

    pub fn search_parameters(config: &SolverConfig) -> SearchParameters {
        SearchParameters {
            first_solution: FirstSolutionStrategy::ParallelCheapestInsertion,
            time_limit: config.opt_time_limit,
            seed: config.seed,
            ..Default::default()
        }
    }

    /// Solve with the repository capturing every improving route set.
    pub fn solve(
        &self,
        data: &ProblemData,
        config: &SolverConfig,
        seed: Option<&[Vec<NodeIndex>]>,
        cancel: Arc<AtomicBool>,
    ) -> Option<SecondStepOutcome> {
        let built = Self::build_model(data, config);
        let params = Self::search_parameters(config);

        let mut log_monitor = SolutionLogMonitor::new(self.repository.clone());
        let mut extra: Vec<&mut dyn SearchMonitor> = vec![&mut log_monitor];
        let assignment = super::run_solver(
            &built,
            &params,
            seed,
            cancel,
            config,
            "second-step",
            &mut extra,
        )?;

        if built.care_continuity.is_some() {
            for (user, score) in care_continuity(data, &assignment) {
                debug!(user, score, "continuity of care satisfaction");
            }
        }

        let variables = RoutingVariablesStore::capture(data.node_count(), &assignment);
        Some(SecondStepOutcome {
            assignment,
            variables,
        })
    }
}
