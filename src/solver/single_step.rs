//! The baseline solver: one pass over the full model with the standard
//! constraint composition.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use super::problem_data::ProblemData;
use super::wrapper::{BuiltModel, RoutingModelBuilder};
use crate::config::SolverConfig;
use crate::engine::{
    Assignment, FirstSolutionStrategy, NodeIndex, SearchParameters,
};

pub struct SingleStepSolver;

impl SingleStepSolver {
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

    /// One full solve, optionally warm-started from seed routes.
    pub fn solve(
        data: &ProblemData,
        config: &SolverConfig,
        seed: Option<&[Vec<NodeIndex>]>,
        cancel: Arc<AtomicBool>,
    ) -> Option<Assignment> {
        let built = Self::build_model(data, config);
        let params = Self::search_parameters(config);
        super::run_solver(&built, &params, seed, cancel, config, "single-step", &mut [])
    }
}
