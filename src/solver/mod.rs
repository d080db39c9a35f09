//! The constraint-programming pipeline: problem view, model builder,
//! custom constraints, specialised solvers and the orchestrators above
//! them.

pub mod benchmark;
pub mod break_constraint;
pub mod collectors;
pub mod delay;
pub mod estimate;
pub mod incremental;
pub mod limits;
pub mod metaheuristic;
pub mod problem_data;
pub mod second_step;
pub mod single_step;
pub mod third_step;
pub mod three_step;
pub mod validator;
pub mod wrapper;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::config::SolverConfig;
use crate::engine::{
    solve, Assignment, NodeIndex, SearchMonitor, SearchParameters,
};
use collectors::{MinDroppedVisitsCollector, ProgressPrinter};
use limits::{CancelSearchLimit, StalledSearchLimit};
use wrapper::BuiltModel;

/// Run one solve with the standard monitor set: progress logging, the
/// shared cancel token, the stalled-search limit when configured, and the
/// min-dropped-visits collector whose retained solution is the result.
/// Additional stage-specific monitors are appended after the standard ones.
pub(crate) fn run_solver(
    built: &BuiltModel,
    params: &SearchParameters,
    seed: Option<&[Vec<NodeIndex>]>,
    cancel: Arc<AtomicBool>,
    config: &SolverConfig,
    stage: &'static str,
    extra: &mut [&mut dyn SearchMonitor],
) -> Option<Assignment> {
    let mut printer = ProgressPrinter::new(stage);
    let mut cancel_limit = CancelSearchLimit::new(cancel);
    let mut stalled = config.no_progress_time_limit.map(StalledSearchLimit::new);
    let mut collector = MinDroppedVisitsCollector::new();

    let result = {
        let mut monitors: Vec<&mut dyn SearchMonitor> = Vec::new();
        monitors.push(&mut printer);
        monitors.push(&mut cancel_limit);
        if let Some(limit) = stalled.as_mut() {
            monitors.push(limit);
        }
        monitors.push(&mut collector);
        for monitor in extra.iter_mut() {
            monitors.push(&mut **monitor);
        }
        solve(&built.model, params, seed, &mut monitors)
    };

    // Prefer the collector's lexicographic (dropped visits, cost) choice;
    // fall back to the engine's best when no solution was ever reported.
    collector.into_best().or(result)
}
