//! Incremental enforcement of two-carer synchronisation: solve softly,
//! then harden the violated pairs a random fraction at a time until none
//! remain relaxed.

use anyhow::{anyhow, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{debug, info};

use super::metaheuristic::MetaheuristicSolver;
use super::problem_data::ProblemData;
use super::three_step::assignment_to_solution;
use crate::config::SolverConfig;
use crate::engine::{Assignment, NodeIndex, RoutingModel};
use crate::types::{Solution, VisitId};

/// Synchronisation state of one two-carer visit in an assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultiVisitState {
    /// Distinct ordered vehicles and one common start instant.
    Synchronised,
    /// Both nodes served but apart in time or on misordered vehicles.
    Asymmetric,
    OneDropped,
    BothDropped,
}

/// Structured descriptor of a two-carer visit under an assignment.
#[derive(Debug, Clone)]
pub struct MultiVisitDescriptor {
    pub visit: VisitId,
    pub node_a: NodeIndex,
    pub node_b: NodeIndex,
    pub state: MultiVisitState,
}

impl MultiVisitDescriptor {
    /// A pair counts as relaxed when it still violates the hard protocol.
    pub fn is_relaxed(&self) -> bool {
        matches!(
            self.state,
            MultiVisitState::Asymmetric | MultiVisitState::OneDropped
        )
    }
}

/// Classify every linked visit pair of the model under `assignment`.
pub fn multiple_visit_query(
    model: &RoutingModel,
    assignment: &Assignment,
) -> Vec<MultiVisitDescriptor> {
    model
        .links()
        .iter()
        .map(|link| {
            let dropped_a = assignment.is_dropped(link.first);
            let dropped_b = assignment.is_dropped(link.second);
            let state = match (dropped_a, dropped_b) {
                (true, true) => MultiVisitState::BothDropped,
                (true, false) | (false, true) => MultiVisitState::OneDropped,
                (false, false) => {
                    let start_a = assignment.start_of(link.first);
                    let start_b = assignment.start_of(link.second);
                    let vehicle_a = assignment.vehicle_of(link.first);
                    let vehicle_b = assignment.vehicle_of(link.second);
                    let synchronised = start_a.is_some()
                        && start_a == start_b
                        && match (vehicle_a, vehicle_b) {
                            (Some(a), Some(b)) => a < b,
                            _ => false,
                        };
                    if synchronised {
                        MultiVisitState::Synchronised
                    } else {
                        MultiVisitState::Asymmetric
                    }
                }
            };
            MultiVisitDescriptor {
                visit: link.visit,
                node_a: link.first,
                node_b: link.second,
                state,
            }
        })
        .collect()
}

/// Penalty per second of drift while pairs are still soft.
const SOFT_SYNC_PENALTY: i64 = 1;

/// The experimental enforcement workflow.
pub struct IncrementalEnforcementWorker<'a> {
    data: &'a ProblemData,
    config: &'a SolverConfig,
    cancel: Arc<AtomicBool>,
    /// Fraction of relaxed pairs hardened per iteration.
    fraction: f64,
}

impl<'a> IncrementalEnforcementWorker<'a> {
    pub fn new(data: &'a ProblemData, config: &'a SolverConfig, cancel: Arc<AtomicBool>) -> Self {
        Self {
            data,
            config,
            cancel,
            fraction: 0.5,
        }
    }

    pub fn with_fraction(mut self, fraction: f64) -> Self {
        self.fraction = fraction.clamp(0.0, 1.0);
        self
    }

    pub fn run(&self) -> Result<Solution> {
        let solver = MetaheuristicSolver::multi_carer(SOFT_SYNC_PENALTY);
        let mut built = solver.build_model(self.data, self.config);
        let params = solver.search_parameters(self.config);

        let mut assignment = super::run_solver(
            &built,
            &params,
            None,
            Arc::clone(&self.cancel),
            self.config,
            "enforcement",
            &mut [],
        )
        .ok_or_else(|| anyhow!("soft solve found no feasible schedule"))?;

        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let mut iteration = 0usize;
        loop {
            iteration += 1;
            let relaxed: Vec<MultiVisitDescriptor> =
                multiple_visit_query(&built.model, &assignment)
                    .into_iter()
                    .filter(MultiVisitDescriptor::is_relaxed)
                    .collect();
            if relaxed.is_empty() {
                info!(iteration, "no relaxed visit pairs remain");
                break;
            }

            let take = ((relaxed.len() as f64 * self.fraction).ceil() as usize).max(1);
            let mut shuffled = relaxed;
            shuffled.shuffle(&mut rng);
            shuffled.truncate(take);
            debug!(
                iteration,
                hardened = shuffled.len(),
                "hardening relaxed visit pairs"
            );

            // Patch the committed routes and post the hard constraints
            // permanently before re-solving.
            let mut patched = assignment.routes.clone();
            for descriptor in &shuffled {
                for route in &mut patched {
                    route.retain(|&node| {
                        node != descriptor.node_a && node != descriptor.node_b
                    });
                }
                built.model.harden_link_of(descriptor.node_a);
            }

            assignment = super::run_solver(
                &built,
                &params,
                Some(&patched),
                Arc::clone(&self.cancel),
                self.config,
                "enforcement",
                &mut [],
            )
            .ok_or_else(|| {
                anyhow!("enforcement iteration {} found no feasible schedule", iteration)
            })?;
        }

        Ok(assignment_to_solution(self.data, &assignment))
    }
}
