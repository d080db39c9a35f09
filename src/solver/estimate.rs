//! Validation of a human planner's schedule: pin each visit to the
//! planner's carer and let the solver prove feasibility and complete the
//! remainder.

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{info, warn};

use super::problem_data::ProblemData;
use super::wrapper::{BuiltModel, RoutingModelBuilder};
use crate::config::SolverConfig;
use crate::engine::{Assignment, SearchParameters, VehicleIndex};
use crate::types::{Solution, VisitId};

/// The carers a human planner assigned to each visit.
#[derive(Debug, Clone, Default)]
pub struct HumanPlannerSchedule {
    assignments: HashMap<VisitId, Vec<String>>,
}

impl HumanPlannerSchedule {
    /// Extract the planner's choices from a past solution file. Visits
    /// without a carer or without a resolved calendar entry are skipped.
    pub fn from_solution(solution: &Solution) -> Self {
        let mut assignments: HashMap<VisitId, Vec<String>> = HashMap::new();
        for visit in solution.visits() {
            let (Some(calendar), Some(carer)) = (visit.calendar_visit(), visit.carer()) else {
                continue;
            };
            assignments
                .entry(calendar.id())
                .or_default()
                .push(carer.sap_number().to_string());
        }
        Self { assignments }
    }

    pub fn carers_of(&self, visit: VisitId) -> &[String] {
        self.assignments
            .get(&visit)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }
}

pub struct EstimateSolver {
    planner: HumanPlannerSchedule,
}

impl EstimateSolver {
    pub fn new(planner: HumanPlannerSchedule) -> Self {
        Self { planner }
    }

    /// The base model with each planner-assigned visit restricted to the
    /// planner's carers; the visit stays droppable, mirroring a vehicle
    /// domain of "the planner's choice or nobody".
    pub fn build_model(&self, data: &ProblemData, config: &SolverConfig) -> BuiltModel {
        let mut builder = RoutingModelBuilder::base(data, config);

        for visit in data.problem().visits() {
            let planned = self.planner.carers_of(visit.id());
            if planned.is_empty() {
                continue;
            }
            let vehicles: Vec<VehicleIndex> = planned
                .iter()
                .filter_map(|sap| {
                    (0..data.vehicle_count())
                        .map(VehicleIndex)
                        .find(|&vehicle| data.carer(vehicle).sap_number() == sap)
                })
                .collect();
            if vehicles.is_empty() {
                warn!(
                    visit = visit.id().0,
                    "planner carer unknown to the problem; visit left unrestricted"
                );
                continue;
            }
            for &node in data.nodes_of_visit(visit.id()) {
                builder.model_mut().set_allowed_vehicles(node, vehicles.clone());
            }
        }

        builder.build()
    }

    pub fn search_parameters(config: &SolverConfig) -> SearchParameters {
        SearchParameters {
            time_limit: config.opt_time_limit,
            seed: config.seed,
            ..Default::default()
        }
    }

    /// Check the planner's schedule: solve under the pinned domains and
    /// report how much of the plan survived.
    pub fn solve(
        &self,
        data: &ProblemData,
        config: &SolverConfig,
        cancel: Arc<AtomicBool>,
    ) -> Option<Assignment> {
        let built = self.build_model(data, config);
        let params = Self::search_parameters(config);
        let assignment =
            super::run_solver(&built, &params, None, cancel, config, "estimate", &mut [])?;

        let pinned = data
            .problem()
            .visits()
            .iter()
            .filter(|visit| !self.planner.carers_of(visit.id()).is_empty())
            .count();
        let dropped = assignment.dropped_visit_count(&built.model);
        info!(
            pinned_visits = pinned,
            dropped_visits = dropped,
            cost = assignment.cost,
            "planner schedule estimated"
        );
        Some(assignment)
    }
}
