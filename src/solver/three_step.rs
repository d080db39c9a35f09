//! The three-stage pipeline: team pre-assignment, the individual solve
//! with warm start, and the refinement pass.

use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::collectors::SolutionRepository;
use super::delay::{DelayTracker, VisitHistory};
use super::metaheuristic::MetaheuristicSolver;
use super::problem_data::ProblemData;
use super::second_step::SecondStepSolver;
use super::single_step::SingleStepSolver;
use super::third_step::{ThirdStepSolver, ThirdStepVariant};
use super::validator::RouteValidator;
use crate::config::{FirstStageStrategy, SolverConfig, ThirdStageStrategy};
use crate::engine::{Assignment, NodeIndex, VehicleIndex};
use crate::types::{
    Break, Carer, Diary, Problem, ScheduledVisit, ScheduledVisitKind, Solution, Transport,
    VisitId,
};

/// Minimum diary overlap for two carers to work as a team.
const MIN_TEAM_OVERLAP_MINUTES: i64 = 135;

/// Penalty per second of start drift in the soft-synchronisation stage.
const SOFT_SYNC_PENALTY: i64 = 1;

/// A pair (or singleton) of carers whose merged diary serves two-carer
/// visits.
#[derive(Debug, Clone)]
pub struct CarerTeam {
    members: Vec<(Carer, Diary)>,
    diary: Diary,
    skills: Vec<i64>,
}

impl CarerTeam {
    pub fn new(member: (Carer, Diary)) -> Self {
        let skills = member.0.skills().to_vec();
        let diary = member.1.clone();
        Self {
            members: vec![member],
            diary,
            skills,
        }
    }

    /// Merge another carer in: the team diary becomes the intersection and
    /// the team skills shrink to the shared set.
    pub fn add(&mut self, member: (Carer, Diary)) {
        self.diary = self.diary.intersect(&member.1);
        self.skills = member.0.shared_skills(&self.skills);
        self.members.push(member);
    }

    pub fn size(&self) -> usize {
        self.members.len()
    }

    pub fn members(&self) -> impl Iterator<Item = &Carer> {
        self.members.iter().map(|(carer, _)| carer)
    }

    pub fn diary(&self) -> &Diary {
        &self.diary
    }

    pub fn skills(&self) -> &[i64] {
        &self.skills
    }

    /// Members free at `instant`, tolerating shift-boundary slack.
    pub fn available_members(
        &self,
        instant: chrono::NaiveDateTime,
        adjustment: chrono::Duration,
    ) -> Vec<&Carer> {
        self.members
            .iter()
            .filter(|(_, diary)| diary.is_available(instant, adjustment))
            .map(|(carer, _)| carer)
            .collect()
    }
}

/// Pair carers into teams: longest diaries first, each matched with the
/// unmatched carer sharing the largest diary intersection of at least
/// 2h15m, ties broken by the size of the shared skill set.
pub fn form_teams(problem: &Problem, date: NaiveDate) -> Vec<CarerTeam> {
    let mut carer_diaries: Vec<(Carer, Diary)> = problem
        .carers()
        .iter()
        .filter_map(|(carer, _)| {
            problem
                .diary(carer, date)
                .filter(|diary| !diary.is_empty())
                .map(|diary| (carer.clone(), diary.clone()))
        })
        .collect();
    carer_diaries.sort_by(|a, b| {
        b.1.duration()
            .cmp(&a.1.duration())
            .then_with(|| a.0.sap_number().cmp(b.0.sap_number()))
    });

    let minimum = chrono::Duration::minutes(MIN_TEAM_OVERLAP_MINUTES);
    let mut matched = vec![false; carer_diaries.len()];
    let mut teams = Vec::new();

    for index in 0..carer_diaries.len() {
        if matched[index] {
            continue;
        }
        matched[index] = true;
        let mut team = CarerTeam::new(carer_diaries[index].clone());

        let mut best: Option<(usize, chrono::Duration, usize)> = None;
        for (candidate, entry) in carer_diaries.iter().enumerate() {
            if matched[candidate] {
                continue;
            }
            let overlap = carer_diaries[index].1.intersect(&entry.1).duration();
            if overlap < minimum {
                continue;
            }
            let shared_skills = entry.0.shared_skills(team.skills()).len();
            let better = match best {
                None => true,
                Some((_, best_overlap, best_skills)) => {
                    overlap > best_overlap
                        || (overlap == best_overlap && shared_skills > best_skills)
                }
            };
            if better {
                best = Some((candidate, overlap, shared_skills));
            }
        }

        if let Some((partner, _, _)) = best {
            matched[partner] = true;
            team.add(carer_diaries[partner].clone());
        }
        teams.push(team);
    }
    teams
}

/// Project a committed assignment into a domain solution, ordered by start
/// time. Dropped visits do not appear.
pub fn assignment_to_solution(data: &ProblemData, assignment: &Assignment) -> Solution {
    let mut visits = Vec::new();
    for (vehicle, route) in assignment.routes.iter().enumerate() {
        let carer = data.carer(VehicleIndex(vehicle)).clone();
        let schedule = &assignment.schedules[vehicle];
        for (position, &node) in route.iter().enumerate() {
            let Some(calendar) = data.visit_of_node(node) else {
                continue;
            };
            let start = data.time_from_seconds(schedule.starts[position]);
            visits.push(ScheduledVisit::from_parts(
                ScheduledVisitKind::Ok,
                Some(carer.clone()),
                start,
                calendar.duration(),
                None,
                None,
                Some(calendar.clone()),
            ));
        }
    }
    visits.sort_by_key(ScheduledVisit::datetime);
    Solution::new(visits)
}

/// The performed breaks of a committed assignment, one entry per resolved
/// interval.
pub fn assignment_breaks(data: &ProblemData, assignment: &Assignment) -> Vec<Break> {
    let mut breaks = Vec::new();
    for (vehicle, schedule) in assignment.schedules.iter().enumerate() {
        let carer = data.carer(VehicleIndex(vehicle));
        for interval in &schedule.breaks {
            if interval.performed != Some(true) {
                continue;
            }
            let Some(start) = interval.start else {
                continue;
            };
            breaks.push(Break::new(
                carer.clone(),
                data.time_from_seconds(start),
                chrono::Duration::seconds(interval.duration),
            ));
        }
    }
    breaks
}

/// Turn a (repaired) solution into seed routes for a fresh solve. For
/// two-carer visits, the lower node index rides with the lower vehicle.
pub fn solution_to_seed_routes(data: &ProblemData, solution: &Solution) -> Vec<Vec<NodeIndex>> {
    let mut assignments: HashMap<VisitId, Vec<(VehicleIndex, chrono::NaiveDateTime)>> =
        HashMap::new();
    for visit in solution.visits() {
        let (Some(calendar), Some(carer)) = (visit.calendar_visit(), visit.carer()) else {
            continue;
        };
        let Some(vehicle) = data.vehicle_of_carer(carer) else {
            continue;
        };
        assignments
            .entry(calendar.id())
            .or_default()
            .push((vehicle, visit.datetime()));
    }

    let mut placements: Vec<(VehicleIndex, chrono::NaiveDateTime, NodeIndex)> = Vec::new();
    for (visit_id, mut vehicles) in assignments {
        let nodes = data.nodes_of_visit(visit_id);
        vehicles.sort();
        vehicles.dedup_by_key(|entry| entry.0);
        for (&node, &(vehicle, datetime)) in nodes.iter().zip(vehicles.iter()) {
            placements.push((vehicle, datetime, node));
        }
    }
    placements.sort_by_key(|&(vehicle, datetime, node)| (vehicle, datetime, node));

    let mut routes = vec![Vec::new(); data.vehicle_count()];
    for (vehicle, _, node) in placements {
        routes[vehicle.0].push(node);
    }
    routes
}

/// The top-level pipeline.
pub struct ThreeStepSchedulingWorker<'a> {
    data: &'a ProblemData,
    config: &'a SolverConfig,
    cancel: Arc<AtomicBool>,
    history: VisitHistory,
}

impl<'a> ThreeStepSchedulingWorker<'a> {
    pub fn new(data: &'a ProblemData, config: &'a SolverConfig, cancel: Arc<AtomicBool>) -> Self {
        Self {
            data,
            config,
            cancel,
            history: VisitHistory::new(),
        }
    }

    pub fn with_history(mut self, history: VisitHistory) -> Self {
        self.history = history;
        self
    }

    /// Run the pipeline, optionally warm-started from a repaired previous
    /// solution.
    pub fn run(&self, warm_start: Option<Solution>) -> Result<Solution> {
        let mut seeds = match self.config.first_stage {
            FirstStageStrategy::Teams => self.teams_stage()?,
            FirstStageStrategy::SoftTimeWindows => self.soft_windows_stage()?,
            FirstStageStrategy::None => None,
        };

        if let Some(mut previous) = warm_start {
            let validator = RouteValidator::new(self.config.shift_adjustment, self.config.visit_time_window);
            let passes =
                validator.repair(&mut previous, self.data.problem(), self.data.cache());
            info!(passes, "warm start repaired");
            let warm_seeds = solution_to_seed_routes(self.data, &previous);
            if warm_seeds.iter().any(|route| !route.is_empty()) {
                seeds = Some(warm_seeds);
            }
        }

        // Stage 2: the full individual-carer solve.
        let repository = SolutionRepository::new();
        let second_step = SecondStepSolver::new(repository.clone());
        let outcome = second_step
            .solve(
                self.data,
                self.config,
                seeds.as_deref(),
                Arc::clone(&self.cancel),
            )
            .ok_or_else(|| anyhow!("second stage found no feasible schedule"))?;
        let mut best = outcome.assignment;
        info!(
            cost = best.cost,
            dropped = best.dropped.len(),
            stored = repository.len(),
            "second stage complete"
        );

        // Stage 3: refinement under the configured objective.
        if self.config.third_stage != ThirdStageStrategy::None {
            let mut tracker = None;
            let variant = match self.config.third_stage {
                ThirdStageStrategy::Distance => ThirdStepVariant::Distance,
                ThirdStageStrategy::VehicleReduction => ThirdStepVariant::VehicleReduction,
                ThirdStageStrategy::DelayReduction => {
                    if self.history.is_empty() {
                        warn!("no visit history recorded; sampled durations fall back to the plan");
                    }
                    let shared = Arc::new(DelayTracker::new(
                        self.data,
                        &self.history,
                        self.config.scenario_count,
                        self.config.seed,
                    ));
                    tracker = Some(Arc::clone(&shared));
                    ThirdStepVariant::DelayReduction(shared)
                }
                ThirdStageStrategy::None => unreachable!(),
            };
            let third_step = ThirdStepSolver::new(variant, best.dropped.len());
            match third_step.solve(
                self.data,
                self.config,
                Some(&best.routes),
                Arc::clone(&self.cancel),
            ) {
                Some(refined) => {
                    let candidate = assignment_to_solution(self.data, &refined);
                    let validator = RouteValidator::new(self.config.shift_adjustment, self.config.visit_time_window);
                    match validator.validate_full(
                        &candidate.to_routes(self.data.problem()),
                        self.data.problem(),
                        self.data.cache(),
                    ) {
                        Ok(()) => {
                            if let Some(tracker) = &tracker {
                                let probability =
                                    super::delay::DelayProbabilityConstraint::new(
                                        Arc::clone(tracker),
                                    )
                                    .worst_delay_probability(&refined);
                                info!(
                                    worst_delay_probability = probability,
                                    "refined plan lateness risk"
                                );
                            }
                            info!(cost = refined.cost, "third stage accepted");
                            best = refined;
                        }
                        Err(errors) => {
                            warn!(
                                errors = errors.len(),
                                "third stage produced an invalid schedule; keeping stage two"
                            );
                        }
                    }
                }
                None => warn!("third stage found no schedule; keeping stage two"),
            }
        }

        let breaks = assignment_breaks(self.data, &best);
        info!(breaks = breaks.len(), "schedule finalised with breaks placed");
        Ok(assignment_to_solution(self.data, &best))
    }

    /// Stage 1, team flavour: solve the two-carer sub-problem over merged
    /// team diaries and project each team visit onto two individual
    /// carers.
    fn teams_stage(&self) -> Result<Option<Vec<Vec<NodeIndex>>>> {
        let team_visits: Vec<_> = self
            .data
            .problem()
            .visits()
            .iter()
            .filter(|visit| visit.carer_count() == 2)
            .map(|visit| visit.clone().with_carer_count(1))
            .collect();
        if team_visits.is_empty() {
            return Ok(None);
        }

        let teams: Vec<CarerTeam> = form_teams(self.data.problem(), self.data.schedule_date())
            .into_iter()
            .filter(|team| team.size() > 1)
            .collect();
        if teams.is_empty() {
            debug!("no carer teams available; skipping the team stage");
            return Ok(None);
        }

        let team_carers: Vec<(Carer, Vec<Diary>)> = teams
            .iter()
            .enumerate()
            .map(|(index, team)| {
                (
                    Carer::new(
                        format!("team-{}", index + 1),
                        Transport::Foot,
                        team.skills().to_vec(),
                    ),
                    vec![team.diary().clone()],
                )
            })
            .collect();

        let team_problem = Problem::new(
            self.data.problem().service_users().to_vec(),
            team_visits,
            team_carers,
        );
        let team_data = ProblemData::new(team_problem, self.data.cache().clone())?;
        let team_config = self.config.with_zero_break_window();

        let Some(assignment) = SingleStepSolver::solve(
            &team_data,
            &team_config,
            None,
            Arc::clone(&self.cancel),
        ) else {
            warn!("team stage found no schedule; continuing unseeded");
            return Ok(None);
        };

        let mut placements: Vec<(VehicleIndex, i64, NodeIndex)> = Vec::new();
        for (team_index, route) in assignment.routes.iter().enumerate() {
            let team = &teams[team_index];
            let schedule = &assignment.schedules[team_index];
            for (position, &team_node) in route.iter().enumerate() {
                let Some(visit_id) = team_data.visit_id_of_node(team_node) else {
                    continue;
                };
                let start_seconds = schedule.starts[position];
                let arrival = team_data.time_from_seconds(start_seconds);
                let available = team.available_members(arrival, self.config.shift_adjustment);
                if available.len() < 2 {
                    debug!(
                        visit = visit_id.0,
                        "team members unavailable at the seeded arrival; visit left unseeded"
                    );
                    continue;
                }

                let mut vehicles: Vec<VehicleIndex> = available
                    .iter()
                    .take(2)
                    .filter_map(|carer| self.data.vehicle_of_carer(carer))
                    .collect();
                vehicles.sort();
                if vehicles.len() < 2 {
                    continue;
                }

                let nodes = self.data.nodes_of_visit(visit_id);
                for (&node, &vehicle) in nodes.iter().zip(vehicles.iter()) {
                    placements.push((vehicle, start_seconds, node));
                }
            }
        }

        if placements.is_empty() {
            return Ok(None);
        }
        placements.sort();
        let mut seeds = vec![Vec::new(); self.data.vehicle_count()];
        for (vehicle, _, node) in placements {
            seeds[vehicle.0].push(node);
        }
        info!("team stage seeded {} routes", seeds.iter().filter(|route| !route.is_empty()).count());
        Ok(Some(seeds))
    }

    /// Stage 1, soft flavour: solve the two-carer sub-problem with soft
    /// synchronisation and keep only the pairs that ended up synchronised.
    fn soft_windows_stage(&self) -> Result<Option<Vec<Vec<NodeIndex>>>> {
        let double_visits: Vec<_> = self
            .data
            .problem()
            .visits()
            .iter()
            .filter(|visit| visit.carer_count() == 2)
            .cloned()
            .collect();
        if double_visits.is_empty() {
            return Ok(None);
        }

        let sub_problem = Problem::new(
            self.data.problem().service_users().to_vec(),
            double_visits,
            self.data.problem().carers().to_vec(),
        );
        let sub_data = ProblemData::new(sub_problem, self.data.cache().clone())?;
        let solver = MetaheuristicSolver::multi_carer(SOFT_SYNC_PENALTY);

        let Some(assignment) =
            solver.solve(&sub_data, self.config, None, Arc::clone(&self.cancel))
        else {
            warn!("soft synchronisation stage found no schedule; continuing unseeded");
            return Ok(None);
        };

        // The sub-problem shares the carer list, so vehicle indices map
        // one to one onto the full model.
        let mut placements: Vec<(VehicleIndex, i64, NodeIndex)> = Vec::new();
        let mut synchronised = 0usize;
        for visit in sub_data.problem().visits() {
            let sub_nodes = sub_data.nodes_of_visit(visit.id());
            let [first, second] = sub_nodes else {
                continue;
            };
            let (Some(start_a), Some(start_b)) =
                (assignment.start_of(*first), assignment.start_of(*second))
            else {
                continue;
            };
            if start_a != start_b {
                continue;
            }
            let (Some(vehicle_a), Some(vehicle_b)) = (
                assignment.vehicle_of(*first),
                assignment.vehicle_of(*second),
            ) else {
                continue;
            };
            synchronised += 1;

            let mut vehicles = [vehicle_a, vehicle_b];
            vehicles.sort();
            let nodes = self.data.nodes_of_visit(visit.id());
            for (&node, &vehicle) in nodes.iter().zip(vehicles.iter()) {
                placements.push((vehicle, start_a, node));
            }
        }

        if placements.is_empty() {
            return Ok(None);
        }
        info!(synchronised, "soft synchronisation stage seeded pairs");
        placements.sort();
        let mut seeds = vec![Vec::new(); self.data.vehicle_count()];
        for (vehicle, _, node) in placements {
            seeds[vehicle.0].push(node);
        }
        Ok(Some(seeds))
    }
}
