//! Search over routing assignments: cheapest-insertion construction plus
//! local search with pluggable monitors.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

use super::assignment::{evaluate_assignment, evaluate_relaxed, Assignment};
use super::model::{LinkKind, RoutingModel};
use super::{NodeIndex, VehicleIndex};

/// Strategy used to build the first feasible solution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirstSolutionStrategy {
    /// Repeatedly insert the globally cheapest remaining visit.
    ParallelCheapestInsertion,
    /// Insert visits in node order, each at its cheapest position.
    SequentialCheapestInsertion,
}

/// Escape strategy once local search reaches a local optimum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metaheuristic {
    GreedyDescent,
    GuidedLocalSearch,
    TabuSearch,
}

/// Which local-search neighbourhoods the search explores.
#[derive(Debug, Clone, Copy)]
pub struct OperatorSet {
    pub relocate: bool,
    pub exchange: bool,
    pub cross_exchange: bool,
    pub relocate_pair: bool,
    pub relocate_chain: bool,
}

impl OperatorSet {
    pub fn basic() -> Self {
        Self {
            relocate: true,
            exchange: true,
            cross_exchange: false,
            relocate_pair: true,
            relocate_chain: false,
        }
    }

    /// The full neighbourhood set used by the refinement stage.
    pub fn extended() -> Self {
        Self {
            relocate: true,
            exchange: true,
            cross_exchange: true,
            relocate_pair: true,
            relocate_chain: true,
        }
    }
}

impl Default for OperatorSet {
    fn default() -> Self {
        Self::basic()
    }
}

/// Knobs of one search run.
#[derive(Debug, Clone)]
pub struct SearchParameters {
    pub first_solution: FirstSolutionStrategy,
    pub metaheuristic: Metaheuristic,
    pub operators: OperatorSet,
    pub time_limit: Option<Duration>,
    pub no_progress_time_limit: Option<Duration>,
    pub solution_limit: Option<u64>,
    /// Guided-local-search penalty weight; zero picks a weight from the
    /// first local optimum's travel cost.
    pub gls_lambda: i64,
    pub seed: u64,
}

impl Default for SearchParameters {
    fn default() -> Self {
        Self {
            first_solution: FirstSolutionStrategy::ParallelCheapestInsertion,
            metaheuristic: Metaheuristic::GreedyDescent,
            operators: OperatorSet::default(),
            time_limit: None,
            no_progress_time_limit: None,
            solution_limit: None,
            gls_lambda: 0,
            seed: 0,
        }
    }
}

/// Counters exposed to monitors at every solution event.
#[derive(Debug, Clone, Copy, Default)]
pub struct SearchStats {
    pub solutions: u64,
    pub branches: u64,
    pub wall_time: Duration,
}

/// Observer of the search: collectors record solutions, limits stop it.
pub trait SearchMonitor: Send {
    fn enter_search(&mut self) {}

    fn at_solution(&mut self, _assignment: &Assignment, _model: &RoutingModel, _stats: &SearchStats) {
    }

    fn should_stop(&self) -> bool {
        false
    }

    fn exit_search(&mut self) {}
}

/// Insertion unit: the node pair of a linked visit moves as one.
fn insertion_groups(model: &RoutingModel) -> Vec<Vec<NodeIndex>> {
    let mut groups = Vec::new();
    for node in model.visit_nodes() {
        match model.link_of(node) {
            Some(link) => {
                if link.first == node {
                    groups.push(vec![link.first, link.second]);
                }
            }
            None => groups.push(vec![node]),
        }
    }
    groups
}

struct SearchContext<'a> {
    model: &'a RoutingModel,
    stats: SearchStats,
    start: Instant,
    deadline: Option<Instant>,
    penalties: HashMap<(NodeIndex, NodeIndex), i64>,
    lambda: i64,
    rng: StdRng,
}

impl<'a> SearchContext<'a> {
    fn new(model: &'a RoutingModel, params: &SearchParameters) -> Self {
        Self {
            model,
            stats: SearchStats::default(),
            start: Instant::now(),
            deadline: params.time_limit.map(|limit| Instant::now() + limit),
            penalties: HashMap::new(),
            lambda: params.gls_lambda,
            rng: StdRng::seed_from_u64(params.seed),
        }
    }

    fn evaluate(&mut self, routes: &[Vec<NodeIndex>], relaxed: bool) -> Option<Assignment> {
        self.stats.branches += 1;
        if relaxed {
            evaluate_relaxed(self.model, routes)
        } else {
            evaluate_assignment(self.model, routes)
        }
    }

    fn out_of_time(&self) -> bool {
        match self.deadline {
            Some(deadline) => Instant::now() >= deadline,
            None => false,
        }
    }

    fn solution_arcs(assignment: &Assignment) -> Vec<(NodeIndex, NodeIndex)> {
        let mut arcs = Vec::new();
        for route in &assignment.routes {
            if route.is_empty() {
                continue;
            }
            arcs.push((NodeIndex::DEPOT, route[0]));
            for pair in route.windows(2) {
                arcs.push((pair[0], pair[1]));
            }
            arcs.push((route[route.len() - 1], NodeIndex::DEPOT));
        }
        arcs
    }

    /// Cost augmented with the guided-local-search arc penalties.
    fn augmented_cost(&self, assignment: &Assignment) -> i64 {
        if self.penalties.is_empty() || self.lambda == 0 {
            return assignment.cost;
        }
        let penalty_sum: i64 = Self::solution_arcs(assignment)
            .into_iter()
            .filter_map(|arc| self.penalties.get(&arc))
            .sum();
        assignment.cost + self.lambda * penalty_sum
    }

    /// Penalise the most "useful" arcs of the local optimum, raising their
    /// augmented cost so the search can move away from them.
    fn penalise_local_optimum(&mut self, assignment: &Assignment) {
        let arcs = Self::solution_arcs(assignment);
        if arcs.is_empty() {
            return;
        }
        if self.lambda == 0 {
            let average = (assignment.travel_cost / arcs.len().max(1) as i64).max(1);
            self.lambda = (average / 10).max(1);
        }

        let mut best_utility = 0i64;
        let mut best_arcs = Vec::new();
        for arc in arcs {
            let cost = self.model.arc_cost(arc.0, arc.1);
            let penalty = self.penalties.get(&arc).copied().unwrap_or(0);
            let utility = cost / (1 + penalty);
            match utility.cmp(&best_utility) {
                std::cmp::Ordering::Greater => {
                    best_utility = utility;
                    best_arcs = vec![arc];
                }
                std::cmp::Ordering::Equal => best_arcs.push(arc),
                std::cmp::Ordering::Less => {}
            }
        }
        for arc in best_arcs {
            *self.penalties.entry(arc).or_insert(0) += 1;
        }
    }
}

/// Run the search. Seed routes may be partial or slightly infeasible; they
/// are repaired before construction completes them. Returns the best strict
/// assignment found, or `None` when no feasible solution exists within the
/// limits.
pub fn solve(
    model: &RoutingModel,
    params: &SearchParameters,
    initial_routes: Option<&[Vec<NodeIndex>]>,
    monitors: &mut [&mut dyn SearchMonitor],
) -> Option<Assignment> {
    assert!(model.is_closed(), "search needs a closed model");

    for monitor in monitors.iter_mut() {
        monitor.enter_search();
    }

    let mut ctx = SearchContext::new(model, params);
    let result = run_search(&mut ctx, params, initial_routes, monitors);

    for monitor in monitors.iter_mut() {
        monitor.exit_search();
    }
    debug!(
        branches = ctx.stats.branches,
        solutions = ctx.stats.solutions,
        "search finished in {:?}",
        ctx.start.elapsed()
    );
    result
}

fn run_search(
    ctx: &mut SearchContext<'_>,
    params: &SearchParameters,
    initial_routes: Option<&[Vec<NodeIndex>]>,
    monitors: &mut [&mut dyn SearchMonitor],
) -> Option<Assignment> {
    let model = ctx.model;

    let seed_routes = match initial_routes {
        Some(seed) => sanitize_routes(ctx, seed),
        None => vec![Vec::new(); model.vehicle_count()],
    };
    let constructed = construct(ctx, params, seed_routes);

    // The relaxed construction result must pass the strict rules: every
    // mandatory visit inserted and the dropped cap honoured.
    let mut current = ctx.evaluate(&constructed, false)?;

    let mut best = current.clone();
    let mut best_reported = i64::MAX;
    report_solution(ctx, &mut best_reported, &current, monitors);

    let mut last_improvement = Instant::now();
    let mut stalled_rounds = 0u32;
    let mut tabu: Vec<NodeIndex> = Vec::new();

    loop {
        if ctx.out_of_time() || monitors.iter().any(|monitor| monitor.should_stop()) {
            break;
        }
        if let Some(limit) = params.solution_limit {
            if ctx.stats.solutions >= limit {
                break;
            }
        }
        if let Some(limit) = params.no_progress_time_limit {
            if last_improvement.elapsed() > limit {
                break;
            }
        }

        match improving_move(ctx, params, &current) {
            Some(next) => {
                if next.cost < best.cost {
                    best = next.clone();
                    last_improvement = Instant::now();
                    stalled_rounds = 0;
                    report_solution(ctx, &mut best_reported, &best, monitors);
                }
                current = next;
            }
            None => match params.metaheuristic {
                Metaheuristic::GreedyDescent => break,
                Metaheuristic::GuidedLocalSearch => {
                    stalled_rounds += 1;
                    if stalled_rounds > 30 {
                        break;
                    }
                    ctx.penalise_local_optimum(&current);
                }
                Metaheuristic::TabuSearch => {
                    stalled_rounds += 1;
                    if stalled_rounds > 30 {
                        break;
                    }
                    match perturb(ctx, &current, &mut tabu) {
                        Some(next) => current = next,
                        None => break,
                    }
                }
            },
        }
    }

    Some(best)
}

fn report_solution(
    ctx: &mut SearchContext<'_>,
    best_reported: &mut i64,
    assignment: &Assignment,
    monitors: &mut [&mut dyn SearchMonitor],
) {
    if assignment.cost >= *best_reported {
        return;
    }
    *best_reported = assignment.cost;
    ctx.stats.solutions += 1;
    ctx.stats.wall_time = ctx.start.elapsed();
    let stats = ctx.stats;
    for monitor in monitors.iter_mut() {
        monitor.at_solution(assignment, ctx.model, &stats);
    }
}

/// Clean a seed: drop unknown, duplicated or disallowed nodes, then rebuild
/// route by route, keeping each appended node only if the partial solution
/// stays feasible. Linked pairs are committed atomically once both siblings
/// have been seen, normalised onto ordered vehicles.
fn sanitize_routes(ctx: &mut SearchContext<'_>, seed: &[Vec<NodeIndex>]) -> Vec<Vec<NodeIndex>> {
    let model = ctx.model;
    let vehicle_count = model.vehicle_count();

    let mut seen = vec![false; model.node_count()];
    let mut cleaned: Vec<Vec<NodeIndex>> = vec![Vec::new(); vehicle_count];
    for (vehicle, route) in seed.iter().take(vehicle_count).enumerate() {
        for &node in route {
            if node.is_depot() || node.0 >= model.node_count() || seen[node.0] {
                continue;
            }
            if !model.is_vehicle_allowed(node, VehicleIndex(vehicle)) {
                continue;
            }
            seen[node.0] = true;
            cleaned[vehicle].push(node);
        }
    }

    let mut result: Vec<Vec<NodeIndex>> = vec![Vec::new(); vehicle_count];
    let mut pending_pairs: HashMap<usize, Vec<(usize, NodeIndex)>> = HashMap::new();

    for vehicle in 0..vehicle_count {
        for &node in cleaned[vehicle].clone().iter() {
            match model.link_of(node) {
                Some(link) if link.kind == LinkKind::Synchronized => {
                    let key = link.first.0;
                    let entry = pending_pairs.entry(key).or_default();
                    entry.push((vehicle, node));
                    if entry.len() < 2 {
                        continue;
                    }
                    let Some(pair) = pending_pairs.remove(&key) else {
                        continue;
                    };
                    let (vehicle_a, vehicle_b) = (pair[0].0.min(pair[1].0), pair[0].0.max(pair[1].0));
                    if vehicle_a == vehicle_b {
                        continue;
                    }
                    let mut candidate = result.clone();
                    candidate[vehicle_a].push(link.first);
                    candidate[vehicle_b].push(link.second);
                    if ctx.evaluate(&candidate, true).is_some() {
                        result = candidate;
                    }
                }
                _ => {
                    let mut candidate = result.clone();
                    candidate[vehicle].push(node);
                    if ctx.evaluate(&candidate, true).is_some() {
                        result = candidate;
                    }
                }
            }
        }
    }

    result
}

/// Complete a partial solution by cheapest insertion over the remaining
/// visit groups.
fn construct(
    ctx: &mut SearchContext<'_>,
    params: &SearchParameters,
    mut routes: Vec<Vec<NodeIndex>>,
) -> Vec<Vec<NodeIndex>> {
    let assigned: Vec<bool> = {
        let mut assigned = vec![false; ctx.model.node_count()];
        for route in &routes {
            for &node in route {
                assigned[node.0] = true;
            }
        }
        assigned
    };

    let mut remaining: Vec<Vec<NodeIndex>> = insertion_groups(ctx.model)
        .into_iter()
        .filter(|group| group.iter().all(|node| !assigned[node.0]))
        .collect();

    match params.first_solution {
        FirstSolutionStrategy::SequentialCheapestInsertion => {
            for group in remaining {
                if ctx.out_of_time() {
                    break;
                }
                if let Some((candidate, _)) = cheapest_insertion(ctx, &routes, &group) {
                    routes = candidate;
                }
            }
        }
        FirstSolutionStrategy::ParallelCheapestInsertion => {
            while !remaining.is_empty() && !ctx.out_of_time() {
                let mut best: Option<(usize, Vec<Vec<NodeIndex>>, i64)> = None;
                for (index, group) in remaining.iter().enumerate() {
                    if let Some((candidate, cost)) = cheapest_insertion(ctx, &routes, group) {
                        let better = match &best {
                            Some((_, _, best_cost)) => cost < *best_cost,
                            None => true,
                        };
                        if better {
                            best = Some((index, candidate, cost));
                        }
                    }
                }
                match best {
                    Some((index, candidate, _)) => {
                        routes = candidate;
                        remaining.swap_remove(index);
                    }
                    None => break,
                }
            }
        }
    }

    routes
}

/// The cheapest feasible placement of a visit group into the routes, with
/// the resulting total cost.
fn cheapest_insertion(
    ctx: &mut SearchContext<'_>,
    routes: &[Vec<NodeIndex>],
    group: &[NodeIndex],
) -> Option<(Vec<Vec<NodeIndex>>, i64)> {
    let model = ctx.model;
    let vehicle_count = model.vehicle_count();
    let mut best: Option<(Vec<Vec<NodeIndex>>, i64)> = None;

    match group {
        [node] => {
            for vehicle in 0..vehicle_count {
                if !model.is_vehicle_allowed(*node, VehicleIndex(vehicle)) {
                    continue;
                }
                for position in 0..=routes[vehicle].len() {
                    let mut candidate = routes.to_vec();
                    candidate[vehicle].insert(position, *node);
                    if let Some(assignment) = ctx.evaluate(&candidate, true) {
                        if best
                            .as_ref()
                            .map(|(_, cost)| assignment.cost < *cost)
                            .unwrap_or(true)
                        {
                            best = Some((candidate, assignment.cost));
                        }
                    }
                }
            }
        }
        [first, second] => {
            for vehicle_a in 0..vehicle_count {
                if !model.is_vehicle_allowed(*first, VehicleIndex(vehicle_a)) {
                    continue;
                }
                for vehicle_b in (vehicle_a + 1)..vehicle_count {
                    if !model.is_vehicle_allowed(*second, VehicleIndex(vehicle_b)) {
                        continue;
                    }
                    for position_a in 0..=routes[vehicle_a].len() {
                        for position_b in 0..=routes[vehicle_b].len() {
                            let mut candidate = routes.to_vec();
                            candidate[vehicle_a].insert(position_a, *first);
                            candidate[vehicle_b].insert(position_b, *second);
                            if let Some(assignment) = ctx.evaluate(&candidate, true) {
                                if best
                                    .as_ref()
                                    .map(|(_, cost)| assignment.cost < *cost)
                                    .unwrap_or(true)
                                {
                                    best = Some((candidate, assignment.cost));
                                }
                            }
                        }
                    }
                }
            }
        }
        _ => {}
    }

    best
}

/// Scan the enabled neighbourhoods for the first strictly improving move
/// under the augmented objective.
fn improving_move(
    ctx: &mut SearchContext<'_>,
    params: &SearchParameters,
    current: &Assignment,
) -> Option<Assignment> {
    let current_augmented = ctx.augmented_cost(current);

    if let Some(next) = reinsert_dropped(ctx, current, current_augmented) {
        return Some(next);
    }
    if params.operators.relocate {
        if let Some(next) = relocate(ctx, current, current_augmented) {
            return Some(next);
        }
    }
    if params.operators.relocate_pair {
        if let Some(next) = relocate_pair(ctx, current, current_augmented) {
            return Some(next);
        }
    }
    if params.operators.exchange {
        if let Some(next) = exchange(ctx, current, current_augmented) {
            return Some(next);
        }
    }
    if params.operators.cross_exchange {
        if let Some(next) = cross_exchange(ctx, current, current_augmented) {
            return Some(next);
        }
    }
    if params.operators.relocate_chain {
        if let Some(next) = relocate_chain(ctx, current, current_augmented) {
            return Some(next);
        }
    }
    None
}

fn accept(
    ctx: &mut SearchContext<'_>,
    candidate: &[Vec<NodeIndex>],
    current_augmented: i64,
) -> Option<Assignment> {
    let assignment = ctx.evaluate(candidate, false)?;
    if ctx.augmented_cost(&assignment) < current_augmented {
        Some(assignment)
    } else {
        None
    }
}

/// Try to bring dropped visit groups back into the solution.
fn reinsert_dropped(
    ctx: &mut SearchContext<'_>,
    current: &Assignment,
    current_augmented: i64,
) -> Option<Assignment> {
    let groups: Vec<Vec<NodeIndex>> = insertion_groups(ctx.model)
        .into_iter()
        .filter(|group| group.iter().all(|&node| current.is_dropped(node)))
        .collect();

    for group in groups {
        if ctx.out_of_time() {
            return None;
        }
        if let Some((candidate, _)) = cheapest_insertion(ctx, &current.routes, &group) {
            if let Some(next) = accept(ctx, &candidate, current_augmented) {
                return Some(next);
            }
        }
    }
    None
}

/// Nodes of synchronised pairs only move through the pair operator.
fn is_hard_linked(ctx: &SearchContext<'_>, node: NodeIndex) -> bool {
    matches!(
        ctx.model.link_of(node).map(|link| link.kind),
        Some(LinkKind::Synchronized)
    )
}

fn relocate(
    ctx: &mut SearchContext<'_>,
    current: &Assignment,
    current_augmented: i64,
) -> Option<Assignment> {
    let vehicle_count = current.routes.len();
    for from_vehicle in 0..vehicle_count {
        for from_position in 0..current.routes[from_vehicle].len() {
            let node = current.routes[from_vehicle][from_position];
            if is_hard_linked(ctx, node) {
                continue;
            }
            for to_vehicle in 0..vehicle_count {
                if !ctx.model.is_vehicle_allowed(node, VehicleIndex(to_vehicle)) {
                    continue;
                }
                let target_len = if to_vehicle == from_vehicle {
                    current.routes[to_vehicle].len() - 1
                } else {
                    current.routes[to_vehicle].len()
                };
                for to_position in 0..=target_len {
                    if to_vehicle == from_vehicle && to_position == from_position {
                        continue;
                    }
                    let mut candidate = current.routes.clone();
                    candidate[from_vehicle].remove(from_position);
                    candidate[to_vehicle].insert(to_position, node);
                    if let Some(next) = accept(ctx, &candidate, current_augmented) {
                        return Some(next);
                    }
                    if ctx.out_of_time() {
                        return None;
                    }
                }
            }
        }
    }
    None
}

/// Relocate a synchronised pair onto the best alternative vehicle pair.
fn relocate_pair(
    ctx: &mut SearchContext<'_>,
    current: &Assignment,
    current_augmented: i64,
) -> Option<Assignment> {
    let links: Vec<(NodeIndex, NodeIndex)> = ctx
        .model
        .links()
        .iter()
        .filter(|link| link.kind == LinkKind::Synchronized)
        .map(|link| (link.first, link.second))
        .collect();

    for (first, second) in links {
        let (Some(_), Some(_)) = (current.vehicle_of(first), current.vehicle_of(second)) else {
            continue;
        };
        let mut stripped = current.routes.clone();
        for route in &mut stripped {
            route.retain(|&node| node != first && node != second);
        }
        if let Some((candidate, _)) = cheapest_insertion(ctx, &stripped, &[first, second]) {
            if let Some(next) = accept(ctx, &candidate, current_augmented) {
                return Some(next);
            }
        }
        if ctx.out_of_time() {
            return None;
        }
    }
    None
}

fn exchange(
    ctx: &mut SearchContext<'_>,
    current: &Assignment,
    current_augmented: i64,
) -> Option<Assignment> {
    let vehicle_count = current.routes.len();
    for vehicle_a in 0..vehicle_count {
        for position_a in 0..current.routes[vehicle_a].len() {
            let node_a = current.routes[vehicle_a][position_a];
            if is_hard_linked(ctx, node_a) {
                continue;
            }
            for vehicle_b in vehicle_a..vehicle_count {
                let start_b = if vehicle_a == vehicle_b {
                    position_a + 1
                } else {
                    0
                };
                for position_b in start_b..current.routes[vehicle_b].len() {
                    let node_b = current.routes[vehicle_b][position_b];
                    if is_hard_linked(ctx, node_b) {
                        continue;
                    }
                    if !ctx.model.is_vehicle_allowed(node_a, VehicleIndex(vehicle_b))
                        || !ctx.model.is_vehicle_allowed(node_b, VehicleIndex(vehicle_a))
                    {
                        continue;
                    }
                    let mut candidate = current.routes.clone();
                    candidate[vehicle_a][position_a] = node_b;
                    candidate[vehicle_b][position_b] = node_a;
                    if let Some(next) = accept(ctx, &candidate, current_augmented) {
                        return Some(next);
                    }
                    if ctx.out_of_time() {
                        return None;
                    }
                }
            }
        }
    }
    None
}

/// Swap route tails between two vehicles.
fn cross_exchange(
    ctx: &mut SearchContext<'_>,
    current: &Assignment,
    current_augmented: i64,
) -> Option<Assignment> {
    let vehicle_count = current.routes.len();
    for vehicle_a in 0..vehicle_count {
        for vehicle_b in (vehicle_a + 1)..vehicle_count {
            for cut_a in 0..=current.routes[vehicle_a].len() {
                for cut_b in 0..=current.routes[vehicle_b].len() {
                    if cut_a == current.routes[vehicle_a].len()
                        && cut_b == current.routes[vehicle_b].len()
                    {
                        continue;
                    }
                    let mut candidate = current.routes.clone();
                    let tail_a: Vec<NodeIndex> = candidate[vehicle_a].split_off(cut_a);
                    let tail_b: Vec<NodeIndex> = candidate[vehicle_b].split_off(cut_b);
                    candidate[vehicle_a].extend(tail_b);
                    candidate[vehicle_b].extend(tail_a);
                    if let Some(next) = accept(ctx, &candidate, current_augmented) {
                        return Some(next);
                    }
                    if ctx.out_of_time() {
                        return None;
                    }
                }
            }
        }
    }
    None
}

/// Move short node chains between routes.
fn relocate_chain(
    ctx: &mut SearchContext<'_>,
    current: &Assignment,
    current_augmented: i64,
) -> Option<Assignment> {
    let vehicle_count = current.routes.len();
    for chain_len in 2..=3usize {
        for from_vehicle in 0..vehicle_count {
            let route_len = current.routes[from_vehicle].len();
            if route_len < chain_len {
                continue;
            }
            for from_position in 0..=(route_len - chain_len) {
                let chain: Vec<NodeIndex> = current.routes[from_vehicle]
                    [from_position..from_position + chain_len]
                    .to_vec();
                if chain.iter().any(|&node| is_hard_linked(ctx, node)) {
                    continue;
                }
                for to_vehicle in 0..vehicle_count {
                    if to_vehicle == from_vehicle {
                        continue;
                    }
                    if chain.iter().any(|&node| {
                        !ctx.model.is_vehicle_allowed(node, VehicleIndex(to_vehicle))
                    }) {
                        continue;
                    }
                    for to_position in 0..=current.routes[to_vehicle].len() {
                        let mut candidate = current.routes.clone();
                        candidate[from_vehicle].drain(from_position..from_position + chain_len);
                        for (offset, &node) in chain.iter().enumerate() {
                            candidate[to_vehicle].insert(to_position + offset, node);
                        }
                        if let Some(next) = accept(ctx, &candidate, current_augmented) {
                            return Some(next);
                        }
                        if ctx.out_of_time() {
                            return None;
                        }
                    }
                }
            }
        }
    }
    None
}

/// Tabu escape: move a random node somewhere feasible, even at a worse
/// cost, avoiding recently perturbed nodes.
fn perturb(
    ctx: &mut SearchContext<'_>,
    current: &Assignment,
    tabu: &mut Vec<NodeIndex>,
) -> Option<Assignment> {
    let movable: Vec<(usize, usize)> = current
        .routes
        .iter()
        .enumerate()
        .flat_map(|(vehicle, route)| {
            route
                .iter()
                .enumerate()
                .map(move |(position, _)| (vehicle, position))
        })
        .filter(|&(vehicle, position)| {
            let node = current.routes[vehicle][position];
            !is_hard_linked(ctx, node) && !tabu.contains(&node)
        })
        .collect();
    if movable.is_empty() {
        return None;
    }

    for _ in 0..16 {
        let (from_vehicle, from_position) = movable[ctx.rng.gen_range(0..movable.len())];
        let node = current.routes[from_vehicle][from_position];
        let to_vehicle = ctx.rng.gen_range(0..current.routes.len());
        if !ctx.model.is_vehicle_allowed(node, VehicleIndex(to_vehicle)) {
            continue;
        }
        let mut candidate = current.routes.clone();
        candidate[from_vehicle].remove(from_position);
        let to_position = ctx.rng.gen_range(0..=candidate[to_vehicle].len());
        candidate[to_vehicle].insert(to_position, node);
        if let Some(assignment) = ctx.evaluate(&candidate, false) {
            tabu.push(node);
            if tabu.len() > 20 {
                tabu.remove(0);
            }
            return Some(assignment);
        }
    }
    None
}
