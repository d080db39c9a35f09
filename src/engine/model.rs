//! The routing model and its constraint surface.

use thiserror::Error;

use super::{NodeIndex, VehicleIndex};
use crate::types::VisitId;

/// Transit callback over an arc, in seconds.
pub type TransitCallback = Box<dyn Fn(NodeIndex, NodeIndex) -> i64 + Send + Sync>;

/// Objective callback used when a solver replaces the travel objective.
pub type CostCallback = Box<dyn Fn(&super::Assignment) -> i64 + Send + Sync>;

/// A group of nodes the search may drop together at a fixed penalty.
#[derive(Debug, Clone)]
pub struct Disjunction {
    pub nodes: Vec<NodeIndex>,
    pub penalty: i64,
    pub max_cardinality: usize,
}

/// How the two nodes of a multi-carer visit are tied together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    /// Both nodes start at the same instant on two distinct vehicles, with
    /// the lower vehicle index serving the first node.
    Synchronized,
    /// Start times may drift apart at a price per second of drift.
    Soft { penalty_per_second: i64 },
}

/// The pair of nodes belonging to one two-carer visit.
#[derive(Debug, Clone)]
pub struct VisitLink {
    pub visit: VisitId,
    pub first: NodeIndex,
    pub second: NodeIndex,
    pub kind: LinkKind,
}

/// A break interval attached to a vehicle before the search runs.
#[derive(Debug, Clone)]
pub struct BreakWindow {
    pub start_min: i64,
    pub start_max: i64,
    pub duration: i64,
    /// Pinned intervals model the gaps outside the carer's shift; their
    /// start never moves.
    pub pinned: bool,
}

/// A break interval variable during propagation: placement is decided by
/// the break constraint once a vehicle path closes.
#[derive(Debug, Clone)]
pub struct BreakIntervalVar {
    pub start_min: i64,
    pub start_max: i64,
    pub duration: i64,
    pub performed: Option<bool>,
    pub start: Option<i64>,
}

impl BreakIntervalVar {
    pub fn from_window(window: &BreakWindow) -> Self {
        Self {
            start_min: window.start_min,
            start_max: window.start_max,
            duration: window.duration,
            performed: None,
            start: None,
        }
    }

    pub fn end(&self) -> Option<i64> {
        self.start.map(|start| start + self.duration)
    }
}

/// Raised by a route constraint that cannot accept a closed path.
#[derive(Debug, Error)]
#[error("constraint {constraint} rejected vehicle {vehicle}: {reason}")]
pub struct ConstraintViolation {
    pub constraint: &'static str,
    pub vehicle: VehicleIndex,
    pub reason: String,
}

/// View of one closed vehicle path handed to route constraints.
///
/// `starts` holds the committed service start of every node on the path and
/// may be pushed later (never earlier) by a constraint, up to the matching
/// entry of `latest`. Break interval variables are owned by the context and
/// resolved in place.
pub struct PathContext<'a> {
    pub vehicle: VehicleIndex,
    pub nodes: &'a [NodeIndex],
    pub starts: &'a mut Vec<i64>,
    pub latest: &'a [i64],
    /// Service duration of each node on the path.
    pub services: &'a [i64],
    /// `travels[i]` is the road time from `nodes[i]` to `nodes[i + 1]`.
    pub travels: &'a [i64],
    pub shift_start: i64,
    pub shift_end_max: i64,
    pub breaks: &'a mut Vec<BreakIntervalVar>,
}

/// A custom constraint observing closed vehicle paths.
///
/// `post` runs once when the model closes; `propagate` runs whenever the
/// engine commits a candidate path for the constraint's vehicle.
pub trait RouteConstraint: Send + Sync {
    fn name(&self) -> &'static str;

    /// The vehicle this constraint watches, or `None` for every vehicle.
    fn vehicle(&self) -> Option<VehicleIndex> {
        None
    }

    fn post(&mut self, _model: &RoutingModel) {}

    fn propagate(&self, ctx: &mut PathContext<'_>) -> Result<(), ConstraintViolation>;
}

/// The routing model assembled by the solver layer.
///
/// Node 0 is the depot. The model is mutable while being built and closed
/// exactly once before search; `close` validates the configuration and
/// posts the registered route constraints.
pub struct RoutingModel {
    node_count: usize,
    vehicle_count: usize,
    horizon: i64,
    arc_cost: Option<TransitCallback>,
    transit: Option<TransitCallback>,
    service_times: Vec<i64>,
    node_windows: Vec<(i64, i64)>,
    vehicle_start_windows: Vec<(i64, i64)>,
    vehicle_end_windows: Vec<(i64, i64)>,
    allowed_vehicles: Vec<Option<Vec<VehicleIndex>>>,
    vehicle_fixed_costs: Vec<i64>,
    disjunctions: Vec<Disjunction>,
    disjunction_of_node: Vec<Option<usize>>,
    links: Vec<VisitLink>,
    link_of_node: Vec<Option<usize>>,
    vehicle_breaks: Vec<Vec<BreakWindow>>,
    constraints: Vec<Box<dyn RouteConstraint>>,
    max_dropped_nodes: Option<usize>,
    cost_override: Option<CostCallback>,
    closed: bool,
}

impl RoutingModel {
    pub fn new(node_count: usize, vehicle_count: usize, horizon: i64) -> Self {
        assert!(node_count >= 1, "model must at least contain the depot");
        Self {
            node_count,
            vehicle_count,
            horizon,
            arc_cost: None,
            transit: None,
            service_times: vec![0; node_count],
            node_windows: vec![(0, horizon); node_count],
            vehicle_start_windows: vec![(0, horizon); vehicle_count],
            vehicle_end_windows: vec![(0, horizon); vehicle_count],
            allowed_vehicles: vec![None; node_count],
            vehicle_fixed_costs: vec![0; vehicle_count],
            disjunctions: Vec::new(),
            disjunction_of_node: vec![None; node_count],
            links: Vec::new(),
            link_of_node: vec![None; node_count],
            vehicle_breaks: vec![Vec::new(); vehicle_count],
            constraints: Vec::new(),
            max_dropped_nodes: None,
            cost_override: None,
            closed: false,
        }
    }

    pub fn node_count(&self) -> usize {
        self.node_count
    }

    pub fn vehicle_count(&self) -> usize {
        self.vehicle_count
    }

    pub fn horizon(&self) -> i64 {
        self.horizon
    }

    pub fn visit_nodes(&self) -> impl Iterator<Item = NodeIndex> {
        (1..self.node_count).map(NodeIndex)
    }

    pub fn set_arc_cost(&mut self, callback: TransitCallback) {
        self.assert_open();
        self.arc_cost = Some(callback);
    }

    pub fn set_transit(&mut self, callback: TransitCallback) {
        self.assert_open();
        self.transit = Some(callback);
    }

    pub fn set_service_time(&mut self, node: NodeIndex, seconds: i64) {
        self.assert_open();
        self.service_times[node.0] = seconds;
    }

    pub fn set_node_window(&mut self, node: NodeIndex, begin: i64, end: i64) {
        self.assert_open();
        self.node_windows[node.0] = (begin, end);
    }

    pub fn set_vehicle_start_window(&mut self, vehicle: VehicleIndex, begin: i64, end: i64) {
        self.assert_open();
        self.vehicle_start_windows[vehicle.0] = (begin, end);
    }

    pub fn set_vehicle_end_window(&mut self, vehicle: VehicleIndex, begin: i64, end: i64) {
        self.assert_open();
        self.vehicle_end_windows[vehicle.0] = (begin, end);
    }

    pub fn set_allowed_vehicles(&mut self, node: NodeIndex, vehicles: Vec<VehicleIndex>) {
        self.assert_open();
        self.allowed_vehicles[node.0] = Some(vehicles);
    }

    pub fn set_vehicle_fixed_cost(&mut self, vehicle: VehicleIndex, cost: i64) {
        self.assert_open();
        self.vehicle_fixed_costs[vehicle.0] = cost;
    }

    pub fn add_disjunction(&mut self, nodes: Vec<NodeIndex>, penalty: i64, max_cardinality: usize) {
        self.assert_open();
        let index = self.disjunctions.len();
        for node in &nodes {
            self.disjunction_of_node[node.0] = Some(index);
        }
        self.disjunctions.push(Disjunction {
            nodes,
            penalty,
            max_cardinality,
        });
    }

    pub fn add_link(&mut self, link: VisitLink) {
        self.assert_open();
        let index = self.links.len();
        self.link_of_node[link.first.0] = Some(index);
        self.link_of_node[link.second.0] = Some(index);
        self.links.push(link);
    }

    /// Replace the kind of the link covering `node`, if any. The
    /// enforcement loop hardens soft links this way between solves.
    pub fn harden_link_of(&mut self, node: NodeIndex) -> bool {
        let Some(index) = self.link_of_node[node.0] else {
            return false;
        };
        self.links[index].kind = LinkKind::Synchronized;
        true
    }

    pub fn set_vehicle_breaks(&mut self, vehicle: VehicleIndex, breaks: Vec<BreakWindow>) {
        self.assert_open();
        self.vehicle_breaks[vehicle.0] = breaks;
    }

    pub fn add_constraint(&mut self, constraint: Box<dyn RouteConstraint>) {
        self.assert_open();
        self.constraints.push(constraint);
    }

    pub fn set_max_dropped_nodes(&mut self, limit: usize) {
        self.assert_open();
        self.max_dropped_nodes = Some(limit);
    }

    pub fn set_cost_override(&mut self, callback: CostCallback) {
        self.assert_open();
        self.cost_override = Some(callback);
    }

    /// Validate the configuration and post all registered constraints.
    pub fn close(&mut self) {
        assert!(!self.closed, "model closed twice");
        assert!(self.arc_cost.is_some(), "arc cost callback missing");
        assert!(self.transit.is_some(), "transit callback missing");
        self.closed = true;

        let mut constraints = std::mem::take(&mut self.constraints);
        for constraint in &mut constraints {
            constraint.post(self);
        }
        self.constraints = constraints;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn assert_open(&self) {
        assert!(!self.closed, "model already closed");
    }

    // Accessors used during propagation and search.

    pub fn arc_cost(&self, from: NodeIndex, to: NodeIndex) -> i64 {
        self.arc_cost.as_ref().map(|cb| cb(from, to)).unwrap_or(0)
    }

    pub fn transit(&self, from: NodeIndex, to: NodeIndex) -> i64 {
        self.transit.as_ref().map(|cb| cb(from, to)).unwrap_or(0)
    }

    /// Road time alone, without the service component of the transit.
    pub fn travel(&self, from: NodeIndex, to: NodeIndex) -> i64 {
        self.transit(from, to) - self.service_times[from.0]
    }

    pub fn service_time(&self, node: NodeIndex) -> i64 {
        self.service_times[node.0]
    }

    pub fn node_window(&self, node: NodeIndex) -> (i64, i64) {
        self.node_windows[node.0]
    }

    pub fn vehicle_start_window(&self, vehicle: VehicleIndex) -> (i64, i64) {
        self.vehicle_start_windows[vehicle.0]
    }

    pub fn vehicle_end_window(&self, vehicle: VehicleIndex) -> (i64, i64) {
        self.vehicle_end_windows[vehicle.0]
    }

    pub fn is_vehicle_allowed(&self, node: NodeIndex, vehicle: VehicleIndex) -> bool {
        match &self.allowed_vehicles[node.0] {
            None => true,
            Some(allowed) => allowed.contains(&vehicle),
        }
    }

    pub fn vehicle_fixed_cost(&self, vehicle: VehicleIndex) -> i64 {
        self.vehicle_fixed_costs[vehicle.0]
    }

    pub fn disjunctions(&self) -> &[Disjunction] {
        &self.disjunctions
    }

    pub fn disjunction_of(&self, node: NodeIndex) -> Option<&Disjunction> {
        self.disjunction_of_node[node.0].map(|index| &self.disjunctions[index])
    }

    pub fn links(&self) -> &[VisitLink] {
        &self.links
    }

    pub fn link_of(&self, node: NodeIndex) -> Option<&VisitLink> {
        self.link_of_node[node.0].map(|index| &self.links[index])
    }

    /// The linked partner of `node`, if the node belongs to a visit pair.
    pub fn sibling_of(&self, node: NodeIndex) -> Option<NodeIndex> {
        self.link_of(node).map(|link| {
            if link.first == node {
                link.second
            } else {
                link.first
            }
        })
    }

    pub fn vehicle_breaks(&self, vehicle: VehicleIndex) -> &[BreakWindow] {
        &self.vehicle_breaks[vehicle.0]
    }

    pub fn constraints(&self) -> &[Box<dyn RouteConstraint>] {
        &self.constraints
    }

    pub fn max_dropped_nodes(&self) -> Option<usize> {
        self.max_dropped_nodes
    }

    pub fn cost_override(&self) -> Option<&CostCallback> {
        self.cost_override.as_ref()
    }
}
