//! Routing engine underneath the solver pipeline.
//!
//! The engine owns the generic machinery: a routing model over nodes and
//! vehicles, time propagation along vehicle paths, custom route
//! constraints, and the search loop (cheapest insertion plus local search
//! with pluggable monitors). Problem knowledge lives in the solver layer,
//! which populates the model through the builder API.

pub mod assignment;
pub mod model;
pub mod schedule;
pub mod search;

pub use assignment::Assignment;
pub use model::{
    BreakIntervalVar, BreakWindow, ConstraintViolation, Disjunction, LinkKind, PathContext,
    RouteConstraint, RoutingModel, VisitLink,
};
pub use schedule::RouteSchedule;
pub use search::{
    FirstSolutionStrategy, Metaheuristic, OperatorSet, SearchMonitor, SearchParameters,
    SearchStats, solve,
};

use std::fmt;

/// Index of a routing node. Node 0 is always the depot; visit nodes follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeIndex(pub usize);

impl NodeIndex {
    pub const DEPOT: NodeIndex = NodeIndex(0);

    pub fn is_depot(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for NodeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Index of a vehicle, the routing model's stand-in for a carer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VehicleIndex(pub usize);

impl fmt::Display for VehicleIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}
