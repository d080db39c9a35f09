//! Full assignments: every vehicle's committed route plus the dropped nodes.

use std::collections::HashMap;

use super::model::{LinkKind, RoutingModel};
use super::schedule::{evaluate_route, route_bounds, RouteSchedule};
use super::{NodeIndex, VehicleIndex};

/// A complete candidate solution.
#[derive(Debug, Clone, Default)]
pub struct Assignment {
    pub routes: Vec<Vec<NodeIndex>>,
    pub schedules: Vec<RouteSchedule>,
    pub dropped: Vec<NodeIndex>,
    pub cost: i64,
    pub travel_cost: i64,
    pub penalty_cost: i64,
    pub link_penalty_cost: i64,
    pub fixed_cost: i64,
}

impl Assignment {
    pub fn vehicle_of(&self, node: NodeIndex) -> Option<VehicleIndex> {
        self.routes
            .iter()
            .position(|route| route.contains(&node))
            .map(VehicleIndex)
    }

    pub fn start_of(&self, node: NodeIndex) -> Option<i64> {
        self.schedules
            .iter()
            .find_map(|schedule| schedule.start_of(node))
    }

    pub fn is_dropped(&self, node: NodeIndex) -> bool {
        self.dropped.binary_search(&node).is_ok()
    }

    pub fn is_vehicle_used(&self, vehicle: VehicleIndex) -> bool {
        !self.routes[vehicle.0].is_empty()
    }

    /// Count of disjunction groups with at least one dropped node; with
    /// both-or-none links in force this equals the number of dropped visits.
    pub fn dropped_visit_count(&self, model: &RoutingModel) -> usize {
        model
            .disjunctions()
            .iter()
            .filter(|disjunction| {
                disjunction
                    .nodes
                    .iter()
                    .any(|&node| self.is_dropped(node))
            })
            .count()
    }
}

/// Stand-in penalty for a mandatory node left unassigned while a solution
/// is still being constructed.
pub(crate) const MANDATORY_DROP_PENALTY: i64 = 1 << 40;

/// Evaluate a set of candidate routes into a committed assignment.
///
/// Returns `None` when the candidate violates any hard requirement: an
/// unknown or duplicated node, a node on a forbidden vehicle, a mandatory
/// node left out, a broken visit link, an unmeetable time window, the
/// dropped-node cap, or a route constraint rejection.
pub fn evaluate_assignment(
    model: &RoutingModel,
    routes: &[Vec<NodeIndex>],
) -> Option<Assignment> {
    evaluate_with_options(model, routes, false)
}

/// Like [`evaluate_assignment`] but tolerant of partially built solutions:
/// mandatory nodes may still be missing (at a prohibitive penalty) and the
/// dropped-node cap is not enforced yet.
pub(crate) fn evaluate_relaxed(
    model: &RoutingModel,
    routes: &[Vec<NodeIndex>],
) -> Option<Assignment> {
    evaluate_with_options(model, routes, true)
}

fn evaluate_with_options(
    model: &RoutingModel,
    routes: &[Vec<NodeIndex>],
    relax_mandatory: bool,
) -> Option<Assignment> {
    debug_assert!(model.is_closed(), "evaluating against an open model");
    if routes.len() != model.vehicle_count() {
        return None;
    }

    // Node placement sanity plus the vehicle allow-lists.
    let mut position_of: HashMap<NodeIndex, (VehicleIndex, usize)> = HashMap::new();
    for (vehicle, route) in routes.iter().enumerate() {
        for (position, &node) in route.iter().enumerate() {
            if node.is_depot() || node.0 >= model.node_count() {
                return None;
            }
            if !model.is_vehicle_allowed(node, VehicleIndex(vehicle)) {
                return None;
            }
            if position_of
                .insert(node, (VehicleIndex(vehicle), position))
                .is_some()
            {
                return None;
            }
        }
    }

    let mut dropped: Vec<NodeIndex> = model
        .visit_nodes()
        .filter(|node| !position_of.contains_key(node))
        .collect();
    dropped.sort_unstable();

    // Every dropped node must belong to a disjunction; nodes without one
    // are mandatory.
    let mut mandatory_dropped = 0i64;
    for &node in &dropped {
        if model.disjunction_of(node).is_none() {
            if relax_mandatory {
                mandatory_dropped += 1;
            } else {
                return None;
            }
        }
    }
    if !relax_mandatory {
        if let Some(limit) = model.max_dropped_nodes() {
            if dropped.len() > limit {
                return None;
            }
        }
    }

    // Visit links: both-or-none, distinct ordered vehicles, and a common
    // start instant for synchronised pairs.
    let mut pins: HashMap<NodeIndex, i64> = HashMap::new();
    for link in model.links() {
        let first = position_of.get(&link.first).copied();
        let second = position_of.get(&link.second).copied();
        match (first, second) {
            (None, None) => continue,
            (Some((vehicle_a, _)), Some((vehicle_b, _))) => {
                if vehicle_a == vehicle_b {
                    return None;
                }
                if link.kind == LinkKind::Synchronized {
                    if vehicle_a >= vehicle_b {
                        return None;
                    }
                    let route_a = &routes[vehicle_a.0];
                    let route_b = &routes[vehicle_b.0];
                    let (earliest_a, latest_a) =
                        route_bounds(model, vehicle_a, route_a, &pins)?;
                    let (earliest_b, latest_b) =
                        route_bounds(model, vehicle_b, route_b, &pins)?;
                    let pos_a = position_of[&link.first].1;
                    let pos_b = position_of[&link.second].1;

                    let lower = earliest_a[pos_a].max(earliest_b[pos_b]);
                    let upper = latest_a[pos_a].min(latest_b[pos_b]);
                    if lower > upper {
                        return None;
                    }
                    pins.insert(link.first, lower);
                    pins.insert(link.second, lower);
                }
            }
            // A half-dropped pair survives only under a soft link; the
            // enforcement loop is responsible for repairing it.
            _ => {
                if link.kind == LinkKind::Synchronized {
                    return None;
                }
            }
        }
    }

    let mut schedules = Vec::with_capacity(routes.len());
    for (vehicle, route) in routes.iter().enumerate() {
        schedules.push(evaluate_route(model, VehicleIndex(vehicle), route, &pins)?);
    }

    let travel_cost: i64 = schedules.iter().map(|schedule| schedule.travel_cost).sum();
    let fixed_cost: i64 = routes
        .iter()
        .enumerate()
        .filter(|(_, route)| !route.is_empty())
        .map(|(vehicle, _)| model.vehicle_fixed_cost(VehicleIndex(vehicle)))
        .sum();
    let penalty_cost: i64 = model
        .disjunctions()
        .iter()
        .filter(|disjunction| {
            disjunction
                .nodes
                .iter()
                .any(|node| !position_of.contains_key(node))
        })
        .map(|disjunction| disjunction.penalty)
        .sum::<i64>()
        + mandatory_dropped * MANDATORY_DROP_PENALTY;

    let mut link_penalty_cost = 0;
    for link in model.links() {
        if let LinkKind::Soft { penalty_per_second } = link.kind {
            let start_a = schedules
                .iter()
                .find_map(|schedule| schedule.start_of(link.first));
            let start_b = schedules
                .iter()
                .find_map(|schedule| schedule.start_of(link.second));
            if let (Some(a), Some(b)) = (start_a, start_b) {
                link_penalty_cost += penalty_per_second * (a - b).abs();
            }
        }
    }

    let mut assignment = Assignment {
        routes: routes.to_vec(),
        schedules,
        dropped,
        cost: 0,
        travel_cost,
        penalty_cost,
        link_penalty_cost,
        fixed_cost,
    };
    assignment.cost = match model.cost_override() {
        Some(callback) => callback(&assignment),
        None => travel_cost + fixed_cost + penalty_cost + link_penalty_cost,
    };
    Some(assignment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::model::VisitLink;
    use crate::types::VisitId;

    // Depot plus four visit nodes, uniform 600s travel and 300s service.
    fn model(vehicles: usize) -> RoutingModel {
        let mut model = RoutingModel::new(5, vehicles, 86_400);
        model.set_arc_cost(Box::new(|from, to| {
            if from == to || from.is_depot() || to.is_depot() {
                0
            } else {
                600
            }
        }));
        model.set_transit(Box::new(|from, to| {
            let service = if from.is_depot() { 0 } else { 300 };
            let travel = if from == to || from.is_depot() || to.is_depot() {
                0
            } else {
                600
            };
            service + travel
        }));
        for node in 1..5 {
            model.set_service_time(NodeIndex(node), 300);
        }
        model
    }

    #[test]
    fn test_simple_assignment_cost() {
        let mut m = model(1);
        m.close();

        let routes = vec![vec![NodeIndex(1), NodeIndex(2), NodeIndex(3), NodeIndex(4)]];
        let assignment = evaluate_assignment(&m, &routes).unwrap();
        assert_eq!(assignment.travel_cost, 1800);
        assert_eq!(assignment.cost, 1800);
        assert!(assignment.dropped.is_empty());
    }

    #[test]
    fn test_mandatory_node_cannot_be_dropped() {
        let mut m = model(1);
        m.close();

        let routes = vec![vec![NodeIndex(1), NodeIndex(2), NodeIndex(3)]];
        assert!(evaluate_assignment(&m, &routes).is_none());
    }

    #[test]
    fn test_dropped_disjunction_charges_penalty() {
        let mut m = model(1);
        for node in 1..5 {
            m.add_disjunction(vec![NodeIndex(node)], 10_000, 1);
        }
        m.close();

        let routes = vec![vec![NodeIndex(1), NodeIndex(2), NodeIndex(3)]];
        let assignment = evaluate_assignment(&m, &routes).unwrap();
        assert_eq!(assignment.dropped, vec![NodeIndex(4)]);
        assert_eq!(assignment.penalty_cost, 10_000);
        assert_eq!(assignment.cost, 1200 + 10_000);
        assert_eq!(assignment.dropped_visit_count(&m), 1);
    }

    #[test]
    fn test_max_dropped_nodes_cap() {
        let mut m = model(1);
        for node in 1..5 {
            m.add_disjunction(vec![NodeIndex(node)], 10_000, 1);
        }
        m.set_max_dropped_nodes(1);
        m.close();

        let two_dropped = vec![vec![NodeIndex(1), NodeIndex(2)]];
        assert!(evaluate_assignment(&m, &two_dropped).is_none());

        let one_dropped = vec![vec![NodeIndex(1), NodeIndex(2), NodeIndex(3)]];
        assert!(evaluate_assignment(&m, &one_dropped).is_some());
    }

    #[test]
    fn test_synchronised_link_pins_common_start() {
        let mut m = model(2);
        m.add_link(VisitLink {
            visit: VisitId(1),
            first: NodeIndex(1),
            second: NodeIndex(2),
            kind: LinkKind::Synchronized,
        });
        m.set_node_window(NodeIndex(1), 1000, 4000);
        m.set_node_window(NodeIndex(2), 2000, 5000);
        m.close();

        let routes = vec![vec![NodeIndex(1), NodeIndex(3)], vec![NodeIndex(2), NodeIndex(4)]];
        let assignment = evaluate_assignment(&m, &routes).unwrap();

        let start_a = assignment.start_of(NodeIndex(1)).unwrap();
        let start_b = assignment.start_of(NodeIndex(2)).unwrap();
        assert_eq!(start_a, start_b);
        assert_eq!(start_a, 2000);
    }

    #[test]
    fn test_synchronised_link_rejects_same_vehicle() {
        let mut m = model(2);
        m.add_link(VisitLink {
            visit: VisitId(1),
            first: NodeIndex(1),
            second: NodeIndex(2),
            kind: LinkKind::Synchronized,
        });
        m.close();

        let routes = vec![vec![NodeIndex(1), NodeIndex(2), NodeIndex(3), NodeIndex(4)], vec![]];
        assert!(evaluate_assignment(&m, &routes).is_none());
    }

    #[test]
    fn test_synchronised_link_requires_vehicle_order() {
        let mut m = model(2);
        m.add_link(VisitLink {
            visit: VisitId(1),
            first: NodeIndex(1),
            second: NodeIndex(2),
            kind: LinkKind::Synchronized,
        });
        m.close();

        // The first node of the pair must ride on the lower vehicle index.
        let reversed = vec![vec![NodeIndex(2), NodeIndex(3)], vec![NodeIndex(1), NodeIndex(4)]];
        assert!(evaluate_assignment(&m, &reversed).is_none());

        let ordered = vec![vec![NodeIndex(1), NodeIndex(3)], vec![NodeIndex(2), NodeIndex(4)]];
        assert!(evaluate_assignment(&m, &ordered).is_some());
    }

    #[test]
    fn test_hard_link_rejects_half_dropped_pair() {
        let mut m = model(2);
        m.add_disjunction(vec![NodeIndex(1), NodeIndex(2)], 10_000, 2);
        m.add_disjunction(vec![NodeIndex(3)], 10_000, 1);
        m.add_disjunction(vec![NodeIndex(4)], 10_000, 1);
        m.add_link(VisitLink {
            visit: VisitId(1),
            first: NodeIndex(1),
            second: NodeIndex(2),
            kind: LinkKind::Synchronized,
        });
        m.close();

        let half = vec![vec![NodeIndex(1), NodeIndex(3)], vec![NodeIndex(4)]];
        assert!(evaluate_assignment(&m, &half).is_none());

        // Dropping the pair together is allowed at one penalty.
        let both = vec![vec![NodeIndex(3)], vec![NodeIndex(4)]];
        let assignment = evaluate_assignment(&m, &both).unwrap();
        assert_eq!(assignment.penalty_cost, 10_000);
        assert_eq!(assignment.dropped_visit_count(&m), 1);
    }

    #[test]
    fn test_soft_link_charges_drift() {
        let mut m = model(2);
        m.add_link(VisitLink {
            visit: VisitId(1),
            first: NodeIndex(1),
            second: NodeIndex(2),
            kind: LinkKind::Soft {
                penalty_per_second: 2,
            },
        });
        m.set_node_window(NodeIndex(1), 1000, 1000);
        m.set_node_window(NodeIndex(2), 1600, 1600);
        m.close();

        let routes = vec![vec![NodeIndex(1), NodeIndex(3)], vec![NodeIndex(2), NodeIndex(4)]];
        let assignment = evaluate_assignment(&m, &routes).unwrap();
        assert_eq!(assignment.link_penalty_cost, 1200);
    }

    #[test]
    fn test_vehicle_fixed_cost_only_for_used_vehicles() {
        let mut m = model(2);
        m.set_vehicle_fixed_cost(VehicleIndex(0), 111);
        m.set_vehicle_fixed_cost(VehicleIndex(1), 222);
        m.close();

        let routes = vec![vec![NodeIndex(1), NodeIndex(2), NodeIndex(3), NodeIndex(4)], vec![]];
        let assignment = evaluate_assignment(&m, &routes).unwrap();
        assert_eq!(assignment.fixed_cost, 111);
    }
}
