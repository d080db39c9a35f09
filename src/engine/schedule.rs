//! Time propagation along a single vehicle path.

use std::collections::HashMap;

use super::model::{BreakIntervalVar, PathContext, RoutingModel};
use super::{NodeIndex, VehicleIndex};

/// The committed timing of one vehicle's route.
#[derive(Debug, Clone, Default)]
pub struct RouteSchedule {
    pub nodes: Vec<NodeIndex>,
    /// Service start of each node, aligned with `nodes`.
    pub starts: Vec<i64>,
    /// Latest admissible start of each node, aligned with `nodes`.
    pub latest: Vec<i64>,
    pub shift_start: i64,
    pub shift_end: i64,
    pub breaks: Vec<BreakIntervalVar>,
    pub travel_cost: i64,
}

impl RouteSchedule {
    pub fn start_of(&self, node: NodeIndex) -> Option<i64> {
        self.nodes
            .iter()
            .position(|&candidate| candidate == node)
            .map(|position| self.starts[position])
    }
}

/// Earliest and latest service starts for every position of a candidate
/// path, or `None` when the path cannot meet its time windows.
///
/// `pins` fixes the start of individual nodes; a pinned node's bounds
/// collapse to the pinned instant.
pub fn route_bounds(
    model: &RoutingModel,
    vehicle: VehicleIndex,
    nodes: &[NodeIndex],
    pins: &HashMap<NodeIndex, i64>,
) -> Option<(Vec<i64>, Vec<i64>)> {
    if nodes.is_empty() {
        return Some((Vec::new(), Vec::new()));
    }

    let n = nodes.len();
    let (start_window_min, _) = model.vehicle_start_window(vehicle);
    let (_, end_window_max) = model.vehicle_end_window(vehicle);

    let mut earliest = vec![0i64; n];
    let mut latest = vec![0i64; n];

    for position in 0..n {
        let node = nodes[position];
        let (window_min, window_max) = model.node_window(node);
        let mut value = if position == 0 {
            window_min.max(start_window_min + model.transit(NodeIndex::DEPOT, node))
        } else {
            window_min.max(earliest[position - 1] + model.transit(nodes[position - 1], node))
        };
        if let Some(&pinned) = pins.get(&node) {
            if pinned < value || pinned > window_max {
                return None;
            }
            value = pinned;
        }
        if value > window_max {
            return None;
        }
        earliest[position] = value;
    }

    for position in (0..n).rev() {
        let node = nodes[position];
        let (_, window_max) = model.node_window(node);
        let mut value = if position == n - 1 {
            window_max.min(end_window_max - model.transit(node, NodeIndex::DEPOT))
        } else {
            window_max.min(latest[position + 1] - model.transit(node, nodes[position + 1]))
        };
        if let Some(&pinned) = pins.get(&node) {
            value = value.min(pinned);
        }
        if value < earliest[position] {
            return None;
        }
        latest[position] = value;
    }

    Some((earliest, latest))
}

/// Commit a candidate path: propagate start times to their earliest
/// feasible values, then let every registered route constraint inspect the
/// closed path. Constraints may push starts later within the latest bounds
/// and resolve the vehicle's break intervals.
pub fn evaluate_route(
    model: &RoutingModel,
    vehicle: VehicleIndex,
    nodes: &[NodeIndex],
    pins: &HashMap<NodeIndex, i64>,
) -> Option<RouteSchedule> {
    let (earliest, latest) = route_bounds(model, vehicle, nodes, pins)?;
    let mut starts = earliest;

    let (start_window_min, start_window_max) = model.vehicle_start_window(vehicle);
    let departure = |starts: &[i64]| match nodes.first() {
        Some(&first) => {
            (starts[0] - model.transit(NodeIndex::DEPOT, first))
                .clamp(start_window_min, start_window_max)
        }
        None => start_window_min,
    };
    let shift_start = departure(&starts);
    let shift_end_max = model.vehicle_end_window(vehicle).1;

    let services: Vec<i64> = nodes.iter().map(|&node| model.service_time(node)).collect();
    let travels: Vec<i64> = nodes
        .windows(2)
        .map(|pair| model.travel(pair[0], pair[1]))
        .collect();

    let mut breaks: Vec<BreakIntervalVar> = model
        .vehicle_breaks(vehicle)
        .iter()
        .map(BreakIntervalVar::from_window)
        .collect();

    {
        let mut ctx = PathContext {
            vehicle,
            nodes,
            starts: &mut starts,
            latest: &latest,
            services: &services,
            travels: &travels,
            shift_start,
            shift_end_max,
            breaks: &mut breaks,
        };
        for constraint in model.constraints() {
            match constraint.vehicle() {
                Some(watched) if watched != vehicle => continue,
                _ => {}
            }
            if constraint.propagate(&mut ctx).is_err() {
                return None;
            }
        }
    }

    // Constraints may only delay starts; reject any that broke the chain.
    for position in 0..nodes.len() {
        if starts[position] > latest[position] {
            return None;
        }
        if position > 0 {
            let min_start =
                starts[position - 1] + model.transit(nodes[position - 1], nodes[position]);
            if starts[position] < min_start {
                return None;
            }
        }
    }

    // Constraints may have delayed the first visit; the vehicle leaves the
    // depot as late as its start window allows.
    let shift_start = departure(&starts);

    let shift_end = match nodes.last() {
        Some(&last) => {
            let finish = starts[nodes.len() - 1] + model.transit(last, NodeIndex::DEPOT);
            if finish > shift_end_max {
                return None;
            }
            finish.max(model.vehicle_end_window(vehicle).0)
        }
        None => shift_start,
    };

    let mut travel_cost = 0;
    if let (Some(&first), Some(&last)) = (nodes.first(), nodes.last()) {
        travel_cost += model.arc_cost(NodeIndex::DEPOT, first);
        travel_cost += nodes
            .windows(2)
            .map(|pair| model.arc_cost(pair[0], pair[1]))
            .sum::<i64>();
        travel_cost += model.arc_cost(last, NodeIndex::DEPOT);
    }

    Some(RouteSchedule {
        nodes: nodes.to_vec(),
        starts,
        latest,
        shift_start,
        shift_end,
        breaks,
        travel_cost,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::RoutingModel;

    // Four nodes: depot plus three visits 600 seconds apart by road, each
    // with a 300 second service time.
    fn model() -> RoutingModel {
        let mut model = RoutingModel::new(4, 1, 36_000);
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
        for node in 1..4 {
            model.set_service_time(NodeIndex(node), 300);
        }
        model
    }

    #[test]
    fn test_bounds_forward_chain() {
        let mut m = model();
        m.set_node_window(NodeIndex(1), 1000, 2000);
        m.set_node_window(NodeIndex(2), 0, 36_000);
        m.close();

        let nodes = [NodeIndex(1), NodeIndex(2)];
        let (earliest, latest) =
            route_bounds(&m, VehicleIndex(0), &nodes, &HashMap::new()).unwrap();

        assert_eq!(earliest, vec![1000, 1900]);
        // Second node may wait until the horizon allows returning in time.
        assert!(latest[0] <= 2000);
        assert!(latest[1] >= earliest[1]);
    }

    #[test]
    fn test_bounds_reject_impossible_windows() {
        let mut m = model();
        m.set_node_window(NodeIndex(1), 1000, 1100);
        m.set_node_window(NodeIndex(2), 1000, 1100);
        m.close();

        // 900 seconds of service plus travel separate the two visits.
        let nodes = [NodeIndex(1), NodeIndex(2)];
        assert!(route_bounds(&m, VehicleIndex(0), &nodes, &HashMap::new()).is_none());
    }

    #[test]
    fn test_pin_narrows_bounds() {
        let mut m = model();
        m.set_node_window(NodeIndex(1), 1000, 3000);
        m.close();

        let nodes = [NodeIndex(1)];
        let mut pins = HashMap::new();
        pins.insert(NodeIndex(1), 1500);
        let (earliest, latest) = route_bounds(&m, VehicleIndex(0), &nodes, &pins).unwrap();
        assert_eq!(earliest, vec![1500]);
        assert_eq!(latest, vec![1500]);

        pins.insert(NodeIndex(1), 500);
        assert!(route_bounds(&m, VehicleIndex(0), &nodes, &pins).is_none());
    }

    #[test]
    fn test_evaluate_route_commits_earliest_starts() {
        let mut m = model();
        m.set_node_window(NodeIndex(1), 1000, 2000);
        m.close();

        let schedule =
            evaluate_route(&m, VehicleIndex(0), &[NodeIndex(1)], &HashMap::new()).unwrap();
        assert_eq!(schedule.starts, vec![1000]);
        assert_eq!(schedule.shift_end, 1300);
        assert_eq!(schedule.travel_cost, 0);
    }

    #[test]
    fn test_evaluate_route_travel_cost_counts_inner_arcs() {
        let mut m = model();
        m.close();

        let schedule = evaluate_route(
            &m,
            VehicleIndex(0),
            &[NodeIndex(1), NodeIndex(2), NodeIndex(3)],
            &HashMap::new(),
        )
        .unwrap();
        assert_eq!(schedule.travel_cost, 1200);
    }

    #[test]
    fn test_evaluate_route_respects_shift_end() {
        let mut m = model();
        m.set_vehicle_end_window(VehicleIndex(0), 0, 1100);
        m.set_node_window(NodeIndex(1), 1000, 2000);
        m.close();

        // Finishing the visit would take until 1300, past the shift end.
        assert!(evaluate_route(&m, VehicleIndex(0), &[NodeIndex(1)], &HashMap::new()).is_none());
    }

    #[test]
    fn test_evaluate_empty_route() {
        let mut m = model();
        m.set_vehicle_start_window(VehicleIndex(0), 500, 700);
        m.close();

        let schedule = evaluate_route(&m, VehicleIndex(0), &[], &HashMap::new()).unwrap();
        assert!(schedule.nodes.is_empty());
        assert_eq!(schedule.shift_start, 500);
        assert_eq!(schedule.shift_end, 500);
        assert_eq!(schedule.travel_cost, 0);
    }
}
