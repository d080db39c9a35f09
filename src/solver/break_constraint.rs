//! Per-vehicle break placement against the committed route.
//!
//! Once a vehicle's path closes, the constraint resolves every break
//! interval so that breaks, service periods and travel legs are strictly
//! disjoint. Interior breaks may slide within their window and visit starts
//! may be delayed (never advanced) to make room; if no placement exists the
//! path is rejected.

use tracing::debug;

use crate::engine::{ConstraintViolation, PathContext, RouteConstraint, VehicleIndex};

pub struct BreakConstraint {
    vehicle: VehicleIndex,
}

impl BreakConstraint {
    pub fn new(vehicle: VehicleIndex) -> Self {
        Self { vehicle }
    }

    fn violation(&self, reason: impl Into<String>) -> ConstraintViolation {
        ConstraintViolation {
            constraint: "break_constraint",
            vehicle: self.vehicle,
            reason: reason.into(),
        }
    }
}

/// Occupied interval `[start, end)` on the vehicle's timeline: one service
/// period together with the following travel leg.
fn busy_intervals(ctx: &PathContext<'_>) -> Vec<(i64, i64)> {
    let n = ctx.nodes.len();
    (0..n)
        .map(|position| {
            let start = ctx.starts[position];
            let mut duration = ctx.services[position];
            if position + 1 < n {
                duration += ctx.travels[position];
            }
            (start, start + duration)
        })
        .collect()
}

fn overlaps(a: (i64, i64), b: (i64, i64)) -> bool {
    a.0 < b.1 && b.0 < a.1
}

/// Earliest start in `[start_min, start_max]` where the break avoids every
/// listed interval, walking past conflicts.
fn earliest_fit(
    start_min: i64,
    start_max: i64,
    duration: i64,
    occupied: &[(i64, i64)],
) -> Option<i64> {
    let mut candidate = start_min;
    loop {
        if candidate > start_max {
            return None;
        }
        let conflict = occupied
            .iter()
            .filter(|&&interval| overlaps((candidate, candidate + duration), interval))
            .map(|&(_, end)| end)
            .max();
        match conflict {
            None => return Some(candidate),
            Some(end) => candidate = candidate.max(end),
        }
    }
}

impl RouteConstraint for BreakConstraint {
    fn name(&self) -> &'static str {
        "break_constraint"
    }

    fn vehicle(&self) -> Option<VehicleIndex> {
        Some(self.vehicle)
    }

    fn propagate(&self, ctx: &mut PathContext<'_>) -> Result<(), ConstraintViolation> {
        if ctx.nodes.is_empty() {
            for interval in ctx.breaks.iter_mut() {
                interval.performed = Some(false);
            }
            return Ok(());
        }

        let n = ctx.nodes.len();
        let mut order: Vec<usize> = (0..ctx.breaks.len()).collect();
        order.sort_by_key(|&index| (ctx.breaks[index].start_min, ctx.breaks[index].start_max));

        let mut placed: Vec<(usize, i64)> = Vec::new();

        for index in order {
            let (start_min, start_max, duration) = {
                let interval = &ctx.breaks[index];
                (interval.start_min, interval.start_max, interval.duration)
            };
            if duration == 0 {
                placed.push((index, start_min));
                continue;
            }

            let mut occupied = busy_intervals(ctx);
            occupied.extend(placed.iter().map(|&(other, start)| {
                (start, start + ctx.breaks[other].duration)
            }));

            if let Some(start) = earliest_fit(start_min, start_max, duration, &occupied) {
                placed.push((index, start));
                continue;
            }

            // No free slot; try to open one by delaying the route at each
            // boundary in turn.
            let mut resolved = None;
            for boundary in 0..n {
                let arrival = if boundary == 0 {
                    start_min
                } else {
                    ctx.starts[boundary - 1]
                        + ctx.services[boundary - 1]
                        + ctx.travels[boundary - 1]
                };

                let fixed: Vec<(i64, i64)> = placed
                    .iter()
                    .map(|&(other, start)| (start, start + ctx.breaks[other].duration))
                    .collect();
                let Some(start) =
                    earliest_fit(start_min.max(arrival), start_max, duration, &fixed)
                else {
                    continue;
                };

                // Push the boundary visit and everything after it.
                let mut candidate = ctx.starts.clone();
                candidate[boundary] = candidate[boundary].max(start + duration);
                let mut feasible = candidate[boundary] <= ctx.latest[boundary];
                for position in (boundary + 1)..n {
                    let min_start = candidate[position - 1]
                        + ctx.services[position - 1]
                        + ctx.travels[position - 1];
                    candidate[position] = candidate[position].max(min_start);
                    if candidate[position] > ctx.latest[position] {
                        feasible = false;
                        break;
                    }
                }
                if !feasible {
                    continue;
                }

                // The delayed timeline must leave both the new break and
                // every earlier placement untouched.
                let mut occupied: Vec<(i64, i64)> = (0..n)
                    .map(|position| {
                        let mut busy = ctx.services[position];
                        if position + 1 < n {
                            busy += ctx.travels[position];
                        }
                        (candidate[position], candidate[position] + busy)
                    })
                    .collect();
                let mut all_disjoint = occupied
                    .iter()
                    .all(|&interval| !overlaps(interval, (start, start + duration)));
                occupied.push((start, start + duration));
                for &(other, other_start) in &placed {
                    let other_interval =
                        (other_start, other_start + ctx.breaks[other].duration);
                    if occupied
                        .iter()
                        .any(|&interval| overlaps(interval, other_interval))
                    {
                        all_disjoint = false;
                        break;
                    }
                }
                if !all_disjoint {
                    continue;
                }

                resolved = Some((start, candidate));
                break;
            }

            match resolved {
                Some((start, candidate)) => {
                    *ctx.starts = candidate;
                    placed.push((index, start));
                }
                None => {
                    return Err(self.violation(format!(
                        "no placement for break [{}, {}] lasting {}s",
                        start_min, start_max, duration
                    )));
                }
            }
        }

        debug!(
            vehicle = self.vehicle.0,
            breaks = placed.len(),
            "breaks placed for closed path"
        );
        for (index, start) in placed {
            ctx.breaks[index].performed = Some(true);
            ctx.breaks[index].start = Some(start);
        }
        Ok(())
    }
}
