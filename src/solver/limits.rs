//! Search limits: external cancellation and stalled-search detection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::engine::{Assignment, RoutingModel, SearchMonitor, SearchStats};

/// Stops the search as soon as the shared cancel token is set.
pub struct CancelSearchLimit {
    token: Arc<AtomicBool>,
}

impl CancelSearchLimit {
    pub fn new(token: Arc<AtomicBool>) -> Self {
        Self { token }
    }
}

impl SearchMonitor for CancelSearchLimit {
    fn should_stop(&self) -> bool {
        self.token.load(Ordering::Relaxed)
    }
}

/// Stops the search once the objective has not improved for `limit`.
/// Engages only after the first solution has been found.
pub struct StalledSearchLimit {
    limit: Duration,
    best_objective: i64,
    last_improvement: Option<Instant>,
    search_in_progress: bool,
}

impl StalledSearchLimit {
    pub fn new(limit: Duration) -> Self {
        Self {
            limit,
            best_objective: i64::MAX,
            last_improvement: None,
            search_in_progress: false,
        }
    }
}

impl SearchMonitor for StalledSearchLimit {
    fn enter_search(&mut self) {
        self.best_objective = i64::MAX;
        self.last_improvement = None;
        self.search_in_progress = true;
    }

    fn at_solution(&mut self, assignment: &Assignment, _model: &RoutingModel, _stats: &SearchStats) {
        if assignment.cost < self.best_objective {
            self.best_objective = assignment.cost;
            self.last_improvement = Some(Instant::now());
        }
    }

    fn should_stop(&self) -> bool {
        if !self.search_in_progress {
            return false;
        }
        match self.last_improvement {
            Some(instant) => instant.elapsed() > self.limit,
            None => false,
        }
    }

    fn exit_search(&mut self) {
        self.search_in_progress = false;
    }
}
