//! Per-carer routes.

use std::fmt;

use super::{Carer, ScheduledVisit};

/// The ordered list of visits served by one carer.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    carer: Carer,
    visits: Vec<ScheduledVisit>,
}

impl Route {
    pub fn new(carer: Carer, visits: Vec<ScheduledVisit>) -> Self {
        Self { carer, visits }
    }

    pub fn empty(carer: Carer) -> Self {
        Self {
            carer,
            visits: Vec::new(),
        }
    }

    pub fn carer(&self) -> &Carer {
        &self.carer
    }

    pub fn visits(&self) -> &[ScheduledVisit] {
        &self.visits
    }

    pub fn visits_mut(&mut self) -> &mut Vec<ScheduledVisit> {
        &mut self.visits
    }

    pub fn is_empty(&self) -> bool {
        self.visits.is_empty()
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "route of {} with {} visits", self.carer, self.visits.len())
    }
}
