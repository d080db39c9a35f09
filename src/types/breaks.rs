//! Carer rest breaks.

use chrono::{Duration, NaiveDateTime};
use std::fmt;

use super::Carer;

/// A rest period assigned to a carer in a finished schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct Break {
    carer: Carer,
    begin: NaiveDateTime,
    duration: Duration,
}

impl Break {
    pub fn new(carer: Carer, begin: NaiveDateTime, duration: Duration) -> Self {
        Self {
            carer,
            begin,
            duration,
        }
    }

    pub fn carer(&self) -> &Carer {
        &self.carer
    }

    pub fn begin(&self) -> NaiveDateTime {
        self.begin
    }

    pub fn end(&self) -> NaiveDateTime {
        self.begin + self.duration
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }
}

impl fmt::Display for Break {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "break for {} at {} lasting {}m",
            self.carer,
            self.begin,
            self.duration.num_minutes()
        )
    }
}
