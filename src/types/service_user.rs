//! Service users and their carer preferences.

use std::fmt;

use super::{Address, Location};

/// A person receiving care at a fixed home location.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceUser {
    key: i64,
    address: Address,
    location: Location,
}

impl ServiceUser {
    pub fn new(key: i64, address: Address, location: Location) -> Self {
        Self {
            key,
            address,
            location,
        }
    }

    pub fn key(&self) -> i64 {
        self.key
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn location(&self) -> Location {
        self.location
    }
}

impl fmt::Display for ServiceUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "service user {}", self.key)
    }
}

/// A service user together with the optional per-carer preference table.
///
/// Weights are rationals in `[0, 1]`; a missing entry means no recorded
/// preference for that carer.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtendedServiceUser {
    user: ServiceUser,
    preference: Vec<(String, f64)>,
}

impl ExtendedServiceUser {
    pub fn new(user: ServiceUser, preference: Vec<(String, f64)>) -> Self {
        Self { user, preference }
    }

    pub fn user(&self) -> &ServiceUser {
        &self.user
    }

    pub fn key(&self) -> i64 {
        self.user.key()
    }

    pub fn location(&self) -> Location {
        self.user.location()
    }

    pub fn has_preferences(&self) -> bool {
        !self.preference.is_empty()
    }

    /// The preference weight recorded for `sap_number`, or zero.
    pub fn preference(&self, sap_number: &str) -> f64 {
        self.preference
            .iter()
            .find(|(carer, _)| carer == sap_number)
            .map(|(_, weight)| *weight)
            .unwrap_or(0.0)
    }

    /// The preference weight as an integer score in `[0, 100]`, the unit
    /// used by the continuity-of-care accumulator.
    pub fn preference_score(&self, sap_number: &str) -> i64 {
        (self.preference(sap_number).clamp(0.0, 1.0) * 100.0).round() as i64
    }
}
